//! Services module - batch lifecycle, status sync and simulation.
//!
//! Everything here is framework-agnostic: no UI code, only the rules of the
//! inspection workflow and the plumbing that carries hole status to whatever
//! display is attached.
//!
//! # Components
//!
//! - [`BatchOrchestrator`]: the batch lifecycle facade. Handles:
//!   - Creating batches with per-product detection numbers
//!   - PENDING -> RUNNING -> PAUSED/COMPLETED/TERMINATED, one active batch per product
//!   - Pause/resume with an atomic side-file snapshot
//!   - Applying worker results to progress, the time estimator and the update buffer
//!
//! - [`BatchPersistence`]: the per-batch directory (`batch_info.json`,
//!   `summary.json`, `paused_state.json`), written via temp file and rename
//!
//! - [`UpdateBuffer`] and [`SyncManager`]: the status pipeline. Writers push
//!   into the buffer (write-through to the status store), the sync manager
//!   drains unsynced records on its own tick and hands them to a
//!   [`DisplaySink`], deduplicated by hole
//!
//! - [`TimeEstimator`]: rolling-window elapsed/remaining time
//!
//! - [`SimulationWorker`]: synthetic results for mock batches
//!
//! # Usage Example
//!
//! ```ignore
//! use holeinspect::services::{BatchOrchestrator, SimulationWorker};
//!
//! let batch = orchestrator.create_batch("P1", Some("operator"), None, true)?;
//! orchestrator.start_batch(&batch.batch_id);
//!
//! let (worker, events) = SimulationWorker::spawn(config, holes, 0);
//! let completed = orchestrator.drive(&batch.batch_id, events).await;
//! ```

pub mod orchestrator;
pub mod persistence;
pub mod simulation;
pub mod sync;
pub mod timing;

pub use orchestrator::{BatchError, BatchOrchestrator, format_batch_id};
pub use persistence::{BatchPersistence, PersistenceError, SnapshotBackup};
pub use simulation::{SimulationWorker, WorkerControl, WorkerEvent, WorkerStatus};
pub use sync::{
    BufferFlush, BufferedUpdate, DisplaySink, FlushReason, SinkError, SyncError, SyncHandle,
    SyncManager, SyncOutcome, UpdateBuffer,
};
pub use timing::{TimeEstimator, TimeStats};
