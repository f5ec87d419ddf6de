//! Hole status synchronization pipeline.
//!
//! Writers (simulation worker, sensor drivers) push status changes into the
//! [`UpdateBuffer`], which writes them through to the status store and
//! coalesces them in memory. The [`SyncManager`] independently drains the
//! store's unsynced log on its own tick and pushes deduplicated batches to
//! the [`DisplaySink`].

pub mod buffer;
pub mod manager;

pub use buffer::{BufferFlush, BufferedUpdate, FlushReason, UpdateBuffer};
pub use manager::{DisplaySink, SinkError, SyncError, SyncHandle, SyncManager, SyncOutcome};
