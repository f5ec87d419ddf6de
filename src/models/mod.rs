//! Data models for the inspection engine.
//!
//! - [`DetectionState`], [`BatchStatus`], [`DetectionType`], [`HoleResult`] and
//!   [`HoleStatus`]: the enums that the state machine, the orchestrator and the
//!   sync pipeline agree on
//! - [`Batch`]: the persisted batch aggregate, with its [`BatchProgress`] and the
//!   [`PausedDetectionState`] it owns while paused
//! - [`StatusUpdateRecord`]: one row of the status store's update log
//! - [`EngineConfig`]: configuration sections loaded from `holeinspect.yaml`
//!
//! # Architecture Note
//!
//! The models are plain data: serializable with serde, cloneable, and free of
//! I/O. Mutation rules (legal transitions, single active batch per product)
//! live in [`crate::state`] and [`crate::services`].

pub mod batch;
pub mod config;
pub mod detection;
pub mod status;

pub use batch::{
    Batch, BatchInfo, BatchProgress, BatchSummary, PausedDetectionState, ProductInput,
    ProductRef, ProgressUpdate,
};
pub use config::{
    DegradationProfile, EngineConfig, EstimatorSettings, LoggingSettings, SimulationConfig,
    StorageSettings, SyncSettings,
};
pub use detection::{BatchStatus, DetectionState, DetectionType, HoleResult, HoleStatus};
pub use status::StatusUpdateRecord;
