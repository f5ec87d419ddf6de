// holeinspect - inspection batch orchestration and status-sync engine
//
// This is the library crate containing the batch lifecycle, the status sync
// pipeline and the data structures they share.
// The binary crate (main.rs) runs a headless simulated inspection.

pub mod config;
pub mod context;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use context::EngineContext;
pub use metrics::Metrics;
pub use models::{Batch, BatchStatus, DetectionState, EngineConfig, HoleResult, HoleStatus};
pub use services::{BatchOrchestrator, SimulationWorker, SyncManager, UpdateBuffer};
pub use state::{BatchStateMachine, StateChange};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
