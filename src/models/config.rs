use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration loaded from `holeinspect.yaml`.
///
/// Every section falls back to its defaults when absent, so a missing or
/// partial file still yields a usable configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub estimator: EstimatorSettings,

    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root directory for the batch table and per-batch data folders.
    #[serde(default = "default_data_root")]
    pub data_root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
        }
    }
}

fn default_data_root() -> String {
    "Data".to_string()
}

/// Status synchronization tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Period of the sync manager's drain tick.
    #[serde(default = "default_sync_interval_ms")]
    pub interval_ms: u64,

    /// Queue length that triggers an update buffer flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum age of the last flush before the buffer flushes anyway.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_sync_interval_ms(),
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_sync_interval_ms() -> u64 {
    1000
}

fn default_buffer_size() -> usize {
    3
}

fn default_flush_interval_ms() -> u64 {
    500
}

/// Remaining-time estimation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorSettings {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Below this many in-task samples the estimate leans on history.
    #[serde(default = "default_early_sample_threshold")]
    pub early_sample_threshold: usize,

    #[serde(default = "default_historical_weight")]
    pub historical_weight: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            history_capacity: default_history_capacity(),
            early_sample_threshold: default_early_sample_threshold(),
            historical_weight: default_historical_weight(),
        }
    }
}

fn default_window_size() -> usize {
    10
}

fn default_history_capacity() -> usize {
    20
}

fn default_early_sample_threshold() -> usize {
    5
}

fn default_historical_weight() -> f64 {
    0.7
}

/// Equipment-fatigue curve for the simulator. Each growth factor scales the
/// matching quantity by `1 + growth * progress_fraction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DegradationProfile {
    #[serde(default)]
    pub error_rate_growth: f64,

    #[serde(default)]
    pub unqualified_rate_growth: f64,

    #[serde(default)]
    pub delay_growth: f64,
}

/// Simulation worker profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_error_rate")]
    pub error_rate: f64,

    #[serde(default = "default_unqualified_rate")]
    pub unqualified_rate: f64,

    /// Emit a batch-completion event every this many items.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub min_random_delay_ms: u64,

    #[serde(default)]
    pub max_random_delay_ms: u64,

    /// Fixed RNG seed for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default)]
    pub degradation: Option<DegradationProfile>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            error_rate: default_error_rate(),
            unqualified_rate: default_unqualified_rate(),
            batch_size: default_batch_size(),
            min_random_delay_ms: 0,
            max_random_delay_ms: 0,
            seed: None,
            degradation: None,
        }
    }
}

fn default_interval_ms() -> u64 {
    100
}

fn default_error_rate() -> f64 {
    0.01
}

fn default_unqualified_rate() -> f64 {
    0.05
}

fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_dir")]
    pub dir: String,

    #[serde(default = "default_log_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            prefix: default_log_prefix(),
            debug: false,
            console: default_console(),
        }
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_prefix() -> String {
    "holeinspect".to_string()
}

fn default_console() -> bool {
    true
}
