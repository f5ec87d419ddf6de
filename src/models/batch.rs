use super::detection::{BatchStatus, DetectionType};
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A resolved product reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
    pub name: String,
}

impl ProductRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// What callers may hand to [`create_batch`](crate::services::BatchOrchestrator::create_batch).
///
/// The UI layer historically passed either a bare id or the whole product
/// object. Both are accepted; the rich form is unwrapped to its id at the
/// boundary (with a warning) and then resolved through the catalog like a
/// bare id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductInput {
    Id(String),
    Product(ProductRef),
}

impl From<&str> for ProductInput {
    fn from(id: &str) -> Self {
        ProductInput::Id(id.to_string())
    }
}

impl From<String> for ProductInput {
    fn from(id: String) -> Self {
        ProductInput::Id(id)
    }
}

impl From<ProductRef> for ProductInput {
    fn from(product: ProductRef) -> Self {
        ProductInput::Product(product)
    }
}

/// Progress counters of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub current_index: usize,
    pub total_holes: usize,
    pub completed_holes: usize,
    pub qualified_holes: usize,
    pub defective_holes: usize,
}

impl BatchProgress {
    /// Percentage of holes inspected, in [0, 100].
    pub fn completion_rate(&self) -> f64 {
        percentage(self.completed_holes, self.total_holes)
    }

    /// Percentage of inspected holes that passed, in [0, 100]. Zero when nothing
    /// has been inspected yet.
    pub fn qualification_rate(&self) -> f64 {
        percentage(self.qualified_holes, self.completed_holes)
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let rate = (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0);
    (rate * 100.0).round() / 100.0
}

/// Partial progress update. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_index: Option<usize>,
    pub total_holes: Option<usize>,
    pub completed_holes: Option<usize>,
    pub qualified_holes: Option<usize>,
    pub defective_holes: Option<usize>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        self.current_index.is_none()
            && self.total_holes.is_none()
            && self.completed_holes.is_none()
            && self.qualified_holes.is_none()
            && self.defective_holes.is_none()
    }

    pub fn apply_to(&self, progress: &mut BatchProgress) {
        if let Some(v) = self.current_index {
            progress.current_index = v;
        }
        if let Some(v) = self.total_holes {
            progress.total_holes = v;
        }
        if let Some(v) = self.completed_holes {
            progress.completed_holes = v;
        }
        if let Some(v) = self.qualified_holes {
            progress.qualified_holes = v;
        }
        if let Some(v) = self.defective_holes {
            progress.defective_holes = v;
        }
    }
}

/// In-flight state captured when a batch is paused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PausedDetectionState {
    pub current_index: usize,
    #[serde(default)]
    pub detection_results: IndexMap<String, String>,
    #[serde(default)]
    pub pending_holes: Vec<String>,
    #[serde(default)]
    pub simulation_params: Option<serde_json::Value>,
}

/// One complete inspection run against a product's hole set.
///
/// This is the aggregate persisted as a batch row. While the batch is paused
/// it also carries the paused state (`detection_results`, `pending_holes`,
/// `simulation_params` and `progress.current_index`); those fields are the
/// authoritative copy, the side-file snapshot is only a cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub product_id: String,
    pub product_name: String,
    pub detection_number: u32,
    pub detection_type: DetectionType,
    pub status: BatchStatus,
    pub progress: BatchProgress,
    pub operator: Option<String>,
    pub equipment_id: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub data_path: Utf8PathBuf,
    #[serde(default)]
    pub detection_results: IndexMap<String, String>,
    #[serde(default)]
    pub pending_holes: Vec<String>,
    #[serde(default)]
    pub simulation_params: Option<serde_json::Value>,
}

impl Batch {
    pub fn is_mock(&self) -> bool {
        self.detection_type.is_mock()
    }

    /// Paused state rebuilt from the aggregate's own fields.
    pub fn paused_state(&self) -> PausedDetectionState {
        PausedDetectionState {
            current_index: self.progress.current_index,
            detection_results: self.detection_results.clone(),
            pending_holes: self.pending_holes.clone(),
            simulation_params: self.simulation_params.clone(),
        }
    }

    /// Copy a paused state onto the aggregate.
    pub fn absorb_paused_state(&mut self, state: &PausedDetectionState) {
        self.progress.current_index = state.current_index;
        self.detection_results = state.detection_results.clone();
        self.pending_holes = state.pending_holes.clone();
        self.simulation_params = state.simulation_params.clone();
    }

    pub fn info(&self) -> BatchInfo {
        BatchInfo {
            batch_id: self.batch_id.clone(),
            product_id: self.product_id.clone(),
            product_name: self.product_name.clone(),
            detection_number: self.detection_number,
            detection_type: self.detection_type,
            is_mock: self.is_mock(),
            operator: self.operator.clone(),
            equipment_id: self.equipment_id.clone(),
            description: self.description.clone(),
            status: self.status,
            created_at: self.created_at,
        }
    }

    pub fn summary(&self) -> BatchSummary {
        let duration = (self.updated_at - self.created_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        BatchSummary {
            batch_id: self.batch_id.clone(),
            detection_number: self.detection_number,
            status: self.status,
            total_holes: self.progress.total_holes,
            completed_holes: self.progress.completed_holes,
            qualified_holes: self.progress.qualified_holes,
            defective_holes: self.progress.defective_holes,
            completion_rate: self.progress.completion_rate(),
            qualification_rate: self.progress.qualification_rate(),
            duration,
            updated_at: self.updated_at,
        }
    }
}

/// Contents of `batch_info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_id: String,
    pub product_id: String,
    pub product_name: String,
    pub detection_number: u32,
    pub detection_type: DetectionType,
    pub is_mock: bool,
    pub operator: Option<String>,
    pub equipment_id: Option<String>,
    pub description: Option<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

/// Contents of `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub detection_number: u32,
    pub status: BatchStatus,
    pub total_holes: usize,
    pub completed_holes: usize,
    pub qualified_holes: usize,
    pub defective_holes: usize,
    pub completion_rate: f64,
    pub qualification_rate: f64,
    /// Seconds between creation and the last update.
    pub duration: f64,
    pub updated_at: DateTime<Utc>,
}
