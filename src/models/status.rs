use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the status store's append-only update log.
///
/// `synced` starts out `false` and is flipped exactly once, by the
/// [`SyncManager`](crate::services::SyncManager), after a display sink has
/// accepted the batch containing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdateRecord {
    pub id: u64,
    pub hole_id: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}
