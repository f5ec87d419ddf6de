use super::StoreError;
use crate::models::StatusUpdateRecord;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Durable store of hole statuses with an append-only update log.
///
/// This is the seam towards the application's database. The sync manager
/// only ever reads the unsynced tail of the log and flips `synced` flags;
/// writers go through [`update_hole_status`](StatusStore::update_hole_status).
#[cfg_attr(test, mockall::automock)]
pub trait StatusStore: Send + Sync {
    /// Write the current status of a hole and append a log record.
    ///
    /// Returns `false` when the write was refused (e.g. an empty hole id).
    fn update_hole_status(&self, hole_id: &str, status: &str, source: &str)
        -> Result<bool, StoreError>;

    /// Current status of a hole, if it has ever been written.
    fn hole_status(&self, hole_id: &str) -> Result<Option<String>, StoreError>;

    /// All log records not yet synced, oldest first.
    fn get_pending_status_updates(&self) -> Result<Vec<StatusUpdateRecord>, StoreError>;

    /// Flip `synced` on the given records. Returns how many were newly flipped.
    fn mark_synced(&self, ids: &[u64]) -> Result<usize, StoreError>;
}

/// Synced records kept around for inspection before they are compacted away.
pub const SYNCED_RETENTION: usize = 1024;

#[derive(Debug, Default)]
struct StoreInner {
    statuses: HashMap<String, String>,
    /// Oldest first; ids are strictly increasing
    log: VecDeque<StatusUpdateRecord>,
    /// Position of the oldest unsynced record in `log`
    first_unsynced: usize,
    next_id: u64,
}

impl StoreInner {
    fn unsynced(&self) -> impl Iterator<Item = &StatusUpdateRecord> {
        self.log.range(self.first_unsynced..).filter(|r| !r.synced)
    }

    /// Move past the synced prefix and drop synced records beyond the
    /// retention window.
    fn compact(&mut self) {
        while self
            .log
            .get(self.first_unsynced)
            .is_some_and(|record| record.synced)
        {
            self.first_unsynced += 1;
        }

        let excess = self.first_unsynced.saturating_sub(SYNCED_RETENTION);
        if excess > 0 {
            self.log.drain(..excess);
            self.first_unsynced -= excess;
        }
    }
}

/// In-process [`StatusStore`] used by the headless runner and the tests.
///
/// Unsynced records are never dropped. Once synced, only the most recent
/// [`SYNCED_RETENTION`] records that precede the unsynced tail are kept.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of log records still waiting for a sync.
    pub fn pending_count(&self) -> usize {
        self.lock().unsynced().count()
    }

    /// Retained update log, oldest first.
    pub fn log(&self) -> Vec<StatusUpdateRecord> {
        self.lock().log.iter().cloned().collect()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn update_hole_status(
        &self,
        hole_id: &str,
        status: &str,
        source: &str,
    ) -> Result<bool, StoreError> {
        if hole_id.trim().is_empty() {
            tracing::warn!("Refusing status update without a hole id (status={})", status);
            return Ok(false);
        }

        let mut inner = self.lock();
        let old_status = inner
            .statuses
            .insert(hole_id.to_string(), status.to_string());

        inner.next_id += 1;
        let record = StatusUpdateRecord {
            id: inner.next_id,
            hole_id: hole_id.to_string(),
            old_status,
            new_status: status.to_string(),
            source: source.to_string(),
            timestamp: Utc::now(),
            synced: false,
        };
        inner.log.push_back(record);

        Ok(true)
    }

    fn hole_status(&self, hole_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().statuses.get(hole_id).cloned())
    }

    fn get_pending_status_updates(&self) -> Result<Vec<StatusUpdateRecord>, StoreError> {
        Ok(self.lock().unsynced().cloned().collect())
    }

    fn mark_synced(&self, ids: &[u64]) -> Result<usize, StoreError> {
        let ids: HashSet<u64> = ids.iter().copied().collect();
        let Some(&lowest) = ids.iter().min() else {
            return Ok(0);
        };

        let mut inner = self.lock();
        // Ids increase along the log, so nothing before `lowest` can match
        let first_unsynced = inner.first_unsynced;
        let start = inner
            .log
            .range(first_unsynced..)
            .position(|r| r.id >= lowest)
            .map_or(inner.log.len(), |offset| first_unsynced + offset);

        let mut flipped = 0;
        for record in inner.log.range_mut(start..) {
            if !record.synced && ids.contains(&record.id) {
                record.synced = true;
                flipped += 1;
            }
        }
        inner.compact();
        Ok(flipped)
    }
}
