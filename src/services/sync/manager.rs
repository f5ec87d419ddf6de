use crate::metrics::Metrics;
use crate::models::HoleStatus;
use crate::store::{StatusStore, StoreError};
use indexmap::IndexMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, timeout};

/// Error returned by a display sink that could not take a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Display sink rejected batch: {0}")]
pub struct SinkError(pub String);

/// Live display component receiving hole status batches.
#[cfg_attr(test, mockall::automock)]
pub trait DisplaySink: Send + Sync {
    /// Apply the latest status of each hole in `updates`.
    fn batch_update_hole_status(
        &self,
        updates: &IndexMap<String, HoleStatus>,
    ) -> Result<(), SinkError>;
}

/// Errors of a sync tick.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Status store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What one sync tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another tick was still running
    Skipped,
    /// No unsynced records
    Idle,
    /// Records are pending but no sink is registered; nothing was marked
    NoSink { pending: usize },
    /// The sink accepted `holes` distinct holes covering `records` log records
    Synced { records: usize, holes: usize },
}

/// Drains unsynced status records from the store and pushes them to the
/// registered display sink.
///
/// Every tick:
/// 1. reads all unsynced records (independently of any [`UpdateBuffer`](super::UpdateBuffer))
/// 2. maps each raw status through [`HoleStatus::from_token`]
/// 3. keeps only the latest status per hole
/// 4. hands the map to the sink, and marks the records synced only if the
///    sink returned `Ok`; a failing sink leaves everything for the next tick
pub struct SyncManager {
    store: Arc<dyn StatusStore>,
    sink: RwLock<Option<Arc<dyn DisplaySink>>>,
    syncing: AtomicBool,
    interval: Duration,
    metrics: Arc<Metrics>,
}

/// RAII reset of the "already syncing" flag.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncManager {
    pub fn new(store: Arc<dyn StatusStore>, interval: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            sink: RwLock::new(None),
            syncing: AtomicBool::new(false),
            interval,
            metrics,
        }
    }

    /// Register (or replace) the display sink.
    pub fn set_sink(&self, sink: Arc<dyn DisplaySink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        tracing::info!("Display sink registered");
    }

    pub fn clear_sink(&self) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Run one drain-and-push cycle.
    pub fn sync_once(&self) -> Result<SyncOutcome, SyncError> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already in progress, skipping tick");
            return Ok(SyncOutcome::Skipped);
        }
        let _guard = SyncingGuard(&self.syncing);

        let records = self.store.get_pending_status_updates()?;
        if records.is_empty() {
            return Ok(SyncOutcome::Idle);
        }

        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sink) = sink else {
            tracing::debug!("{} status records pending, no display sink", records.len());
            return Ok(SyncOutcome::NoSink {
                pending: records.len(),
            });
        };

        let mut latest: IndexMap<String, HoleStatus> = IndexMap::new();
        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            let status = HoleStatus::from_token(&record.new_status);
            if status.is_unmapped() {
                tracing::warn!(
                    "Unmapped hole status '{}' for {} (source: {})",
                    record.new_status,
                    record.hole_id,
                    record.source
                );
                self.metrics.record_unmapped_status();
            }
            // Last write wins, first-seen position kept
            latest.insert(record.hole_id.clone(), status);
            ids.push(record.id);
        }

        let delivered = catch_unwind(AssertUnwindSafe(|| sink.batch_update_hole_status(&latest)))
            .unwrap_or_else(|_| Err(SinkError("display sink panicked".to_string())));
        if let Err(e) = delivered {
            self.metrics.record_sink_failure();
            tracing::warn!(
                "Display sink failed, {} records stay unsynced for retry: {}",
                ids.len(),
                e
            );
            return Err(e.into());
        }

        let marked = self.store.mark_synced(&ids)?;
        self.metrics.record_sync(marked);
        tracing::debug!("Synced {} records ({} holes)", marked, latest.len());

        Ok(SyncOutcome::Synced {
            records: ids.len(),
            holes: latest.len(),
        })
    }

    /// Spawn the periodic sync task.
    pub fn start(self: &Arc<Self>) -> SyncHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);
        let period = self.interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Sync manager started (interval {:?})", period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Errors are retried on the next tick
                        let _ = manager.sync_once();
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            // Final drain so nothing accepted before shutdown is left behind
            let _ = manager.sync_once();
            tracing::info!("Sync manager stopped");
        });

        SyncHandle {
            shutdown_tx,
            task: Some(task),
        }
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("interval", &self.interval)
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}

/// Handle to a running sync task.
#[derive(Debug)]
pub struct SyncHandle {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Stop the sync task and wait (bounded) for it to finish.
    ///
    /// Stopping an already stopped handle is a no-op.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);

        let abort = task.abort_handle();
        if timeout(Duration::from_secs(5), task).await.is_err() {
            tracing::warn!("Sync task did not stop in time, aborting");
            abort.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}
