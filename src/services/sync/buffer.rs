use crate::metrics::Metrics;
use crate::models::SyncSettings;
use crate::store::{StatusStore, StoreError};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The queue reached `buffer_size`
    Size,
    /// `flush_interval` elapsed since the previous flush
    Interval,
    /// [`UpdateBuffer::flush`] was called
    Manual,
}

/// A status write waiting in the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedUpdate {
    pub hole_id: String,
    pub status: String,
    pub source: String,
    pub queued_at: DateTime<Utc>,
}

/// Message broadcast on every flush.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferFlush {
    pub updates: Vec<BufferedUpdate>,
    pub reason: FlushReason,
}

#[derive(Debug)]
struct BufferInner {
    queue: Vec<BufferedUpdate>,
    last_flush: Instant,
}

/// Thread-safe coalescing buffer for hole status writes.
///
/// Writers call [`add_update`](Self::add_update) from any thread. Each update
/// is written through to the [`StatusStore`] (so it lands in the durable log,
/// unsynced) and queued in memory. The queue is flushed to subscribers when it
/// holds `buffer_size` entries or when `flush_interval` has passed since the
/// last flush, whichever comes first, and never before.
pub struct UpdateBuffer {
    store: Arc<dyn StatusStore>,
    buffer_size: usize,
    flush_interval: Duration,
    inner: Mutex<BufferInner>,
    flush_tx: broadcast::Sender<BufferFlush>,
    metrics: Arc<Metrics>,
}

impl UpdateBuffer {
    pub fn new(
        store: Arc<dyn StatusStore>,
        buffer_size: usize,
        flush_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (flush_tx, _) = broadcast::channel(64);
        Self {
            store,
            buffer_size: buffer_size.max(1),
            flush_interval,
            inner: Mutex::new(BufferInner {
                queue: Vec::new(),
                last_flush: Instant::now(),
            }),
            flush_tx,
            metrics,
        }
    }

    pub fn from_settings(
        store: Arc<dyn StatusStore>,
        settings: &SyncSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self::new(store, settings.buffer_size, settings.flush_interval(), metrics)
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a status write.
    ///
    /// # Returns
    /// - `Ok(Some(reason))` if this call triggered a flush
    /// - `Ok(None)` if the update was queued (or refused by the store) without a flush
    pub fn add_update(
        &self,
        hole_id: &str,
        status: &str,
        source: &str,
    ) -> Result<Option<FlushReason>, StoreError> {
        let flushed = {
            // The store write happens under the queue lock so the queue and
            // the durable log see writes in the same order
            let mut inner = self.lock();
            if !self.store.update_hole_status(hole_id, status, source)? {
                return Ok(None);
            }
            inner.queue.push(BufferedUpdate {
                hole_id: hole_id.to_string(),
                status: status.to_string(),
                source: source.to_string(),
                queued_at: Utc::now(),
            });

            let reason = if inner.queue.len() >= self.buffer_size {
                Some(FlushReason::Size)
            } else if inner.last_flush.elapsed() >= self.flush_interval {
                Some(FlushReason::Interval)
            } else {
                None
            };

            reason.map(|reason| (Self::drain(&mut inner), reason))
        };

        Ok(flushed.map(|(updates, reason)| {
            self.publish(updates, reason);
            reason
        }))
    }

    /// Flush if the interval has elapsed and something is queued.
    ///
    /// Called by the flush timer; never flushes on size alone.
    pub fn poll(&self) -> bool {
        let drained = {
            let mut inner = self.lock();
            if inner.queue.is_empty() || inner.last_flush.elapsed() < self.flush_interval {
                None
            } else {
                Some(Self::drain(&mut inner))
            }
        };

        match drained {
            Some(updates) => {
                self.publish(updates, FlushReason::Interval);
                true
            }
            None => false,
        }
    }

    /// Flush whatever is queued right now.
    ///
    /// # Returns
    /// Number of updates flushed
    pub fn flush(&self) -> usize {
        let updates = Self::drain(&mut self.lock());
        let count = updates.len();
        if count > 0 {
            self.publish(updates, FlushReason::Manual);
        }
        count
    }

    /// Number of updates waiting for a flush.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Subscribe to flush messages.
    pub fn subscribe(&self) -> broadcast::Receiver<BufferFlush> {
        self.flush_tx.subscribe()
    }

    /// Spawn a task that polls the buffer until `shutdown` turns `true`.
    pub fn spawn_flush_timer(
        buffer: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let period = (buffer.flush_interval / 4).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        buffer.poll();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Update buffer flush timer stopped");
        })
    }

    fn drain(inner: &mut BufferInner) -> Vec<BufferedUpdate> {
        inner.last_flush = Instant::now();
        std::mem::take(&mut inner.queue)
    }

    fn publish(&self, updates: Vec<BufferedUpdate>, reason: FlushReason) {
        match reason {
            FlushReason::Size => self.metrics.record_flush_by_size(),
            FlushReason::Interval => self.metrics.record_flush_by_interval(),
            FlushReason::Manual => self.metrics.record_flush_manual(),
        }
        tracing::debug!("Flushed {} status updates ({:?})", updates.len(), reason);
        // No subscribers is fine, the durable log already holds the updates
        let _ = self.flush_tx.send(BufferFlush { updates, reason });
    }
}

impl std::fmt::Debug for UpdateBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateBuffer")
            .field("buffer_size", &self.buffer_size)
            .field("flush_interval", &self.flush_interval)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStatusStore;
    use crate::store::status::MockStatusStore;
    use std::thread;

    fn buffer(size: usize, interval: Duration) -> (UpdateBuffer, Arc<InMemoryStatusStore>) {
        let store = Arc::new(InMemoryStatusStore::new());
        let buffer = UpdateBuffer::new(store.clone(), size, interval, Arc::new(Metrics::new()));
        (buffer, store)
    }

    #[test]
    fn test_flushes_on_size() {
        let (buffer, store) = buffer(3, Duration::from_secs(60));
        let mut rx = buffer.subscribe();

        assert_eq!(buffer.add_update("H1", "qualified", "sim").unwrap(), None);
        assert_eq!(buffer.add_update("H2", "qualified", "sim").unwrap(), None);
        assert_eq!(
            buffer.add_update("H3", "defective", "sim").unwrap(),
            Some(FlushReason::Size)
        );

        let flush = rx.try_recv().unwrap();
        assert_eq!(flush.reason, FlushReason::Size);
        assert_eq!(flush.updates.len(), 3);
        assert_eq!(buffer.pending(), 0);
        // Write-through: the durable log holds every update, unsynced
        assert_eq!(store.pending_count(), 3);
    }

    #[test]
    fn test_no_flush_before_threshold() {
        let (buffer, _store) = buffer(3, Duration::from_secs(60));
        buffer.add_update("H1", "qualified", "sim").unwrap();
        buffer.add_update("H2", "qualified", "sim").unwrap();

        assert!(!buffer.poll());
        assert_eq!(buffer.pending(), 2);
    }

    #[test]
    fn test_flushes_on_interval() {
        let (buffer, _store) = buffer(3, Duration::from_millis(50));
        let mut rx = buffer.subscribe();

        buffer.add_update("H1", "qualified", "sim").unwrap();
        buffer.add_update("H2", "qualified", "sim").unwrap();
        assert!(rx.try_recv().is_err());

        thread::sleep(Duration::from_millis(80));
        assert!(buffer.poll());

        let flush = rx.try_recv().unwrap();
        assert_eq!(flush.reason, FlushReason::Interval);
        assert_eq!(flush.updates.len(), 2);
    }

    #[test]
    fn test_add_after_interval_flushes_immediately() {
        let (buffer, _store) = buffer(10, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));

        assert_eq!(
            buffer.add_update("H1", "pending", "sim").unwrap(),
            Some(FlushReason::Interval)
        );
    }

    #[test]
    fn test_manual_flush() {
        let (buffer, _store) = buffer(10, Duration::from_secs(60));
        assert_eq!(buffer.flush(), 0);

        buffer.add_update("H1", "pending", "sim").unwrap();
        assert_eq!(buffer.flush(), 1);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_refused_write_is_not_queued() {
        let mut store = MockStatusStore::new();
        store.expect_update_hole_status().returning(|_, _, _| Ok(false));

        let buffer = UpdateBuffer::new(
            Arc::new(store),
            1,
            Duration::from_secs(60),
            Arc::new(Metrics::new()),
        );
        assert_eq!(buffer.add_update("", "pending", "sim").unwrap(), None);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_store_error_propagates() {
        let mut store = MockStatusStore::new();
        store
            .expect_update_hole_status()
            .returning(|_, _, _| Err(StoreError::Unavailable("db offline".into())));

        let buffer = UpdateBuffer::new(
            Arc::new(store),
            1,
            Duration::from_secs(60),
            Arc::new(Metrics::new()),
        );
        assert!(buffer.add_update("H1", "pending", "sim").is_err());
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_concurrent_writers() {
        let (buffer, store) = buffer(1000, Duration::from_secs(60));
        let buffer = Arc::new(buffer);

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        buffer
                            .add_update(&format!("T{}-H{}", t, i), "qualified", "sensor")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.pending(), 200);
        assert_eq!(store.pending_count(), 200);
    }

    #[test]
    fn test_same_hole_queue_matches_log_order() {
        let (buffer, store) = buffer(100_000, Duration::from_secs(60));
        let buffer = Arc::new(buffer);
        let mut rx = buffer.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..2000 {
                        buffer
                            .add_update("H1", &format!("w{}-{}", t, i), "sensor")
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(buffer.flush(), 8000);
        let queued: Vec<String> = rx
            .try_recv()
            .unwrap()
            .updates
            .into_iter()
            .map(|u| u.status)
            .collect();
        let logged: Vec<String> = store.log().into_iter().map(|r| r.new_status).collect();

        assert_eq!(queued, logged);
        assert_eq!(store.hole_status("H1").unwrap().as_ref(), queued.last());
    }
}
