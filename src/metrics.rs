// Performance metrics module
//
// Provides lightweight metrics tracking for the inspection engine

use crate::models::HoleResult;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// One instance is created by [`crate::context::EngineContext`] and shared by
/// every component; it is logged periodically and on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Holes inspected with a qualified result
    pub holes_qualified: AtomicU64,

    /// Holes inspected with an unqualified result
    pub holes_unqualified: AtomicU64,

    /// Holes whose inspection errored
    pub holes_errored: AtomicU64,

    /// Total per-hole inspection time in milliseconds
    pub total_inspection_time_ms: AtomicU64,

    /// Update buffer flushes triggered by queue length
    pub buffer_flushes_size: AtomicU64,

    /// Update buffer flushes triggered by the flush interval
    pub buffer_flushes_interval: AtomicU64,

    /// Update buffer flushes requested explicitly
    pub buffer_flushes_manual: AtomicU64,

    /// Sync ticks that pushed a batch to the display sink
    pub sync_ticks: AtomicU64,

    /// Status records marked synced
    pub records_synced: AtomicU64,

    /// Sink calls that failed (records left for retry)
    pub sink_failures: AtomicU64,

    /// Status tokens that mapped to the unmapped sentinel
    pub unmapped_statuses: AtomicU64,

    /// Detection state transitions rejected by the state machine
    pub transitions_rejected: AtomicU64,

    /// Engine start time
    start_time: Instant,
}

impl Metrics {
    /// Create a new Metrics instance
    pub fn new() -> Self {
        Self {
            holes_qualified: AtomicU64::new(0),
            holes_unqualified: AtomicU64::new(0),
            holes_errored: AtomicU64::new(0),
            total_inspection_time_ms: AtomicU64::new(0),
            buffer_flushes_size: AtomicU64::new(0),
            buffer_flushes_interval: AtomicU64::new(0),
            buffer_flushes_manual: AtomicU64::new(0),
            sync_ticks: AtomicU64::new(0),
            records_synced: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            unmapped_statuses: AtomicU64::new(0),
            transitions_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one inspected hole
    pub fn record_hole(&self, result: HoleResult) {
        let counter = match result {
            HoleResult::Qualified => &self.holes_qualified,
            HoleResult::Unqualified => &self.holes_unqualified,
            HoleResult::Error => &self.holes_errored,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record inspection time for a hole
    pub fn record_inspection_time(&self, duration: Duration) {
        self.total_inspection_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_flush_by_size(&self) {
        self.buffer_flushes_size.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_by_interval(&self) {
        self.buffer_flushes_interval.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_manual(&self) {
        self.buffer_flushes_manual.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful sync tick and how many records it marked synced
    pub fn record_sync(&self, records: usize) {
        self.sync_ticks.fetch_add(1, Ordering::Relaxed);
        self.records_synced
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_sink_failure(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmapped_status(&self) {
        self.unmapped_statuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition_rejected(&self) {
        self.transitions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Total holes inspected, whatever the result
    pub fn holes_processed(&self) -> u64 {
        self.holes_qualified.load(Ordering::Relaxed)
            + self.holes_unqualified.load(Ordering::Relaxed)
            + self.holes_errored.load(Ordering::Relaxed)
    }

    /// Get total uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get average inspection time per hole in milliseconds
    pub fn avg_inspection_time_ms(&self) -> f64 {
        let total = self.total_inspection_time_ms.load(Ordering::Relaxed);
        let count = self.holes_processed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        let uptime = self.uptime();
        tracing::info!("=== Engine Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", uptime.as_secs_f64());
        tracing::info!(
            "Holes: {} qualified, {} unqualified, {} errored (avg: {:.2}ms per hole)",
            self.holes_qualified.load(Ordering::Relaxed),
            self.holes_unqualified.load(Ordering::Relaxed),
            self.holes_errored.load(Ordering::Relaxed),
            self.avg_inspection_time_ms()
        );
        tracing::info!(
            "Buffer flushes: {} by size, {} by interval, {} manual",
            self.buffer_flushes_size.load(Ordering::Relaxed),
            self.buffer_flushes_interval.load(Ordering::Relaxed),
            self.buffer_flushes_manual.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Sync: {} ticks, {} records synced, {} sink failures, {} unmapped statuses",
            self.sync_ticks.load(Ordering::Relaxed),
            self.records_synced.load(Ordering::Relaxed),
            self.sink_failures.load(Ordering::Relaxed),
            self.unmapped_statuses.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Rejected transitions: {}",
            self.transitions_rejected.load(Ordering::Relaxed)
        );
    }

    /// Log periodic metrics (for long-running batches)
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} holes processed, {} records synced, {} sink failures, uptime {:.0}s",
            self.holes_processed(),
            self.records_synced.load(Ordering::Relaxed),
            self.sink_failures.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
