use crate::models::EstimatorSettings;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Elapsed/remaining time figures for progress reporting.
///
/// Derived from the completion history; recomputable at any time and never
/// persisted as ground truth.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStats {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub completed_count: usize,
    pub total_count: usize,
    pub elapsed: Duration,
    pub average_time_per_hole: Duration,
    pub estimated_total_time: Duration,
    pub remaining_time: Duration,
}

/// Rolling-window time estimator for one batch at a time.
///
/// Per-hole durations are the gaps between consecutive completion
/// timestamps (the first one measured from [`start`](Self::start)). The
/// average is the mean of the last `window_size` durations. Averages of
/// finished tasks are kept in a FIFO history; while the current task has few
/// samples the estimate leans on that history (`historical_weight` of it).
#[derive(Debug, Clone)]
pub struct TimeEstimator {
    settings: EstimatorSettings,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    last_completion: Option<DateTime<Utc>>,
    completed_count: usize,
    total_count: usize,
    window: VecDeque<Duration>,
    history: VecDeque<Duration>,
}

impl TimeEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self {
            window: VecDeque::with_capacity(settings.window_size),
            history: VecDeque::with_capacity(settings.history_capacity),
            settings,
            start_time: None,
            end_time: None,
            last_completion: None,
            completed_count: 0,
            total_count: 0,
        }
    }

    /// Begin timing a task of `total` items. History from earlier tasks is kept.
    pub fn start(&mut self, total: usize, at: DateTime<Utc>) {
        self.start_time = Some(at);
        self.reseed(0, total, at);
    }

    /// Restart timing from persisted counters (e.g. after a resume).
    ///
    /// The paused interval is not counted: the next duration is measured
    /// from `at`.
    pub fn reseed(&mut self, completed: usize, total: usize, at: DateTime<Utc>) {
        self.start_time.get_or_insert(at);
        self.end_time = None;
        self.last_completion = Some(at);
        self.completed_count = completed;
        self.total_count = total;
        self.window.clear();
    }

    /// Record that one item finished at `at`.
    pub fn record_completion(&mut self, hole_id: &str, at: DateTime<Utc>) {
        let previous = self.last_completion.or(self.start_time).unwrap_or(at);
        let duration = (at - previous).to_std().unwrap_or(Duration::ZERO);

        if self.window.len() == self.settings.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(duration);

        self.start_time.get_or_insert(previous);
        self.last_completion = Some(at);
        self.completed_count += 1;
        if self.completed_count > self.total_count {
            self.total_count = self.completed_count;
        }

        tracing::debug!(
            "Hole {} took {:.3}s ({}/{})",
            hole_id,
            duration.as_secs_f64(),
            self.completed_count,
            self.total_count
        );
    }

    /// Close the current task and archive its average.
    pub fn finish_task(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
        if let Some(average) = mean(&self.window) {
            if self.history.len() == self.settings.history_capacity.max(1) {
                self.history.pop_front();
            }
            self.history.push_back(average);
            tracing::debug!(
                "Archived task average {:.3}s ({} in history)",
                average.as_secs_f64(),
                self.history.len()
            );
        }
    }

    /// Overwrite the counters with authoritative values.
    ///
    /// # Returns
    /// `true` if the counters had drifted and were corrected
    pub fn force_sync_progress(&mut self, completed: usize, total: usize) -> bool {
        if self.completed_count == completed && self.total_count == total {
            return false;
        }

        tracing::info!(
            "Estimator progress corrected: completed {} -> {} ({:+}), total {} -> {} ({:+})",
            self.completed_count,
            completed,
            completed as i64 - self.completed_count as i64,
            self.total_count,
            total,
            total as i64 - self.total_count as i64
        );
        self.completed_count = completed;
        self.total_count = total;
        true
    }

    /// Current average time per item.
    pub fn average_time_per_hole(&self) -> Duration {
        let current = mean(&self.window);
        let historical = mean(&self.history);

        match (current, historical) {
            (Some(current), Some(historical))
                if self.window.len() < self.settings.early_sample_threshold =>
            {
                let weight = self.settings.historical_weight.clamp(0.0, 1.0);
                historical.mul_f64(weight) + current.mul_f64(1.0 - weight)
            }
            (Some(current), _) => current,
            (None, Some(historical)) => historical,
            (None, None) => Duration::ZERO,
        }
    }

    pub fn remaining_time(&self) -> Duration {
        let remaining_items = self.total_count.saturating_sub(self.completed_count);
        self.average_time_per_hole().mul_f64(remaining_items as f64)
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn total_count(&self) -> usize {
        self.total_count
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> TimeStats {
        let average = self.average_time_per_hole();
        let elapsed = self
            .start_time
            .map(|start| {
                (self.end_time.unwrap_or(now) - start)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(Duration::ZERO);

        TimeStats {
            start_time: self.start_time,
            end_time: self.end_time,
            completed_count: self.completed_count,
            total_count: self.total_count,
            elapsed,
            average_time_per_hole: average,
            estimated_total_time: average.mul_f64(self.total_count as f64),
            remaining_time: self.remaining_time(),
        }
    }
}

fn mean(samples: &VecDeque<Duration>) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let total: Duration = samples.iter().sum();
    Some(total / samples.len() as u32)
}
