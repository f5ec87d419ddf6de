use crate::models::{HoleResult, PausedDetectionState, SimulationConfig};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// How long [`SimulationWorker::stop`] waits before aborting the task.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long pause/resume wait for the worker to acknowledge.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Requested run state, sent to the worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerControl {
    Run,
    Pause,
    Stop,
}

/// Run state reported back by the worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Paused,
    Stopped,
    Finished,
}

/// Events emitted by a running worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    HoleCompleted {
        index: usize,
        hole_id: String,
        result: HoleResult,
        elapsed: Duration,
        at: DateTime<Utc>,
    },
    /// Emitted every `batch_size` holes.
    BatchCompleted { completed: usize, total: usize },
    /// Every item was processed.
    Finished { completed: usize },
    /// The worker was stopped before the end.
    Stopped { index: usize },
}

#[derive(Debug, Default)]
struct WorkerProgress {
    /// Next item to process, relative to the worker's item list
    next: usize,
    results: IndexMap<String, String>,
}

/// Synthetic inspection driver for mock batches.
///
/// Walks an ordered list of hole ids on a tokio task, sleeping a configurable
/// (optionally jittered and degrading) delay per hole and drawing a result for
/// each. Results are reported as [`WorkerEvent`]s on an unbounded channel.
pub struct SimulationWorker {
    config: SimulationConfig,
    items: Arc<Vec<String>>,
    /// Global index of `items[0]`
    offset: usize,
    progress: Arc<Mutex<WorkerProgress>>,
    control_tx: watch::Sender<WorkerControl>,
    status_rx: watch::Receiver<WorkerStatus>,
    task: Option<JoinHandle<()>>,
}

impl SimulationWorker {
    /// Start a worker over `items`, beginning at `start_index`.
    pub fn spawn(
        config: SimulationConfig,
        items: Vec<String>,
        start_index: usize,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let start = start_index.min(items.len());
        Self::launch(config, items, 0, start, IndexMap::new())
    }

    /// Continue from a paused snapshot: the pending holes are processed,
    /// earlier results are carried over.
    pub fn resume_from(
        config: SimulationConfig,
        state: &PausedDetectionState,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        Self::launch(
            config,
            state.pending_holes.clone(),
            state.current_index,
            0,
            state.detection_results.clone(),
        )
    }

    fn launch(
        config: SimulationConfig,
        items: Vec<String>,
        offset: usize,
        start: usize,
        results: IndexMap<String, String>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = watch::channel(WorkerControl::Run);
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Running);

        let items = Arc::new(items);
        let progress = Arc::new(Mutex::new(WorkerProgress {
            next: start,
            results,
        }));

        tracing::info!(
            "Simulation worker starting at {} ({} items, interval {}ms, error rate {}, unqualified rate {})",
            offset + start,
            items.len(),
            config.interval_ms,
            config.error_rate,
            config.unqualified_rate
        );

        let run = WorkerRun {
            config: config.clone(),
            items: items.clone(),
            offset,
            progress: progress.clone(),
            control_rx,
            status_tx,
            events_tx,
        };
        let task = tokio::spawn(run.run());

        let worker = Self {
            config,
            items,
            offset,
            progress,
            control_tx,
            status_rx,
            task: Some(task),
        };
        (worker, events_rx)
    }

    fn lock_progress(&self) -> MutexGuard<'_, WorkerProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status_rx.borrow()
    }

    /// Ask the worker to pause and wait until it has parked.
    ///
    /// Once this returns `true` no further hole events will be emitted until
    /// [`resume`](Self::resume), so [`snapshot`](Self::snapshot) is exact.
    pub async fn pause(&self) -> bool {
        if self.task.is_none() {
            return false;
        }
        self.control_tx.send_replace(WorkerControl::Pause);
        self.wait_status(|status| status != WorkerStatus::Running).await
    }

    /// Let a paused worker continue.
    pub async fn resume(&self) -> bool {
        if self.task.is_none() {
            return false;
        }
        self.control_tx.send_replace(WorkerControl::Run);
        self.wait_status(|status| status != WorkerStatus::Paused).await
    }

    async fn wait_status(&self, done: impl Fn(WorkerStatus) -> bool) -> bool {
        let mut status_rx = self.status_rx.clone();
        match tokio::time::timeout(ACK_TIMEOUT, status_rx.wait_for(|s| done(*s))).await {
            Ok(Ok(_)) => true,
            Ok(Err(_)) => {
                // Task gone; whatever it left behind is final
                true
            }
            Err(_) => {
                tracing::warn!("Simulation worker did not acknowledge within {:?}", ACK_TIMEOUT);
                false
            }
        }
    }

    /// Stop the worker and wait for it to exit (bounded). Stopping twice is a
    /// no-op.
    pub async fn stop(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };

        self.control_tx.send_replace(WorkerControl::Stop);
        match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(Ok(())) => tracing::debug!("Simulation worker stopped"),
            Ok(Err(e)) => tracing::error!("Simulation worker task failed: {}", e),
            Err(_) => {
                tracing::warn!("Simulation worker did not stop within {:?}, aborting", STOP_TIMEOUT);
                task.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Progress so far, in the shape a paused batch persists.
    pub fn snapshot(&self) -> PausedDetectionState {
        let progress = self.lock_progress();
        PausedDetectionState {
            current_index: self.offset + progress.next,
            detection_results: progress.results.clone(),
            pending_holes: self.items[progress.next..].to_vec(),
            simulation_params: serde_json::to_value(&self.config).ok(),
        }
    }
}

impl std::fmt::Debug for SimulationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationWorker")
            .field("items", &self.items.len())
            .field("offset", &self.offset)
            .field("status", &self.status())
            .finish()
    }
}

struct WorkerRun {
    config: SimulationConfig,
    items: Arc<Vec<String>>,
    offset: usize,
    progress: Arc<Mutex<WorkerProgress>>,
    control_rx: watch::Receiver<WorkerControl>,
    status_tx: watch::Sender<WorkerStatus>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerRun {
    async fn run(mut self) {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let total = self.offset + self.items.len();

        loop {
            let next = self.progress.lock().unwrap_or_else(PoisonError::into_inner).next;
            if next >= self.items.len() {
                tracing::info!("Simulation finished ({} items)", total);
                self.status_tx.send_replace(WorkerStatus::Finished);
                let _ = self.events_tx.send(WorkerEvent::Finished { completed: total });
                return;
            }

            if !self.wait_until_running().await {
                self.report_stopped(next);
                return;
            }

            let fraction = (self.offset + next) as f64 / total.max(1) as f64;
            let delay = item_delay(&self.config, &mut rng, fraction);
            let started = Instant::now();

            let interrupted = tokio::select! {
                _ = tokio::time::sleep(delay) => None,
                changed = self.control_rx.changed() => Some(changed.is_ok()),
            };
            match interrupted {
                None => {}
                // Re-check the control value; the item is retried from scratch
                Some(true) => continue,
                Some(false) => {
                    self.report_stopped(next);
                    return;
                }
            }

            let (error_rate, unqualified_rate) = effective_rates(&self.config, fraction);
            let result = classify(rng.random::<f64>(), error_rate, unqualified_rate);
            let hole_id = self.items[next].clone();

            {
                let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
                progress.results.insert(hole_id.clone(), result.as_str().to_string());
                progress.next = next + 1;
            }

            let index = self.offset + next;
            tracing::debug!("Simulated {} -> {}", hole_id, result);
            let _ = self.events_tx.send(WorkerEvent::HoleCompleted {
                index,
                hole_id,
                result,
                elapsed: started.elapsed(),
                at: Utc::now(),
            });

            let completed = index + 1;
            if self.config.batch_size > 0 && completed % self.config.batch_size == 0 {
                let _ = self
                    .events_tx
                    .send(WorkerEvent::BatchCompleted { completed, total });
            }
        }
    }

    fn report_stopped(&self, next: usize) {
        tracing::info!("Simulation stopped at {}", self.offset + next);
        self.status_tx.send_replace(WorkerStatus::Stopped);
        let _ = self.events_tx.send(WorkerEvent::Stopped {
            index: self.offset + next,
        });
    }

    /// Block while paused.
    ///
    /// # Returns
    /// `false` if the worker should stop
    async fn wait_until_running(&mut self) -> bool {
        loop {
            let control = *self.control_rx.borrow_and_update();
            match control {
                WorkerControl::Run => {
                    self.status_tx.send_replace(WorkerStatus::Running);
                    return true;
                }
                WorkerControl::Stop => return false,
                WorkerControl::Pause => {
                    if *self.status_tx.borrow() != WorkerStatus::Paused {
                        tracing::info!("Simulation paused");
                        self.status_tx.send_replace(WorkerStatus::Paused);
                    }
                    // Sender gone means nobody can resume us
                    if self.control_rx.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

/// Map a uniform draw in `[0, 1)` to a result using cumulative thresholds.
pub fn classify(draw: f64, error_rate: f64, unqualified_rate: f64) -> HoleResult {
    if draw < error_rate {
        HoleResult::Error
    } else if draw < error_rate + unqualified_rate {
        HoleResult::Unqualified
    } else {
        HoleResult::Qualified
    }
}

/// Error and unqualified rates at `fraction` of the run, clamped to `[0, 1]`.
pub fn effective_rates(config: &SimulationConfig, fraction: f64) -> (f64, f64) {
    let (error_growth, unqualified_growth) = config
        .degradation
        .as_ref()
        .map(|d| (d.error_rate_growth, d.unqualified_rate_growth))
        .unwrap_or((0.0, 0.0));

    let error_rate = (config.error_rate * (1.0 + error_growth * fraction)).clamp(0.0, 1.0);
    let unqualified_rate =
        (config.unqualified_rate * (1.0 + unqualified_growth * fraction)).clamp(0.0, 1.0);
    (error_rate, unqualified_rate)
}

fn item_delay(config: &SimulationConfig, rng: &mut StdRng, fraction: f64) -> Duration {
    let jitter = if config.max_random_delay_ms > config.min_random_delay_ms {
        rng.random_range(config.min_random_delay_ms..=config.max_random_delay_ms)
    } else {
        config.min_random_delay_ms
    };
    let growth = config
        .degradation
        .as_ref()
        .map(|d| d.delay_growth)
        .unwrap_or(0.0);

    let base = Duration::from_millis(config.interval_ms + jitter);
    base.mul_f64((1.0 + growth * fraction).max(0.0))
}
