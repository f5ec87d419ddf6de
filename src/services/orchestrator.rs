use crate::metrics::Metrics;
use crate::models::{
    Batch, BatchProgress, BatchStatus, DetectionState, DetectionType, EstimatorSettings,
    HoleResult, PausedDetectionState, ProductInput, ProgressUpdate,
};
use crate::services::persistence::{BatchPersistence, PersistenceError};
use crate::services::simulation::WorkerEvent;
use crate::services::sync::UpdateBuffer;
use crate::services::timing::{TimeEstimator, TimeStats};
use crate::state::{BatchStateMachine, TransitionError};
use crate::store::{BatchRepository, ProductCatalog, StoreError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Source tag written with status updates from simulated batches.
pub const SIMULATION_SOURCE: &str = "simulation";

/// Source tag written with status updates from real detection.
pub const DETECTION_SOURCE: &str = "detection";

/// Errors raised by batch lifecycle operations.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Unknown product: {0}")]
    InvalidProduct(String),

    #[error("Batch {0} not found")]
    NotFound(String),

    #[error("Batch {batch_id} cannot go from {from} to {to}")]
    InvalidTransition {
        batch_id: String,
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("Product {product_id} already has an active batch ({active_batch})")]
    ProductBusy {
        product_id: String,
        active_batch: String,
    },

    #[error("Batch {0} is not accepting results")]
    NotAccepting(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Detection state error: {0}")]
    Detection(#[from] TransitionError),
}

/// In-memory companions of a RUNNING or PAUSED batch.
#[derive(Debug)]
struct ActiveRun {
    product_id: String,
    machine: BatchStateMachine,
}

#[derive(Debug, Default)]
struct OrchestratorInner {
    runs: HashMap<String, ActiveRun>,
    /// One estimator per product; history carries over between its batches
    estimators: HashMap<String, TimeEstimator>,
}

/// Batch lifecycle facade.
///
/// Owns every mutation of batch rows and their side-files. All operations
/// take one internal lock, so callers on different threads are serialized.
/// Validation failures are logged and reported as `false`/`None`; only
/// [`create_batch`](Self::create_batch) hands back the error.
pub struct BatchOrchestrator {
    repo: Arc<dyn BatchRepository>,
    catalog: Arc<dyn ProductCatalog>,
    persistence: BatchPersistence,
    buffer: Arc<UpdateBuffer>,
    metrics: Arc<Metrics>,
    estimator_settings: EstimatorSettings,
    inner: Mutex<OrchestratorInner>,
}

impl BatchOrchestrator {
    pub fn new(
        repo: Arc<dyn BatchRepository>,
        catalog: Arc<dyn ProductCatalog>,
        persistence: BatchPersistence,
        buffer: Arc<UpdateBuffer>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            catalog,
            persistence,
            buffer,
            metrics,
            estimator_settings: EstimatorSettings::default(),
            inner: Mutex::new(OrchestratorInner::default()),
        }
    }

    pub fn with_estimator_settings(mut self, settings: EstimatorSettings) -> Self {
        self.estimator_settings = settings;
        self
    }

    pub fn persistence(&self) -> &BatchPersistence {
        &self.persistence
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ========== Lifecycle ==========

    /// Create a PENDING batch for a product.
    ///
    /// The detection number is one more than the highest the product has
    /// used. The batch directory and `batch_info.json` are written before the
    /// row is inserted, and the directory is removed again if either step
    /// fails.
    pub fn create_batch(
        &self,
        product: impl Into<ProductInput>,
        operator: Option<&str>,
        equipment_id: Option<&str>,
        is_mock: bool,
    ) -> Result<Batch, BatchError> {
        let _guard = self.lock();

        let product_id = match product.into() {
            ProductInput::Id(id) => id,
            ProductInput::Product(product) => {
                tracing::warn!(
                    "create_batch received a full product object ({}), using its id",
                    product.name
                );
                product.id
            }
        };
        let product = self
            .catalog
            .resolve(&product_id)
            .ok_or_else(|| BatchError::InvalidProduct(product_id.clone()))?;

        let existing = self.repo.batches_for_product(&product.id)?;
        let mut detection_number = existing
            .iter()
            .map(|b| b.detection_number)
            .max()
            .unwrap_or(0)
            + 1;

        let now = Utc::now();
        let detection_type = DetectionType::from_mock_flag(is_mock);
        let mut batch_id = format_batch_id(&product.name, detection_number, now, is_mock);
        while self.repo.get_batch(&batch_id)?.is_some() {
            detection_number += 1;
            batch_id = format_batch_id(&product.name, detection_number, now, is_mock);
        }

        let data_path = self.persistence.provision(&product.name, &batch_id)?;
        let batch = Batch {
            batch_id,
            product_id: product.id,
            product_name: product.name,
            detection_number,
            detection_type,
            status: BatchStatus::Pending,
            progress: BatchProgress::default(),
            operator: operator.map(str::to_string),
            equipment_id: equipment_id.map(str::to_string),
            description: None,
            created_at: now,
            updated_at: now,
            data_path,
            detection_results: IndexMap::new(),
            pending_holes: Vec::new(),
            simulation_params: None,
        };

        if let Err(e) = self.register(&batch) {
            if let Err(cleanup) = self.persistence.discard(&batch.data_path) {
                tracing::warn!(
                    "Could not remove {} after failed create: {}",
                    batch.data_path,
                    cleanup
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Created batch {} (product {}, detection #{}, {:?})",
            batch.batch_id,
            batch.product_id,
            batch.detection_number,
            batch.detection_type
        );
        Ok(batch)
    }

    fn register(&self, batch: &Batch) -> Result<(), BatchError> {
        self.persistence.write_info(&batch.data_path, &batch.info())?;
        self.repo.insert_batch(batch)?;
        Ok(())
    }

    /// PENDING -> RUNNING.
    pub fn start_batch(&self, batch_id: &str) -> bool {
        let mut inner = self.lock();
        report("start", batch_id, self.try_start(&mut inner, batch_id))
    }

    fn try_start(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
    ) -> Result<(), BatchError> {
        let mut batch = self.load(batch_id)?;
        require_status(&batch, BatchStatus::Pending, BatchStatus::Running)?;

        if let Some(active) = self
            .repo
            .batches_for_product(&batch.product_id)?
            .into_iter()
            .find(|b| b.batch_id != batch.batch_id && b.status.is_active())
        {
            return Err(BatchError::ProductBusy {
                product_id: batch.product_id,
                active_batch: active.batch_id,
            });
        }

        let now = Utc::now();
        batch.status = BatchStatus::Running;
        batch.updated_at = now;
        self.repo.save_batch(&batch)?;

        let machine = self.new_machine(&batch)?;
        let estimator = inner
            .estimators
            .entry(batch.product_id.clone())
            .or_insert_with(|| TimeEstimator::new(self.estimator_settings.clone()));
        estimator.start(batch.progress.total_holes, now);
        estimator.force_sync_progress(batch.progress.completed_holes, batch.progress.total_holes);

        inner.runs.insert(
            batch.batch_id.clone(),
            ActiveRun {
                product_id: batch.product_id.clone(),
                machine,
            },
        );

        tracing::info!("Started batch {}", batch.batch_id);
        Ok(())
    }

    /// RUNNING -> PAUSED, persisting `state` on the row and as a side-file.
    ///
    /// Both writes succeed or neither is visible: a failed row write puts
    /// the previous side-file back.
    pub fn pause_batch(&self, batch_id: &str, state: PausedDetectionState) -> bool {
        let inner = self.lock();
        report("pause", batch_id, self.try_pause(&inner, batch_id, &state))
    }

    fn try_pause(
        &self,
        inner: &OrchestratorInner,
        batch_id: &str,
        state: &PausedDetectionState,
    ) -> Result<(), BatchError> {
        let batch = self.load(batch_id)?;
        check_transition(&batch, BatchStatus::Paused)?;

        let backup = self.persistence.write_snapshot(&batch.data_path, state)?;

        let mut paused = batch.clone();
        paused.status = BatchStatus::Paused;
        paused.absorb_paused_state(state);
        paused.updated_at = Utc::now();

        if let Err(e) = self.repo.save_batch(&paused) {
            if let Err(restore_err) = self.persistence.restore_snapshot(&batch.data_path, backup) {
                tracing::error!(
                    "Failed to roll back snapshot of batch {}: {}",
                    batch_id,
                    restore_err
                );
            }
            return Err(e.into());
        }

        if let Some(run) = inner.runs.get(batch_id)
            && let Err(e) = run.machine.transition(DetectionState::Paused, "batch paused")
        {
            tracing::warn!(
                "Batch {} paused with detection state out of step: {}",
                batch_id,
                e
            );
        }

        tracing::info!(
            "Paused batch {} at index {} ({} results, {} pending)",
            batch_id,
            state.current_index,
            state.detection_results.len(),
            state.pending_holes.len()
        );
        Ok(())
    }

    /// PAUSED -> RUNNING.
    ///
    /// # Returns
    /// The paused state to continue from. The row is authoritative; the
    /// side-file is only read to detect drift and is deleted afterwards.
    pub fn resume_batch(&self, batch_id: &str) -> Option<PausedDetectionState> {
        let mut inner = self.lock();
        match self.try_resume(&mut inner, batch_id) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Cannot resume batch {}: {}", batch_id, e);
                None
            }
        }
    }

    fn try_resume(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
    ) -> Result<PausedDetectionState, BatchError> {
        let mut batch = self.load(batch_id)?;
        require_status(&batch, BatchStatus::Paused, BatchStatus::Running)?;

        let snapshot = match self.persistence.load_snapshot(&batch.data_path) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Ignoring unreadable snapshot of batch {}: {}", batch_id, e);
                None
            }
        };
        let state = reconcile(batch_id, batch.paused_state(), snapshot);

        let now = Utc::now();
        batch.status = BatchStatus::Running;
        batch.absorb_paused_state(&state);
        batch.updated_at = now;
        self.repo.save_batch(&batch)?;

        if let Err(e) = self.persistence.remove_snapshot(&batch.data_path) {
            tracing::warn!("Could not remove snapshot of batch {}: {}", batch_id, e);
        }

        match inner.runs.get(batch_id) {
            Some(run) => {
                if let Err(e) = run
                    .machine
                    .transition(DetectionState::Detecting, "batch resumed")
                {
                    tracing::warn!(
                        "Batch {} resumed with detection state out of step: {}",
                        batch_id,
                        e
                    );
                }
            }
            None => {
                // Paused in an earlier process
                let machine = self.new_machine(&batch)?;
                inner.runs.insert(
                    batch.batch_id.clone(),
                    ActiveRun {
                        product_id: batch.product_id.clone(),
                        machine,
                    },
                );
            }
        }

        inner
            .estimators
            .entry(batch.product_id.clone())
            .or_insert_with(|| TimeEstimator::new(self.estimator_settings.clone()))
            .reseed(batch.progress.completed_holes, batch.progress.total_holes, now);

        tracing::info!(
            "Resumed batch {} at index {} ({}/{} holes done)",
            batch_id,
            state.current_index,
            batch.progress.completed_holes,
            batch.progress.total_holes
        );
        Ok(state)
    }

    /// Retire a batch as TERMINATED and write its summary.
    ///
    /// Terminating an already terminated batch is a no-op that succeeds.
    pub fn terminate_batch(&self, batch_id: &str) -> bool {
        let mut inner = self.lock();
        report("terminate", batch_id, self.try_terminate(&mut inner, batch_id))
    }

    fn try_terminate(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
    ) -> Result<(), BatchError> {
        let mut batch = self.load(batch_id)?;
        if batch.status == BatchStatus::Terminated {
            tracing::debug!("Batch {} already terminated", batch_id);
            return Ok(());
        }
        check_transition(&batch, BatchStatus::Terminated)?;

        batch.status = BatchStatus::Terminated;
        batch.updated_at = Utc::now();
        self.repo.save_batch(&batch)?;
        self.write_summary(&batch);

        if let Some(run) = inner.runs.remove(batch_id)
            && run.machine.current().is_active()
        {
            let stopped = run
                .machine
                .transition(DetectionState::Stopping, "batch terminated")
                .and_then(|_| run.machine.transition(DetectionState::Idle, "batch terminated"));
            if stopped.is_err() {
                run.machine.reset("batch terminated");
            }
        }
        if let Err(e) = self.persistence.remove_snapshot(&batch.data_path) {
            tracing::warn!("Could not remove snapshot of batch {}: {}", batch_id, e);
        }

        tracing::info!(
            "Terminated batch {} ({}/{} holes inspected)",
            batch_id,
            batch.progress.completed_holes,
            batch.progress.total_holes
        );
        Ok(())
    }

    /// RUNNING -> COMPLETED, writing the final summary.
    pub fn complete_batch(&self, batch_id: &str) -> bool {
        let mut inner = self.lock();
        report("complete", batch_id, self.try_complete(&mut inner, batch_id))
    }

    fn try_complete(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
    ) -> Result<(), BatchError> {
        let mut batch = self.load(batch_id)?;
        check_transition(&batch, BatchStatus::Completed)?;

        let now = Utc::now();
        batch.status = BatchStatus::Completed;
        batch.updated_at = now;
        self.repo.save_batch(&batch)?;
        self.write_summary(&batch);

        if let Some(run) = inner.runs.remove(batch_id) {
            if let Err(e) = run
                .machine
                .transition(DetectionState::Completed, "batch completed")
            {
                tracing::warn!(
                    "Batch {} completed with detection state out of step: {}",
                    batch_id,
                    e
                );
            }
            if let Some(estimator) = inner.estimators.get_mut(&run.product_id) {
                estimator.finish_task(now);
            }
        }

        tracing::info!(
            "Completed batch {}: {}/{} qualified ({:.2}%)",
            batch_id,
            batch.progress.qualified_holes,
            batch.progress.completed_holes,
            batch.progress.qualification_rate()
        );
        Ok(())
    }

    /// Overwrite the supplied progress counters and refresh `summary.json`.
    pub fn update_progress(&self, batch_id: &str, update: ProgressUpdate) -> bool {
        let mut inner = self.lock();
        report(
            "update progress of",
            batch_id,
            self.try_update_progress(&mut inner, batch_id, &update),
        )
    }

    fn try_update_progress(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
        update: &ProgressUpdate,
    ) -> Result<(), BatchError> {
        let mut batch = self.load(batch_id)?;
        if batch.status.is_final() {
            return Err(BatchError::NotAccepting(batch_id.to_string()));
        }

        update.apply_to(&mut batch.progress);
        batch.updated_at = Utc::now();
        self.repo.save_batch(&batch)?;
        self.persistence
            .write_summary(&batch.data_path, &batch.summary())?;

        if (update.completed_holes.is_some() || update.total_holes.is_some())
            && let Some(run) = inner.runs.get(batch_id)
            && let Some(estimator) = inner.estimators.get_mut(&run.product_id)
        {
            estimator
                .force_sync_progress(batch.progress.completed_holes, batch.progress.total_holes);
        }
        Ok(())
    }

    // ========== Worker integration ==========

    /// Apply one finished hole to a running batch.
    ///
    /// Updates the counters and per-hole results on the row, feeds the time
    /// estimator and writes the hole's status through the update buffer. A
    /// hole already recorded for this batch is ignored.
    pub fn record_hole_result(
        &self,
        batch_id: &str,
        hole_id: &str,
        result: HoleResult,
        at: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.lock();
        report(
            "record result for",
            batch_id,
            self.try_record_hole(&mut inner, batch_id, hole_id, result, at),
        )
    }

    fn try_record_hole(
        &self,
        inner: &mut OrchestratorInner,
        batch_id: &str,
        hole_id: &str,
        result: HoleResult,
        at: DateTime<Utc>,
    ) -> Result<(), BatchError> {
        let mut batch = self.load(batch_id)?;
        if batch.status != BatchStatus::Running {
            return Err(BatchError::NotAccepting(batch_id.to_string()));
        }
        if batch.detection_results.contains_key(hole_id) {
            tracing::debug!("Hole {} already recorded for batch {}", hole_id, batch_id);
            return Ok(());
        }

        let progress = &mut batch.progress;
        progress.completed_holes += 1;
        progress.current_index += 1;
        if result.is_qualified() {
            progress.qualified_holes += 1;
        } else {
            progress.defective_holes += 1;
        }
        if progress.completed_holes > progress.total_holes {
            progress.total_holes = progress.completed_holes;
        }
        batch
            .detection_results
            .insert(hole_id.to_string(), result.as_str().to_string());
        batch.pending_holes.retain(|pending| pending != hole_id);
        batch.updated_at = at;
        self.repo.save_batch(&batch)?;

        self.metrics.record_hole(result);
        if let Some(run) = inner.runs.get(batch_id)
            && let Some(estimator) = inner.estimators.get_mut(&run.product_id)
        {
            estimator.record_completion(hole_id, at);
        }

        let source = if batch.is_mock() {
            SIMULATION_SOURCE
        } else {
            DETECTION_SOURCE
        };
        if let Err(e) = self.buffer.add_update(hole_id, result.status_token(), source) {
            tracing::warn!("Status update for hole {} not recorded: {}", hole_id, e);
        }
        Ok(())
    }

    /// Consume a worker's events until it finishes or stops.
    ///
    /// Row writes happen on the blocking pool, one event at a time and in
    /// arrival order, so the runtime threads never wait on disk I/O.
    ///
    /// # Returns
    /// `true` if the worker finished and the batch was completed
    pub async fn drive(
        self: &Arc<Self>,
        batch_id: &str,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) -> bool {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::HoleCompleted {
                    hole_id,
                    result,
                    elapsed,
                    at,
                    ..
                } => {
                    self.metrics.record_inspection_time(elapsed);
                    let id = batch_id.to_string();
                    self.run_blocking(move |this| this.record_hole_result(&id, &hole_id, result, at))
                        .await;
                }
                WorkerEvent::BatchCompleted { completed, total } => {
                    tracing::debug!("Batch {}: {}/{} holes", batch_id, completed, total);
                    self.metrics.log_periodic();
                }
                WorkerEvent::Finished { completed } => {
                    tracing::info!("Worker finished batch {} ({} holes)", batch_id, completed);
                    let id = batch_id.to_string();
                    return self.run_blocking(move |this| this.complete_batch(&id)).await;
                }
                WorkerEvent::Stopped { index } => {
                    tracing::info!("Worker for batch {} stopped at {}", batch_id, index);
                    return false;
                }
            }
        }
        false
    }

    async fn run_blocking<F>(self: &Arc<Self>, op: F) -> bool
    where
        F: FnOnce(&BatchOrchestrator) -> bool + Send + 'static,
    {
        let this = Arc::clone(self);
        match tokio::task::spawn_blocking(move || op(&this)).await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("Batch operation task failed: {}", e);
                false
            }
        }
    }

    // ========== Queries ==========

    /// The PAUSED batch of `product_id` with a matching detection type, if any.
    pub fn get_resumable_batch(&self, product_id: &str, is_mock: bool) -> Option<Batch> {
        let _guard = self.lock();
        let batches = match self.repo.batches_for_product(product_id) {
            Ok(batches) => batches,
            Err(e) => {
                tracing::error!("Failed to list batches of product {}: {}", product_id, e);
                return None;
            }
        };

        let mut paused = batches
            .into_iter()
            .filter(|b| b.status == BatchStatus::Paused && b.is_mock() == is_mock);
        let resumable = paused.next();
        if let Some(extra) = paused.next() {
            tracing::warn!(
                "Product {} has more than one paused batch (also {})",
                product_id,
                extra.batch_id
            );
        }
        resumable
    }

    pub fn get_batch(&self, batch_id: &str) -> Option<Batch> {
        let _guard = self.lock();
        self.repo.get_batch(batch_id).ok().flatten()
    }

    pub fn list_batches(&self, product_id: &str) -> Vec<Batch> {
        let _guard = self.lock();
        self.repo.batches_for_product(product_id).unwrap_or_default()
    }

    /// Time figures of a RUNNING or PAUSED batch.
    pub fn time_stats(&self, batch_id: &str) -> Option<TimeStats> {
        let inner = self.lock();
        let run = inner.runs.get(batch_id)?;
        inner
            .estimators
            .get(&run.product_id)
            .map(|estimator| estimator.stats(Utc::now()))
    }

    /// Detection state of a RUNNING or PAUSED batch.
    pub fn detection_state(&self, batch_id: &str) -> Option<DetectionState> {
        self.lock().runs.get(batch_id).map(|run| run.machine.current())
    }

    /// Handle on the batch's state machine, for observers and subscribers.
    pub fn state_machine(&self, batch_id: &str) -> Option<BatchStateMachine> {
        self.lock().runs.get(batch_id).map(|run| run.machine.clone())
    }

    // ========== Helpers ==========

    fn load(&self, batch_id: &str) -> Result<Batch, BatchError> {
        self.repo
            .get_batch(batch_id)?
            .ok_or_else(|| BatchError::NotFound(batch_id.to_string()))
    }

    fn new_machine(&self, batch: &Batch) -> Result<BatchStateMachine, BatchError> {
        let machine = BatchStateMachine::new().with_metrics(self.metrics.clone());
        machine.transition(DetectionState::Preparing, "batch started")?;
        machine.transition(DetectionState::Detecting, "batch started")?;
        if batch.status == BatchStatus::Paused {
            machine.transition(DetectionState::Paused, "batch paused")?;
        }
        Ok(machine)
    }

    /// Summaries are derived data; a failed write is logged, not fatal.
    fn write_summary(&self, batch: &Batch) {
        if let Err(e) = self.persistence.write_summary(&batch.data_path, &batch.summary()) {
            tracing::error!("Failed to write summary of batch {}: {}", batch.batch_id, e);
        }
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("data_root", &self.persistence.data_root())
            .field("active_runs", &self.lock().runs.len())
            .finish()
    }
}

/// `{product_name}_检测{number:03}_{YYYYMMDD_HHMMSS}`, plus `_MOCK` for
/// simulated batches.
pub fn format_batch_id(
    product_name: &str,
    detection_number: u32,
    at: DateTime<Utc>,
    is_mock: bool,
) -> String {
    format!(
        "{}_检测{:03}_{}{}",
        product_name,
        detection_number,
        at.format("%Y%m%d_%H%M%S"),
        if is_mock { "_MOCK" } else { "" }
    )
}

fn check_transition(batch: &Batch, to: BatchStatus) -> Result<(), BatchError> {
    if batch.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(BatchError::InvalidTransition {
            batch_id: batch.batch_id.clone(),
            from: batch.status,
            to,
        })
    }
}

/// Like [`check_transition`], but only from one specific status (PAUSED and
/// PENDING both lead to RUNNING through different operations).
fn require_status(batch: &Batch, from: BatchStatus, to: BatchStatus) -> Result<(), BatchError> {
    if batch.status == from {
        check_transition(batch, to)
    } else {
        Err(BatchError::InvalidTransition {
            batch_id: batch.batch_id.clone(),
            from: batch.status,
            to,
        })
    }
}

/// Pick the paused state to resume from.
///
/// The row wins whenever it carries paused data; the side-file is only used
/// for rows written before the paused fields existed.
fn reconcile(
    batch_id: &str,
    aggregate: PausedDetectionState,
    snapshot: Option<PausedDetectionState>,
) -> PausedDetectionState {
    match snapshot {
        None => {
            tracing::info!("No snapshot for batch {}, resuming from the batch row", batch_id);
            aggregate
        }
        Some(snapshot) if aggregate == PausedDetectionState::default() => snapshot,
        Some(snapshot) if snapshot != aggregate => {
            tracing::warn!(
                "Snapshot of batch {} disagrees with the batch row (index {} vs {}), using the row",
                batch_id,
                snapshot.current_index,
                aggregate.current_index
            );
            aggregate
        }
        Some(_) => aggregate,
    }
}

fn report(action: &str, batch_id: &str, result: Result<(), BatchError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e @ (BatchError::Persistence(_) | BatchError::Store(_))) => {
            tracing::error!("Failed to {} batch {}: {}", action, batch_id, e);
            false
        }
        Err(e) => {
            tracing::warn!("Cannot {} batch {}: {}", action, batch_id, e);
            false
        }
    }
}
