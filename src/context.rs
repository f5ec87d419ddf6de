// Engine context
//
// Owns the long-lived components of the inspection engine and their
// background tasks. Created once at startup and torn down with shutdown().

use crate::metrics::Metrics;
use crate::models::EngineConfig;
use crate::services::{BatchOrchestrator, BatchPersistence, SyncHandle, SyncManager, UpdateBuffer};
use crate::store::{InMemoryStatusStore, JsonBatchRepository, ProductCatalog, StatusStore};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background tasks started by [`EngineContext::start`].
#[derive(Debug)]
struct Background {
    sync: SyncHandle,
    flush_shutdown: watch::Sender<bool>,
    flush_task: JoinHandle<()>,
}

/// Wiring of store, buffer, sync manager and orchestrator.
pub struct EngineContext {
    config: EngineConfig,
    metrics: Arc<Metrics>,
    status_store: Arc<dyn StatusStore>,
    buffer: Arc<UpdateBuffer>,
    sync: Arc<SyncManager>,
    orchestrator: Arc<BatchOrchestrator>,
    background: Option<Background>,
}

impl EngineContext {
    /// Build the engine with an in-memory status store.
    ///
    /// Fails if the data root cannot be created or the batch table cannot be
    /// opened; the engine is unusable without them.
    pub fn bootstrap(config: EngineConfig, catalog: Arc<dyn ProductCatalog>) -> Result<Self> {
        Self::bootstrap_with_store(config, catalog, Arc::new(InMemoryStatusStore::new()))
    }

    /// Build the engine over an existing status store.
    pub fn bootstrap_with_store(
        config: EngineConfig,
        catalog: Arc<dyn ProductCatalog>,
        status_store: Arc<dyn StatusStore>,
    ) -> Result<Self> {
        let data_root = Utf8PathBuf::from(&config.storage.data_root);
        fs::create_dir_all(&data_root)
            .with_context(|| format!("Failed to create data root: {}", data_root))?;

        let repo = JsonBatchRepository::open(&data_root)
            .with_context(|| format!("Failed to open batch table in {}", data_root))?;
        tracing::info!("Batch table opened at {}", repo.path());

        let metrics = Arc::new(Metrics::new());
        let buffer = Arc::new(UpdateBuffer::from_settings(
            status_store.clone(),
            &config.sync,
            metrics.clone(),
        ));
        let sync = Arc::new(SyncManager::new(
            status_store.clone(),
            config.sync.interval(),
            metrics.clone(),
        ));
        let orchestrator = Arc::new(
            BatchOrchestrator::new(
                Arc::new(repo),
                catalog,
                BatchPersistence::new(data_root),
                buffer.clone(),
                metrics.clone(),
            )
            .with_estimator_settings(config.estimator.clone()),
        );

        Ok(Self {
            config,
            metrics,
            status_store,
            buffer,
            sync,
            orchestrator,
            background: None,
        })
    }

    /// Spawn the sync loop and the buffer flush timer. Must be called from
    /// within a tokio runtime; calling it twice is a no-op.
    pub fn start(&mut self) {
        if self.background.is_some() {
            return;
        }

        let (flush_shutdown, flush_rx) = watch::channel(false);
        let flush_task = UpdateBuffer::spawn_flush_timer(self.buffer.clone(), flush_rx);
        let sync = self.sync.start();

        tracing::info!(
            "Engine started (sync every {:?}, buffer size {}, flush interval {:?})",
            self.config.sync.interval(),
            self.config.sync.buffer_size,
            self.config.sync.flush_interval()
        );
        self.background = Some(Background {
            sync,
            flush_shutdown,
            flush_task,
        });
    }

    pub fn is_started(&self) -> bool {
        self.background.is_some()
    }

    /// Flush pending updates, stop background tasks and log the metrics
    /// summary.
    pub async fn shutdown(&mut self) {
        let flushed = self.buffer.flush();
        if flushed > 0 {
            tracing::debug!("Flushed {} buffered updates on shutdown", flushed);
        }

        if let Some(mut background) = self.background.take() {
            let _ = background.flush_shutdown.send(true);
            if let Err(e) = background.flush_task.await {
                tracing::error!("Flush timer task failed: {}", e);
            }
            // The sync loop drains once more before exiting
            background.sync.stop().await;
        }

        self.metrics.log_summary();
        tracing::info!("Engine shut down");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn status_store(&self) -> &Arc<dyn StatusStore> {
        &self.status_store
    }

    pub fn update_buffer(&self) -> &Arc<UpdateBuffer> {
        &self.buffer
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync
    }

    pub fn orchestrator(&self) -> &Arc<BatchOrchestrator> {
        &self.orchestrator
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("data_root", &self.config.storage.data_root)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
