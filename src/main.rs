//! holeinspect - headless inspection run
//!
//! Main entry point for the command-line demo.
//!
//! # Overview
//!
//! The binary wires the engine exactly as an embedding application would and
//! drives one simulated batch through its whole lifecycle:
//! - Logging infrastructure (file rotation + console output)
//! - Tokio async runtime (4 worker threads)
//! - Configuration loading ([`ConfigManager`])
//! - Engine wiring ([`EngineContext`]: status store, update buffer, sync
//!   manager, orchestrator)
//!
//! # Execution Flow
//!
//! 1. Load `config/holeinspect.yaml` (plus `HOLEINSPECT__*` overrides)
//! 2. Initialize logging -> logs/holeinspect.<date>
//! 3. Bootstrap the engine and register a logging display sink
//! 4. Resume the demo product's paused mock batch, or create a new one
//! 5. Run the simulation; pause and resume once halfway through
//! 6. Complete the batch, shut down and log the metrics summary

use anyhow::{Context, Result};
use holeinspect::models::{HoleStatus, ProductRef, ProgressUpdate};
use holeinspect::services::{DisplaySink, SimulationWorker, SinkError, WorkerEvent};
use holeinspect::store::StaticCatalog;
use holeinspect::{APP_NAME, BatchOrchestrator, ConfigManager, EngineConfig, EngineContext, VERSION};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEMO_PRODUCT_ID: &str = "DEMO-001";
const DEMO_PRODUCT_NAME: &str = "CAP1000";
const DEMO_HOLE_COUNT: usize = 40;

/// Display sink that writes each sync batch to the log.
struct LoggingSink;

impl DisplaySink for LoggingSink {
    fn batch_update_hole_status(
        &self,
        updates: &IndexMap<String, HoleStatus>,
    ) -> std::result::Result<(), SinkError> {
        let defective = updates
            .values()
            .filter(|status| **status == HoleStatus::Defective)
            .count();
        tracing::info!(
            "Display update: {} holes ({} defective)",
            updates.len(),
            defective
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    let config_manager = ConfigManager::new("config")?;
    let config = config_manager.load_engine_config()?;

    let _log_guard = holeinspect::logging::setup_logging(&config.logging)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("holeinspect-worker")
        .build()?;

    let result = runtime.block_on(run(config));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result
}

async fn run(config: EngineConfig) -> Result<()> {
    let catalog = Arc::new(StaticCatalog::with_products([ProductRef::new(
        DEMO_PRODUCT_ID,
        DEMO_PRODUCT_NAME,
    )]));
    let simulation = config.simulation.clone();

    let mut context = EngineContext::bootstrap(config, catalog)?;
    context.sync_manager().set_sink(Arc::new(LoggingSink));
    context.start();

    let orchestrator = context.orchestrator().clone();
    let completed = match orchestrator.get_resumable_batch(DEMO_PRODUCT_ID, true) {
        Some(batch) => {
            tracing::info!("Found paused batch {}, resuming", batch.batch_id);
            let state = orchestrator
                .resume_batch(&batch.batch_id)
                .with_context(|| format!("Failed to resume batch {}", batch.batch_id))?;

            let (mut worker, events) = SimulationWorker::resume_from(simulation, &state);
            let completed = orchestrator.drive(&batch.batch_id, events).await;
            worker.stop().await;
            completed
        }
        None => run_new_batch(&orchestrator, simulation).await?,
    };

    if completed {
        tracing::info!("Demo batch completed");
    } else {
        tracing::warn!("Demo batch did not complete");
    }

    context.shutdown().await;
    Ok(())
}

async fn run_new_batch(
    orchestrator: &Arc<BatchOrchestrator>,
    simulation: holeinspect::models::SimulationConfig,
) -> Result<bool> {
    let batch = orchestrator
        .create_batch(DEMO_PRODUCT_ID, Some("demo"), Some("SIM-01"), true)
        .context("Failed to create demo batch")?;
    let batch_id = batch.batch_id.clone();

    let holes: Vec<String> = (1..=DEMO_HOLE_COUNT).map(|i| format!("H{:03}", i)).collect();
    orchestrator.update_progress(
        &batch_id,
        ProgressUpdate {
            total_holes: Some(holes.len()),
            ..Default::default()
        },
    );
    if !orchestrator.start_batch(&batch_id) {
        anyhow::bail!("Failed to start batch {}", batch_id);
    }

    let (mut worker, mut events) = SimulationWorker::spawn(simulation, holes, 0);

    // First half
    let mut done = 0;
    while done < DEMO_HOLE_COUNT / 2 {
        match events.recv().await {
            Some(WorkerEvent::HoleCompleted {
                hole_id, result, at, ..
            }) => {
                orchestrator.record_hole_result(&batch_id, &hole_id, result, at);
                done += 1;
            }
            Some(WorkerEvent::BatchCompleted { .. }) => {}
            Some(WorkerEvent::Finished { .. }) | Some(WorkerEvent::Stopped { .. }) | None => break,
        }
    }

    // Pause: park the worker, apply what it already emitted, then persist
    if worker.pause().await {
        drain_pending(orchestrator, &batch_id, &mut events);
        let snapshot = worker.snapshot();
        if orchestrator.pause_batch(&batch_id, snapshot) {
            if let Some(stats) = orchestrator.time_stats(&batch_id) {
                tracing::info!(
                    "Paused at {}/{} holes, about {:.1}s remaining",
                    stats.completed_count,
                    stats.total_count,
                    stats.remaining_time.as_secs_f64()
                );
            }

            tokio::time::sleep(Duration::from_millis(500)).await;
            if orchestrator.resume_batch(&batch_id).is_none() {
                worker.stop().await;
                anyhow::bail!("Failed to resume batch {}", batch_id);
            }
        }
        worker.resume().await;
    }

    let completed = orchestrator.drive(&batch_id, events).await;
    worker.stop().await;
    Ok(completed)
}

fn drain_pending(
    orchestrator: &BatchOrchestrator,
    batch_id: &str,
    events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::HoleCompleted {
            hole_id, result, at, ..
        } = event
        {
            orchestrator.record_hole_result(batch_id, &hole_id, result, at);
        }
    }
}
