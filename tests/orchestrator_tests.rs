//! Integration tests for BatchOrchestrator
//!
//! These tests verify:
//! - Batch creation (detection numbers, ids, side-files, product resolution)
//! - The batch status lifecycle and the one-active-batch-per-product rule
//! - Pause/resume persistence, including a lost or unwritable snapshot
//! - Summaries written on terminate/complete/progress updates
//! - Driving a batch from a simulation worker

use camino::Utf8PathBuf;
use holeinspect::metrics::Metrics;
use holeinspect::models::{
    BatchStatus, DetectionState, HoleResult, PausedDetectionState, ProductRef, ProgressUpdate,
    SimulationConfig,
};
use holeinspect::services::persistence::{BATCH_INFO_FILE, PAUSED_STATE_FILE};
use holeinspect::services::{
    BatchError, BatchOrchestrator, BatchPersistence, SimulationWorker, UpdateBuffer,
};
use holeinspect::store::{InMemoryStatusStore, JsonBatchRepository, StaticCatalog};
use indexmap::IndexMap;
use std::fs;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _temp_dir: TempDir,
    root: Utf8PathBuf,
    store: Arc<InMemoryStatusStore>,
    metrics: Arc<Metrics>,
    orchestrator: Arc<BatchOrchestrator>,
}

fn orchestrator_at(
    root: &Utf8PathBuf,
    store: Arc<InMemoryStatusStore>,
    metrics: Arc<Metrics>,
) -> BatchOrchestrator {
    let catalog = StaticCatalog::with_products([
        ProductRef::new("P1", "CAP1000"),
        ProductRef::new("P2", "CAP2000"),
    ]);
    let buffer = UpdateBuffer::new(store, 3, Duration::from_millis(500), metrics.clone());
    BatchOrchestrator::new(
        Arc::new(JsonBatchRepository::open(root).unwrap()),
        Arc::new(catalog),
        BatchPersistence::new(root.join("Data")),
        Arc::new(buffer),
        metrics,
    )
}

fn harness() -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    let store = Arc::new(InMemoryStatusStore::new());
    let metrics = Arc::new(Metrics::new());
    let orchestrator = Arc::new(orchestrator_at(&root, store.clone(), metrics.clone()));
    Harness {
        _temp_dir: temp_dir,
        root,
        store,
        metrics,
        orchestrator,
    }
}

fn paused_state(index: usize) -> PausedDetectionState {
    let mut results = IndexMap::new();
    for i in 0..index {
        let result = if i % 10 == 0 { "UNQUALIFIED" } else { "QUALIFIED" };
        results.insert(format!("H{:03}", i + 1), result.to_string());
    }
    PausedDetectionState {
        current_index: index,
        detection_results: results,
        pending_holes: (index + 1..=100).map(|i| format!("H{:03}", i)).collect(),
        simulation_params: Some(serde_json::json!({ "interval_ms": 100 })),
    }
}

/// Create and start a batch for P1.
fn running_batch(h: &Harness, is_mock: bool) -> String {
    let batch = h.orchestrator.create_batch("P1", Some("tester"), None, is_mock).unwrap();
    assert!(h.orchestrator.start_batch(&batch.batch_id));
    batch.batch_id
}

// ========== Creation ==========

#[test]
fn test_first_batch_is_number_one_without_mock_suffix() {
    let h = harness();
    let batch = h.orchestrator.create_batch("P1", Some("alice"), Some("EQ-7"), false).unwrap();

    assert_eq!(batch.detection_number, 1);
    assert!(batch.batch_id.starts_with("CAP1000_检测001_"));
    assert!(!batch.batch_id.ends_with("_MOCK"));
    assert_eq!(batch.status, BatchStatus::Pending);
    assert_eq!(batch.operator.as_deref(), Some("alice"));
    assert!(batch.data_path.join(BATCH_INFO_FILE).is_file());
    assert!(batch.data_path.starts_with(h.root.join("Data").join("CAP1000")));
}

#[test]
fn test_mock_batch_id_has_suffix() {
    let h = harness();
    let batch = h.orchestrator.create_batch("P1", None, None, true).unwrap();

    assert!(batch.batch_id.ends_with("_MOCK"));
    assert!(batch.is_mock());
}

#[test]
fn test_detection_numbers_strictly_increase_per_product() {
    let h = harness();
    let mut previous = 0;
    for _ in 0..4 {
        let batch = h.orchestrator.create_batch("P1", None, None, false).unwrap();
        assert!(batch.detection_number > previous);
        previous = batch.detection_number;
        // Retired batches still count towards the numbering
        assert!(h.orchestrator.terminate_batch(&batch.batch_id));
    }
    assert_eq!(previous, 4);

    // Other products count independently
    let other = h.orchestrator.create_batch("P2", None, None, false).unwrap();
    assert_eq!(other.detection_number, 1);
}

#[test]
fn test_unknown_product_is_rejected() {
    let h = harness();
    let result = h.orchestrator.create_batch("NOPE", None, None, false);

    assert!(matches!(result, Err(BatchError::InvalidProduct(id)) if id == "NOPE"));
    assert!(h.orchestrator.list_batches("NOPE").is_empty());
}

#[test]
fn test_batch_info_file_contents() {
    let h = harness();
    let batch = h.orchestrator.create_batch("P1", Some("bob"), None, true).unwrap();

    let raw = fs::read_to_string(batch.data_path.join(BATCH_INFO_FILE)).unwrap();
    let info: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(info["batch_id"], batch.batch_id.as_str());
    assert_eq!(info["product_id"], "P1");
    assert_eq!(info["detection_number"], 1);
    assert_eq!(info["detection_type"], "MOCK");
    assert_eq!(info["is_mock"], true);
    assert_eq!(info["operator"], "bob");
    assert_eq!(info["status"], "PENDING");
}

// ========== Lifecycle ==========

#[test]
fn test_only_one_active_batch_per_product() {
    let h = harness();
    let first = running_batch(&h, false);
    let second = h.orchestrator.create_batch("P1", None, None, false).unwrap();

    assert!(!h.orchestrator.start_batch(&second.batch_id));
    assert_eq!(
        h.orchestrator.get_batch(&second.batch_id).unwrap().status,
        BatchStatus::Pending
    );

    // Paused still counts as active
    assert!(h.orchestrator.pause_batch(&first, paused_state(3)));
    assert!(!h.orchestrator.start_batch(&second.batch_id));

    assert!(h.orchestrator.terminate_batch(&first));
    assert!(h.orchestrator.start_batch(&second.batch_id));

    let active: Vec<_> = h
        .orchestrator
        .list_batches("P1")
        .into_iter()
        .filter(|b| b.status.is_active())
        .collect();
    assert_eq!(active.len(), 1);
}

#[test]
fn test_missing_batch_reports_false() {
    let h = harness();
    assert!(!h.orchestrator.start_batch("missing"));
    assert!(!h.orchestrator.pause_batch("missing", paused_state(0)));
    assert!(h.orchestrator.resume_batch("missing").is_none());
    assert!(!h.orchestrator.terminate_batch("missing"));
    assert!(!h.orchestrator.complete_batch("missing"));
    assert!(!h.orchestrator.update_progress("missing", ProgressUpdate::default()));
}

#[test]
fn test_invalid_status_transitions_report_false() {
    let h = harness();
    let batch = h.orchestrator.create_batch("P1", None, None, false).unwrap();

    // PENDING cannot pause, resume or complete
    assert!(!h.orchestrator.pause_batch(&batch.batch_id, paused_state(0)));
    assert!(h.orchestrator.resume_batch(&batch.batch_id).is_none());
    assert!(!h.orchestrator.complete_batch(&batch.batch_id));

    assert!(h.orchestrator.start_batch(&batch.batch_id));
    assert!(!h.orchestrator.start_batch(&batch.batch_id));
    assert!(h.orchestrator.resume_batch(&batch.batch_id).is_none());
}

#[test]
fn test_terminate_is_idempotent_and_writes_summary() {
    let h = harness();
    let batch_id = running_batch(&h, false);

    assert!(h.orchestrator.terminate_batch(&batch_id));
    assert!(h.orchestrator.terminate_batch(&batch_id));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Terminated);
    let summary = h.orchestrator.persistence().read_summary(&batch.data_path).unwrap().unwrap();
    assert_eq!(summary.status, BatchStatus::Terminated);

    // Retired batches stay retired
    assert!(!h.orchestrator.start_batch(&batch_id));
    assert!(!h.orchestrator.complete_batch(&batch_id));
    assert_eq!(h.orchestrator.detection_state(&batch_id), None);
}

#[test]
fn test_terminate_pending_batch() {
    let h = harness();
    let batch = h.orchestrator.create_batch("P1", None, None, false).unwrap();

    assert!(h.orchestrator.terminate_batch(&batch.batch_id));
    assert!(batch.data_path.join("summary.json").is_file());
}

#[test]
fn test_completed_batch_cannot_be_terminated() {
    let h = harness();
    let batch_id = running_batch(&h, false);

    assert!(h.orchestrator.complete_batch(&batch_id));
    assert!(!h.orchestrator.terminate_batch(&batch_id));
    assert_eq!(
        h.orchestrator.get_batch(&batch_id).unwrap().status,
        BatchStatus::Completed
    );
}

#[test]
fn test_complete_with_nothing_inspected_has_zero_rate() {
    let h = harness();
    let batch_id = running_batch(&h, false);

    assert!(h.orchestrator.complete_batch(&batch_id));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    let summary = h.orchestrator.persistence().read_summary(&batch.data_path).unwrap().unwrap();
    assert_eq!(summary.qualification_rate, 0.0);
    assert_eq!(summary.completion_rate, 0.0);
    assert_eq!(summary.status, BatchStatus::Completed);
}

#[test]
fn test_update_progress_is_partial_and_refreshes_summary() {
    let h = harness();
    let batch_id = running_batch(&h, false);

    assert!(h.orchestrator.update_progress(
        &batch_id,
        ProgressUpdate {
            total_holes: Some(8),
            completed_holes: Some(4),
            qualified_holes: Some(3),
            defective_holes: Some(1),
            current_index: Some(4),
        },
    ));
    assert!(h.orchestrator.update_progress(
        &batch_id,
        ProgressUpdate {
            completed_holes: Some(5),
            qualified_holes: Some(4),
            ..Default::default()
        },
    ));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(batch.progress.total_holes, 8);
    assert_eq!(batch.progress.completed_holes, 5);
    assert_eq!(batch.progress.defective_holes, 1);
    assert_eq!(batch.progress.current_index, 4);

    let summary = h.orchestrator.persistence().read_summary(&batch.data_path).unwrap().unwrap();
    assert_eq!(summary.completion_rate, 62.5);
    assert_eq!(summary.qualification_rate, 80.0);

    // The estimator follows the authoritative counters
    let stats = h.orchestrator.time_stats(&batch_id).unwrap();
    assert_eq!(stats.completed_count, 5);
    assert_eq!(stats.total_count, 8);
}

// ========== Pause / resume ==========

#[test]
fn test_pause_resume_round_trip() {
    let h = harness();
    let batch_id = running_batch(&h, true);
    let state = paused_state(17);

    assert!(h.orchestrator.pause_batch(&batch_id, state.clone()));

    let paused = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(paused.status, BatchStatus::Paused);
    assert_eq!(paused.progress.current_index, 17);
    assert!(paused.data_path.join(PAUSED_STATE_FILE).is_file());

    let resumed = h.orchestrator.resume_batch(&batch_id).unwrap();
    assert_eq!(resumed, state);

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Running);
    // Snapshot consumed
    assert!(!batch.data_path.join(PAUSED_STATE_FILE).exists());
    assert_eq!(
        h.orchestrator.detection_state(&batch_id),
        Some(DetectionState::Detecting)
    );
}

#[test]
fn test_resume_without_snapshot_file_uses_batch_row() {
    let h = harness();
    let batch_id = running_batch(&h, false);
    assert!(h.orchestrator.pause_batch(&batch_id, paused_state(42)));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    fs::remove_file(batch.data_path.join(PAUSED_STATE_FILE)).unwrap();

    let resumed = h.orchestrator.resume_batch(&batch_id).unwrap();
    assert_eq!(resumed.current_index, 42);
    assert_eq!(resumed.detection_results.len(), 42);
    assert_eq!(resumed.pending_holes.first().map(String::as_str), Some("H043"));
}

#[test]
fn test_resume_with_corrupt_snapshot_uses_batch_row() {
    let h = harness();
    let batch_id = running_batch(&h, false);
    assert!(h.orchestrator.pause_batch(&batch_id, paused_state(5)));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    fs::write(batch.data_path.join(PAUSED_STATE_FILE), b"{\"current_index\": ").unwrap();

    let resumed = h.orchestrator.resume_batch(&batch_id).unwrap();
    assert_eq!(resumed, paused_state(5));
}

#[test]
fn test_row_wins_over_diverging_snapshot() {
    let h = harness();
    let batch_id = running_batch(&h, false);
    assert!(h.orchestrator.pause_batch(&batch_id, paused_state(10)));

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    let stale = serde_json::to_vec(&paused_state(3)).unwrap();
    fs::write(batch.data_path.join(PAUSED_STATE_FILE), stale).unwrap();

    let resumed = h.orchestrator.resume_batch(&batch_id).unwrap();
    assert_eq!(resumed.current_index, 10);
}

#[test]
fn test_pause_fails_cleanly_when_snapshot_cannot_be_written() {
    let h = harness();
    let batch_id = running_batch(&h, false);
    let batch = h.orchestrator.get_batch(&batch_id).unwrap();

    // Replace the batch directory with a regular file
    fs::remove_dir_all(&batch.data_path).unwrap();
    fs::write(&batch.data_path, b"blocked").unwrap();

    assert!(!h.orchestrator.pause_batch(&batch_id, paused_state(8)));

    let after = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(after.status, BatchStatus::Running);
    assert_eq!(after.progress.current_index, 0);
    assert!(after.detection_results.is_empty());
}

#[test]
fn test_resume_after_restart() {
    let h = harness();
    let batch_id = running_batch(&h, true);
    assert!(h.orchestrator.pause_batch(&batch_id, paused_state(25)));

    // A fresh orchestrator over the same data, as after a process restart
    let reopened = orchestrator_at(&h.root, h.store.clone(), h.metrics.clone());

    let resumable = reopened.get_resumable_batch("P1", true).unwrap();
    assert_eq!(resumable.batch_id, batch_id);
    assert!(reopened.get_resumable_batch("P1", false).is_none());

    let state = reopened.resume_batch(&batch_id).unwrap();
    assert_eq!(state.current_index, 25);
    assert_eq!(reopened.detection_state(&batch_id), Some(DetectionState::Detecting));
    assert!(reopened.get_resumable_batch("P1", true).is_none());
}

// ========== Results ==========

#[test]
fn test_recorded_results_reach_status_store() {
    let h = harness();
    let batch_id = running_batch(&h, true);

    let now = chrono::Utc::now();
    assert!(h.orchestrator.record_hole_result(&batch_id, "H001", HoleResult::Qualified, now));
    assert!(h.orchestrator.record_hole_result(&batch_id, "H002", HoleResult::Unqualified, now));

    let log = h.store.log();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].new_status, "qualified");
    assert_eq!(log[1].new_status, "defective");
    assert_eq!(log[1].source, "simulation");
    assert_eq!(h.metrics.holes_unqualified.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_drive_with_full_error_rate() {
    let h = harness();
    let batch_id = running_batch(&h, true);
    let holes: Vec<String> = (1..=12).map(|i| format!("H{:03}", i)).collect();
    h.orchestrator.update_progress(
        &batch_id,
        ProgressUpdate {
            total_holes: Some(holes.len()),
            ..Default::default()
        },
    );

    let config = SimulationConfig {
        interval_ms: 1,
        error_rate: 1.0,
        unqualified_rate: 0.0,
        seed: Some(99),
        ..Default::default()
    };
    let (mut worker, events) = SimulationWorker::spawn(config, holes, 0);

    assert!(h.orchestrator.drive(&batch_id, events).await);
    worker.stop().await;

    let batch = h.orchestrator.get_batch(&batch_id).unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.progress.completed_holes, 12);
    assert_eq!(batch.progress.defective_holes, 12);
    assert_eq!(batch.progress.qualification_rate(), 0.0);
    assert!(batch.detection_results.values().all(|r| r == "ERROR"));
    assert_eq!(h.metrics.holes_errored.load(Ordering::Relaxed), 12);
}

#[tokio::test]
async fn test_drive_returns_false_when_worker_stops() {
    let h = harness();
    let batch_id = running_batch(&h, true);

    let config = SimulationConfig {
        interval_ms: 10_000,
        ..Default::default()
    };
    let holes = vec!["H001".to_string(), "H002".to_string()];
    let (mut worker, events) = SimulationWorker::spawn(config, holes, 0);
    worker.stop().await;

    assert!(!h.orchestrator.drive(&batch_id, events).await);
    assert_eq!(
        h.orchestrator.get_batch(&batch_id).unwrap().status,
        BatchStatus::Running
    );
}
