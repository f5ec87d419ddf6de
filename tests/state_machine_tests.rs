//! Integration tests for BatchStateMachine
//!
//! These tests verify that the state machine:
//! - Accepts exactly the legal edges and leaves state untouched otherwise
//! - Records every transition in a bounded, oldest-first history
//! - Notifies observers and subscribers, surviving panicking observers
//! - Partitions states into active and terminal

use holeinspect::models::DetectionState;
use holeinspect::state::{HISTORY_CAPACITY, TransitionError};
use holeinspect::{BatchStateMachine, StateChange};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, timeout};

fn any_state() -> impl Strategy<Value = DetectionState> {
    proptest::sample::select(DetectionState::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_transition_matches_edge_table(from in any_state(), to in any_state()) {
        let machine = BatchStateMachine::new();
        machine.force_transition(from, "setup");
        let history_before = machine.history().len();

        let result = machine.transition(to, "prop");

        if BatchStateMachine::is_valid_transition(from, to) {
            prop_assert!(result.is_ok());
            prop_assert_eq!(machine.current(), to);
            prop_assert_eq!(machine.history().len(), history_before + 1);
        } else {
            prop_assert_eq!(result, Err(TransitionError::Illegal { from, to }));
            prop_assert_eq!(machine.current(), from);
            prop_assert_eq!(machine.history().len(), history_before);
        }
    }

    #[test]
    fn prop_active_and_terminal_partition(state in any_state()) {
        prop_assert_ne!(state.is_active(), state.is_terminal());
    }
}

#[test]
fn test_full_detection_cycle() {
    let machine = BatchStateMachine::new();

    for (target, reason) in [
        (DetectionState::Preparing, "start"),
        (DetectionState::Detecting, "prepared"),
        (DetectionState::Paused, "operator pause"),
        (DetectionState::Detecting, "operator resume"),
        (DetectionState::Completed, "all holes done"),
        (DetectionState::Idle, "next batch"),
    ] {
        machine.transition(target, reason).unwrap();
    }

    let history = machine.history();
    assert_eq!(history.len(), 6);
    assert_eq!(history[0].from, DetectionState::Idle);
    assert_eq!(history[0].to, DetectionState::Preparing);
    assert_eq!(history[5].reason, "next batch");
    assert!(history.iter().all(|r| !r.forced));
}

#[test]
fn test_illegal_transition_is_rejected() {
    let machine = BatchStateMachine::new();

    let result = machine.transition(DetectionState::Completed, "skip ahead");

    assert!(matches!(result, Err(TransitionError::Illegal { .. })));
    assert_eq!(machine.current(), DetectionState::Idle);
    assert!(machine.history().is_empty());
}

#[test]
fn test_force_transition_is_flagged() {
    let machine = BatchStateMachine::new();
    machine.force_transition(DetectionState::Error, "sensor fault");

    assert_eq!(machine.current(), DetectionState::Error);
    assert!(machine.history()[0].forced);

    machine.reset("recovered");
    assert_eq!(machine.current(), DetectionState::Idle);
}

#[test]
fn test_history_evicts_oldest() {
    let machine = BatchStateMachine::new();
    // Idle <-> Preparing, 2 records per round
    for _ in 0..60 {
        machine.transition(DetectionState::Preparing, "up").unwrap();
        machine.transition(DetectionState::Idle, "down").unwrap();
    }

    let history = machine.history();
    assert_eq!(history.len(), HISTORY_CAPACITY);
    assert!(
        history
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
    assert_eq!(history.last().unwrap().to, DetectionState::Idle);
}

#[test]
fn test_observers_called_in_order() {
    let machine = BatchStateMachine::new();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let recorder = seen.clone();
    machine.add_observer(move |from, to| recorder.lock().unwrap().push((from, to)));

    machine.transition(DetectionState::Loading, "load").unwrap();
    machine.transition(DetectionState::Detecting, "go").unwrap();
    let _ = machine.transition(DetectionState::Loading, "illegal");

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (DetectionState::Idle, DetectionState::Loading),
            (DetectionState::Loading, DetectionState::Detecting),
        ]
    );
}

#[test]
fn test_panicking_observer_does_not_abort_transition() {
    let machine = BatchStateMachine::new();
    let calls = Arc::new(Mutex::new(0));

    machine.add_observer(|_, _| panic!("observer bug"));
    let counter = calls.clone();
    machine.add_observer(move |_, _| *counter.lock().unwrap() += 1);

    machine.transition(DetectionState::Calibrating, "calibrate").unwrap();

    assert_eq!(machine.current(), DetectionState::Calibrating);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[test]
fn test_clones_share_state() {
    let machine = BatchStateMachine::new();
    let handle = machine.clone();

    machine.transition(DetectionState::Preparing, "start").unwrap();

    assert_eq!(handle.current(), DetectionState::Preparing);
    assert!(handle.is_active());
}

#[tokio::test]
async fn test_subscribers_receive_changes() {
    let machine = BatchStateMachine::new();
    let mut rx = machine.subscribe();

    machine.transition(DetectionState::Preparing, "start").unwrap();
    machine.force_transition(DetectionState::Idle, "abort");

    let first = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert_eq!(
        first,
        StateChange::Transitioned {
            from: DetectionState::Idle,
            to: DetectionState::Preparing,
            reason: "start".to_string(),
        }
    );

    let second = timeout(Duration::from_millis(100), rx.recv())
        .await
        .expect("Timeout waiting for event")
        .expect("Channel closed");
    assert!(matches!(second, StateChange::Forced { to: DetectionState::Idle, .. }));
}

#[test]
fn test_concurrent_transitions_stay_consistent() {
    let machine = BatchStateMachine::new();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let machine = machine.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let _ = machine.transition(DetectionState::Preparing, "up");
                    let _ = machine.transition(DetectionState::Idle, "down");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every recorded step must be a legal edge from the previous state
    let history = machine.history();
    for pair in history.windows(2) {
        assert_eq!(pair[0].to, pair[1].from);
    }
    for record in &history {
        assert!(BatchStateMachine::is_valid_transition(record.from, record.to));
    }
}
