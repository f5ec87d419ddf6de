// State management module
//
// This module provides the BatchStateMachine which guards the detection state of
// one inspection run behind Arc<RwLock<T>>, validates every transition against
// the fixed edge table and notifies observers and subscribers of each change.

use crate::metrics::Metrics;
use crate::models::DetectionState;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

/// Maximum number of transitions kept in the history ring buffer.
pub const HISTORY_CAPACITY: usize = 100;

/// Change events emitted on every committed transition.
///
/// These are broadcast to subscribers (e.g. a status bar) without them having
/// to poll the machine.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A validated transition along a legal edge
    Transitioned {
        from: DetectionState,
        to: DetectionState,
        reason: String,
    },

    /// A recovery transition that bypassed validation
    Forced {
        from: DetectionState,
        to: DetectionState,
        reason: String,
    },
}

/// One entry of the transition history.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionRecord {
    pub from: DetectionState,
    pub to: DetectionState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub forced: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal transition {from} -> {to}")]
    Illegal {
        from: DetectionState,
        to: DetectionState,
    },
}

/// Synchronous transition observer, called with `(old, new)`.
pub type Observer = Arc<dyn Fn(DetectionState, DetectionState) + Send + Sync>;

#[derive(Debug)]
struct MachineInner {
    current: DetectionState,
    history: VecDeque<TransitionRecord>,
}

/// Thread-safe detection state machine with transition history.
///
/// All mutations go through [`transition`](Self::transition) (validated) or
/// [`force_transition`](Self::force_transition) (recovery only). After a
/// transition is committed:
/// - it is appended to a ring buffer of the last [`HISTORY_CAPACITY`] entries
/// - every registered [`Observer`] is called synchronously; a panicking
///   observer is caught and logged, the transition stands
/// - a [`StateChange`] is broadcast to subscribers
///
/// # Related Types
///
/// - [`DetectionState`]: the states and the edge table
/// - [`crate::services::BatchOrchestrator`]: owns one machine per running batch
pub struct BatchStateMachine {
    inner: Arc<RwLock<MachineInner>>,
    observers: Arc<RwLock<Vec<Observer>>>,
    state_tx: broadcast::Sender<StateChange>,
    metrics: Option<Arc<Metrics>>,
}

impl BatchStateMachine {
    /// Create a machine in [`DetectionState::Idle`] with a broadcast buffer of 100 events.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            inner: Arc::new(RwLock::new(MachineInner {
                current: DetectionState::Idle,
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            })),
            observers: Arc::new(RwLock::new(Vec::new())),
            state_tx,
            metrics: None,
        }
    }

    /// Count rejected transitions in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Whether `from -> to` is a legal edge.
    pub fn is_valid_transition(from: DetectionState, to: DetectionState) -> bool {
        from.can_transition_to(to)
    }

    pub fn current(&self) -> DetectionState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
    }

    pub fn is_active(&self) -> bool {
        self.current().is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.current().is_terminal()
    }

    /// Move to `target` if the edge is legal.
    ///
    /// On rejection the state is left untouched, nothing is recorded and no
    /// observer is called.
    pub fn transition(&self, target: DetectionState, reason: &str) -> Result<(), TransitionError> {
        let from = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let from = inner.current;
            if !from.can_transition_to(target) {
                drop(inner);
                tracing::warn!(
                    "Rejected detection state transition {} -> {} ({})",
                    from,
                    target,
                    reason
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_transition_rejected();
                }
                return Err(TransitionError::Illegal { from, to: target });
            }
            Self::commit(&mut inner, target, reason, false);
            from
        };

        tracing::info!("Detection state {} -> {} ({})", from, target, reason);
        self.notify(from, target);
        let _ = self.state_tx.send(StateChange::Transitioned {
            from,
            to: target,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Move to `target` without validation. Recovery paths only.
    pub fn force_transition(&self, target: DetectionState, reason: &str) {
        let from = {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let from = inner.current;
            Self::commit(&mut inner, target, reason, true);
            from
        };

        tracing::warn!("FORCED detection state {} -> {} ({})", from, target, reason);
        self.notify(from, target);
        let _ = self.state_tx.send(StateChange::Forced {
            from,
            to: target,
            reason: reason.to_string(),
        });
    }

    /// Return to [`DetectionState::Idle`] from wherever the machine is.
    pub fn reset(&self, reason: &str) {
        if self.current() != DetectionState::Idle {
            self.force_transition(DetectionState::Idle, reason);
        }
    }

    /// Transition history, oldest first.
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Register a synchronous observer.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(DetectionState, DetectionState) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Subscribe to state change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn commit(inner: &mut MachineInner, target: DetectionState, reason: &str, forced: bool) {
        let record = TransitionRecord {
            from: inner.current,
            to: target,
            reason: reason.to_string(),
            timestamp: Utc::now(),
            forced,
        };
        if inner.history.len() == HISTORY_CAPACITY {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
        inner.current = target;
    }

    fn notify(&self, from: DetectionState, to: DetectionState) {
        // Observers run outside the state lock so they may read the machine
        let observers: Vec<Observer> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(from, to))).is_err() {
                tracing::error!("State observer panicked on {} -> {}", from, to);
            }
        }
    }
}

impl Default for BatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// Clones share the same state, observers and channel
impl Clone for BatchStateMachine {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            observers: Arc::clone(&self.observers),
            state_tx: self.state_tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl std::fmt::Debug for BatchStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchStateMachine")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}
