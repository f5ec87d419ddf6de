use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one inspection run.
///
/// The legal edges between states are fixed; see
/// [`DetectionState::can_transition_to`]. Illegal transitions are rejected by
/// [`crate::state::BatchStateMachine`], never coerced into a nearby legal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionState {
    Idle,
    Loading,
    Preparing,
    Calibrating,
    Detecting,
    Paused,
    Stopping,
    Completed,
    Error,
}

impl DetectionState {
    /// Every state, in declaration order.
    pub const ALL: [DetectionState; 9] = [
        DetectionState::Idle,
        DetectionState::Loading,
        DetectionState::Preparing,
        DetectionState::Calibrating,
        DetectionState::Detecting,
        DetectionState::Paused,
        DetectionState::Stopping,
        DetectionState::Completed,
        DetectionState::Error,
    ];

    /// States reachable from `self` in a single validated step.
    pub fn allowed_targets(self) -> &'static [DetectionState] {
        use DetectionState::*;
        match self {
            Idle => &[Loading, Preparing, Calibrating],
            Loading | Preparing | Calibrating => &[Detecting, Error, Idle],
            Detecting => &[Paused, Stopping, Completed, Error],
            Paused => &[Detecting, Stopping, Error],
            Stopping => &[Idle, Error],
            Completed | Error => &[Idle, Loading],
        }
    }

    pub fn can_transition_to(self, target: DetectionState) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// A run is in progress (hardware or simulation may be busy).
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DetectionState::Loading
                | DetectionState::Preparing
                | DetectionState::Calibrating
                | DetectionState::Detecting
                | DetectionState::Paused
                | DetectionState::Stopping
        )
    }

    /// A resting state. Exactly the complement of [`is_active`](Self::is_active).
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionState::Idle => "IDLE",
            DetectionState::Loading => "LOADING",
            DetectionState::Preparing => "PREPARING",
            DetectionState::Calibrating => "CALIBRATING",
            DetectionState::Detecting => "DETECTING",
            DetectionState::Paused => "PAUSED",
            DetectionState::Stopping => "STOPPING",
            DetectionState::Completed => "COMPLETED",
            DetectionState::Error => "ERROR",
        }
    }
}

impl fmt::Display for DetectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a batch is driven by the real equipment or by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionType {
    Real,
    Mock,
}

impl DetectionType {
    pub fn from_mock_flag(is_mock: bool) -> Self {
        if is_mock {
            DetectionType::Mock
        } else {
            DetectionType::Real
        }
    }

    pub fn is_mock(self) -> bool {
        self == DetectionType::Mock
    }
}

/// Persisted status of a batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Running,
    Paused,
    Terminated,
    Completed,
}

impl BatchStatus {
    pub fn can_transition_to(self, target: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Pending | Running | Paused, Terminated)
        )
    }

    /// Counts against the one-active-batch-per-product rule.
    pub fn is_active(self) -> bool {
        matches!(self, BatchStatus::Running | BatchStatus::Paused)
    }

    /// Retired batches are kept forever but never mutated again.
    pub fn is_final(self) -> bool {
        matches!(self, BatchStatus::Terminated | BatchStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Running => "RUNNING",
            BatchStatus::Paused => "PAUSED",
            BatchStatus::Terminated => "TERMINATED",
            BatchStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of inspecting a single hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HoleResult {
    Qualified,
    Unqualified,
    Error,
}

impl HoleResult {
    pub fn is_qualified(self) -> bool {
        self == HoleResult::Qualified
    }

    /// Status token written to the status store for this result.
    pub fn status_token(self) -> &'static str {
        match self {
            HoleResult::Qualified => "qualified",
            HoleResult::Unqualified | HoleResult::Error => "defective",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HoleResult::Qualified => "QUALIFIED",
            HoleResult::Unqualified => "UNQUALIFIED",
            HoleResult::Error => "ERROR",
        }
    }
}

impl fmt::Display for HoleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-side status of a hole.
///
/// Raw status strings coming out of the status store are mapped here in
/// exactly one place ([`HoleStatus::from_token`]). Tokens nobody recognises
/// become [`HoleStatus::Unmapped`] so they still reach the display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoleStatus {
    Pending,
    Processing,
    Qualified,
    Defective,
    Blind,
    TieRod,
    Unmapped(String),
}

impl HoleStatus {
    /// Map a raw status token (English or the legacy Chinese labels).
    pub fn from_token(token: &str) -> Self {
        let normalized = token.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" | "待检" | "待检测" => HoleStatus::Pending,
            "processing" | "detecting" | "检测中" => HoleStatus::Processing,
            "qualified" | "合格" => HoleStatus::Qualified,
            "defective" | "unqualified" | "不合格" | "异常" => HoleStatus::Defective,
            "blind" | "盲孔" => HoleStatus::Blind,
            "tie_rod" | "拉杆孔" => HoleStatus::TieRod,
            _ => HoleStatus::Unmapped(token.to_string()),
        }
    }

    pub fn is_unmapped(&self) -> bool {
        matches!(self, HoleStatus::Unmapped(_))
    }
}
