//! Ticker status state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a work item.
///
/// State transitions:
/// - Idle -> Queued (claim acquisition)
/// - Queued -> Queued (steal: another holder re-stamps the lock)
/// - Queued -> Inprogress (execution begins)
/// - Inprogress -> Done | DueDone | Failed (completion)
/// - Idle | Queued -> Cancelled (external request)
/// - Queued | Inprogress -> Idle (explicit release only; lock cleared)
///
/// Design note: transitions live on [`crate::domain::Lease`]; nothing else
/// writes status or lock fields directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerStatus {
    /// Due or waiting, held by nobody.
    Idle,

    /// Claimed by a holder, not yet executing.
    Queued,

    /// Executing on the holding node.
    Inprogress,

    /// Completed on time.
    Done,

    /// Completed, but picked up past its due window.
    DueDone,

    /// Handler returned an error.
    Failed,

    /// Cancelled before execution.
    Cancelled,
}

impl TickerStatus {
    /// Is this a terminal status (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TickerStatus::Done
                | TickerStatus::DueDone
                | TickerStatus::Failed
                | TickerStatus::Cancelled
        )
    }

    /// Is this item eligible for claiming (acquire or steal)?
    pub fn is_claimable(self) -> bool {
        matches!(self, TickerStatus::Idle | TickerStatus::Queued)
    }

    /// Does this status require a lock holder?
    pub fn is_held(self) -> bool {
        matches!(self, TickerStatus::Queued | TickerStatus::Inprogress)
    }

    /// Full transition table. Queued -> Queued is the steal re-stamp.
    pub fn can_transition(self, to: TickerStatus) -> bool {
        use TickerStatus::*;
        match (self, to) {
            (Idle, Queued) | (Idle, Cancelled) => true,
            (Queued, Queued) | (Queued, Inprogress) | (Queued, Idle) | (Queued, Cancelled) => true,
            (Inprogress, Done) | (Inprogress, DueDone) | (Inprogress, Failed) => true,
            (Inprogress, Idle) => true,
            _ => false,
        }
    }

    /// Stable text form used by stores and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TickerStatus::Idle => "idle",
            TickerStatus::Queued => "queued",
            TickerStatus::Inprogress => "inprogress",
            TickerStatus::Done => "done",
            TickerStatus::DueDone => "due_done",
            TickerStatus::Failed => "failed",
            TickerStatus::Cancelled => "cancelled",
        }
    }

    /// Every status, in display order. Used by count views.
    pub const ALL: [TickerStatus; 7] = [
        TickerStatus::Idle,
        TickerStatus::Queued,
        TickerStatus::Inprogress,
        TickerStatus::Done,
        TickerStatus::DueDone,
        TickerStatus::Failed,
        TickerStatus::Cancelled,
    ];
}

impl std::fmt::Display for TickerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TickerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TickerStatus::Idle),
            "queued" => Ok(TickerStatus::Queued),
            "inprogress" => Ok(TickerStatus::Inprogress),
            "done" => Ok(TickerStatus::Done),
            "due_done" => Ok(TickerStatus::DueDone),
            "failed" => Ok(TickerStatus::Failed),
            "cancelled" => Ok(TickerStatus::Cancelled),
            other => Err(format!("unknown ticker status: {other}")),
        }
    }
}
