//! Progress events for collection run visibility.
//!
//! Best-effort and lossy: the orchestrator publishes the latest phase over a
//! watch channel and never blocks on a slow or absent consumer.

use serde::{Deserialize, Serialize};

/// Phase of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectPhase {
    Idle,
    Collecting,
    Assembling,
    Storing,
    Complete,
}

impl std::fmt::Display for CollectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Collecting => write!(f, "collecting"),
            Self::Assembling => write!(f, "assembling"),
            Self::Storing => write!(f, "storing"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Progress event published while a run advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Current phase
    pub phase: CollectPhase,

    /// Human-readable detail line
    pub detail: Option<String>,

    /// Elapsed time since the trigger (ms)
    pub elapsed_ms: u64,
}

impl ProgressEvent {
    pub fn idle() -> Self {
        Self {
            phase: CollectPhase::Idle,
            detail: None,
            elapsed_ms: 0,
        }
    }

    pub fn phase(phase: CollectPhase, detail: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            phase,
            detail: Some(detail.into()),
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_display_matches_wire_names() {
        assert_eq!(CollectPhase::Collecting.to_string(), "collecting");
        assert_eq!(CollectPhase::Complete.to_string(), "complete");
    }
}
