//! Acquisition result taxonomy.
//!
//! Every acquirer resolves to an `AcquisitionResult`. "Normal" trouble -
//! missing permission, absent hardware, no data in the window, a busy input
//! device - is `Unavailable`, never an error. Only the orchestrator's own
//! persistence step can fail a run.

use serde::{Deserialize, Serialize};

/// Terminal result of one acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum AcquisitionResult<T> {
    /// The source produced a value that passed validation.
    Value(T),
    /// The source could not produce a value; the reason goes into the
    /// snapshot's warning list verbatim.
    Unavailable { reason: String },
    /// The operation exceeded its allotted time and no partial value could
    /// stand in for it.
    TimedOut,
}

impl<T> AcquisitionResult<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Consume the result, keeping only the value.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The warning text for a non-value result, if any.
    pub fn warning_reason(&self) -> Option<String> {
        match self {
            Self::Value(_) => None,
            Self::Unavailable { reason } => Some(reason.clone()),
            Self::TimedOut => Some("timed out".to_string()),
        }
    }

    /// Map the carried value, leaving failure variants untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AcquisitionResult<U> {
        match self {
            Self::Value(v) => AcquisitionResult::Value(f(v)),
            Self::Unavailable { reason } => AcquisitionResult::Unavailable { reason },
            Self::TimedOut => AcquisitionResult::TimedOut,
        }
    }
}
