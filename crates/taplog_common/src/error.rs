//! Error types for taplog.

use thiserror::Error;

/// Run-level errors surfaced to the caller of a collection run.
///
/// Per-source trouble (missing permission, absent hardware, timeouts) never
/// shows up here; it is recorded as a `CollectionWarning` on the snapshot.
#[derive(Error, Debug)]
pub enum TaplogError {
    #[error("A collection run is already in progress")]
    RunInProgress,

    #[error("Snapshot store error: {0}")]
    Store(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
