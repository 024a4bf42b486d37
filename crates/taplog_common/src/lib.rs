//! Taplog Common - Shared types and schemas for the taplog engine.
//!
//! Everything the orchestrator produces or consumes across crate boundaries
//! lives here: the session snapshot data model, the acquisition result
//! taxonomy, progress events, configuration, and errors.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod progress;
pub mod snapshot;

pub use acquisition::*;
pub use config::*;
pub use error::*;
pub use progress::*;
pub use snapshot::*;
