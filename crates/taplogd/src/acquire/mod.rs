//! Acquirers - one component per category of data.
//!
//! Each acquirer owns the bridge from its platform source's callback or
//! polling style into a single `AcquisitionResult`, including its own
//! timeout and degradation policy. Acquirers never touch each other's
//! state; the orchestrator joins them.

pub mod audio;
pub mod environment;
pub mod location;
pub mod motion;
pub mod network;

pub use audio::AudioAcquirer;
pub use environment::{EnvironmentAcquirer, EnvironmentReport};
pub use location::LocationAcquirer;
pub use motion::MotionAcquirer;
pub use network::NetworkAcquirer;
