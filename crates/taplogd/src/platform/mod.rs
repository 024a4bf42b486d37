//! Platform source traits and host-backed implementations.
//!
//! Every piece of hardware the acquirers touch sits behind a trait so the
//! engine can run against fakes in tests and against whatever the host
//! actually provides in production. Real implementations probe `/sys`,
//! `/proc`, IIO, sysinfo, and the default audio input; hosts without a given
//! device simply report it absent and the acquirer records `Unavailable`.

pub mod audio;
pub mod location;
pub mod motion;
pub mod network;
pub mod sensors;

pub use audio::{AudioCapture, AudioInput, AudioSpec, CpalAudioInput, FakeAudioInput};
pub use location::{
    DisabledLocationSource, FakeGeocoder, FakeLocationSource, GeoFix, Geocoder, LocationSource,
    NominatimGeocoder,
};
pub use motion::{FakeMotionSource, IioMotionSource, InertialSample, MotionSource};
pub use network::{
    FakeLocalAddressSource, FakePublicAddressEcho, HttpEcho, LocalAddressSource,
    NixLocalAddressSource, PublicAddressEcho,
};
pub use sensors::{
    FakeSensorHost, FakeStepCounter, LinuxSensorHost, NoStepCounter, SensorHost, StepSource,
};

/// Authorization state reported by the platform for a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    NotDetermined,
    Denied,
    Restricted,
    Granted,
}

impl PermissionStatus {
    /// Denied and Restricted are terminal for the current run; they are
    /// never retried and never treated as a timeout.
    pub fn is_blocked(self) -> bool {
        matches!(self, Self::Denied | Self::Restricted)
    }
}

/// Capability a permission check applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Location,
    Microphone,
}

/// Platform authorization provider.
pub trait PermissionProvider: Send + Sync {
    fn status(&self, kind: PermissionKind) -> PermissionStatus;
}

/// Fixed permission table; the host CLI grants everything, tests pick and
/// choose.
pub struct StaticPermissionProvider {
    location: PermissionStatus,
    microphone: PermissionStatus,
}

impl StaticPermissionProvider {
    pub fn granting_all() -> Self {
        Self {
            location: PermissionStatus::Granted,
            microphone: PermissionStatus::Granted,
        }
    }

    pub fn new(location: PermissionStatus, microphone: PermissionStatus) -> Self {
        Self {
            location,
            microphone,
        }
    }
}

impl PermissionProvider for StaticPermissionProvider {
    fn status(&self, kind: PermissionKind) -> PermissionStatus {
        match kind {
            PermissionKind::Location => self.location,
            PermissionKind::Microphone => self.microphone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_states() {
        assert!(PermissionStatus::Denied.is_blocked());
        assert!(PermissionStatus::Restricted.is_blocked());
        assert!(!PermissionStatus::Granted.is_blocked());
        assert!(!PermissionStatus::NotDetermined.is_blocked());
    }
}
