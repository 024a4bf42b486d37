//! Session snapshot - the single product of a collection run.
//!
//! One snapshot per trigger event. Every field is independently optional:
//! a source that failed simply leaves its slot empty and adds a warning.
//! The snapshot is immutable once assembled; nothing mutates it after the
//! orchestrator hands it to the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Complete session snapshot assembled from one collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Unique id of this snapshot
    pub id: Uuid,

    /// When the run was triggered (authoritative creation instant)
    pub timestamp: DateTime<Utc>,

    /// Coordinates plus reverse-geocoded address, if acquired
    pub location: Option<LocationReading>,

    /// Local or public network address, if resolved
    pub network: Option<NetworkIdentity>,

    /// Inertial sample series, if acquired
    pub motion: Option<MotionSeries>,

    /// Magnetic field vector
    pub magnetic: Option<MagneticReading>,

    /// Barometric pressure and derived altitude
    pub pressure: Option<PressureReading>,

    /// Ambient light level (possibly a proxy estimate)
    pub ambient_light: Option<AmbientLightReading>,

    /// Proximity sensor state
    pub proximity: Option<ProximityReading>,

    /// Step count over the trailing window
    pub steps: Option<StepWindow>,

    /// Thermal zone temperatures
    pub thermal: Option<ThermalReading>,

    /// Battery charge and state
    pub battery: Option<BatteryReading>,

    /// Memory, load, and host metrics
    pub system: Option<SystemReading>,

    /// Captured audio clip with summary statistics
    pub audio: Option<AudioClip>,

    /// Metadata from the trigger event that started the run
    pub trigger: TriggerInfo,

    /// One entry per source that failed to produce a value, in slot order
    pub warnings: Vec<CollectionWarning>,
}

/// The foldable slots of a snapshot, in fold order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotField {
    Location,
    Network,
    Motion,
    Magnetic,
    Pressure,
    AmbientLight,
    Proximity,
    Steps,
    Thermal,
    Battery,
    System,
    Audio,
}

impl std::fmt::Display for SnapshotField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Location => "location",
            Self::Network => "network",
            Self::Motion => "motion",
            Self::Magnetic => "magnetic",
            Self::Pressure => "pressure",
            Self::AmbientLight => "ambient_light",
            Self::Proximity => "proximity",
            Self::Steps => "steps",
            Self::Thermal => "thermal",
            Self::Battery => "battery",
            Self::System => "system",
            Self::Audio => "audio",
        };
        write!(f, "{}", name)
    }
}

/// A source that failed to contribute to the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionWarning {
    /// Which slot stayed empty
    pub field: SnapshotField,

    /// Human-readable reason
    pub reason: String,
}

/// Best-effort coordinates plus optional reverse-geocoded address.
///
/// Coordinate and address availability are independent: a failed geocode
/// leaves `address` empty without touching the fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    pub latitude: f64,
    pub longitude: f64,

    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,

    /// Altitude above sea level in meters, if the fix carried one
    pub altitude_m: Option<f64>,

    /// When the fix was measured
    pub fix_time: DateTime<Utc>,

    /// Reverse-geocoded postal address, if the lookup succeeded
    pub address: Option<PostalAddress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub street: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
}

/// Where a network address came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum NetworkOrigin {
    /// Read directly from a local interface
    LocalInterface { interface: String },
    /// Resolved through one request to a public echo endpoint
    PublicEcho,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    /// Textual IP address
    pub address: String,

    /// How the address was obtained
    pub origin: NetworkOrigin,
}

/// One inertial sample, stamped relative to subscription start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Milliseconds since sampling started
    pub offset_ms: u64,

    /// Acceleration x/y/z in g
    pub accel: [f64; 3],

    /// Rotation rate x/y/z in rad/s
    pub gyro: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionSeries {
    /// Configured sample rate
    pub rate_hz: u32,

    /// Samples in arrival order; may be shorter than configured if the
    /// safety-net timeout fired first
    pub samples: Vec<MotionSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MagneticReading {
    /// Field strength x/y/z in microtesla
    pub field_ut: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PressureReading {
    /// Pressure in hectopascal
    pub pressure_hpa: f64,

    /// Altitude in meters derived from the standard barometric formula
    pub altitude_m: f64,

    /// True when the value is a proxy estimate, not a barometer measurement
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientLightReading {
    /// Illuminance in lux
    pub lux: f64,

    /// True when derived from an adjacent signal (e.g. screen backlight)
    /// rather than a dedicated light sensor
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProximityReading {
    /// Object detected near the sensor
    pub near: bool,

    /// Raw sensor level, device-specific units
    pub level: Option<f64>,
}

/// Step count over a trailing window ending at the query instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepWindow {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalZone {
    /// Zone name as reported by the platform
    pub zone: String,

    /// Temperature in degrees Celsius
    pub temp_c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalReading {
    pub zones: Vec<ThermalZone>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    Charging,
    Discharging,
    Full,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryReading {
    /// Charge percent, 0-100
    pub percent: u8,

    pub state: ChargeState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReading {
    /// Used RAM in MB
    pub mem_used_mb: u64,

    /// Total RAM in MB
    pub mem_total_mb: u64,

    /// 1-minute load average
    pub load_avg_1min: f64,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub hostname: Option<String>,

    pub os: Option<String>,
}

/// Summary statistics over a captured clip, amplitudes normalized to 0.0-1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioStats {
    pub mean_amplitude: f64,
    pub peak_amplitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,

    /// Raw PCM samples; the scratch file they were staged in is deleted
    /// before the clip is emitted
    pub samples: Vec<i16>,

    pub stats: AudioStats,
}

/// Usage category assigned by the classification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Commute,
    Work,
    Home,
    Errand,
    Leisure,
    Unknown,
}

/// Decoded trigger parameters that seeded the run.
///
/// The engine consumes the decoded key/value map only; transport-level tag
/// encoding is the trigger source's problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInfo {
    /// App that routed the trigger, if reported
    pub source_app: Option<String>,

    /// Raw external tag token
    pub tag_token: Option<String>,

    /// Tag UID, if the trigger source decoded one
    pub tag_uid: Option<String>,

    pub wifi: bool,
    pub silent: bool,
    pub auto_exit: bool,

    /// Category assigned by the usage classifier
    pub usage: Option<UsageCategory>,

    /// Milliseconds from trigger receipt to snapshot assembly
    pub trigger_elapsed_ms: u64,
}

impl TriggerInfo {
    /// Parse the decoded trigger parameter map (`sourceApp`, `nfc`, `uid`,
    /// `wifi`, `silent`, `autoExit`).
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let flag = |key: &str| {
            params
                .get(key)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
        };

        Self {
            source_app: params.get("sourceApp").cloned(),
            tag_token: params.get("nfc").cloned(),
            tag_uid: params.get("uid").cloned(),
            wifi: flag("wifi"),
            silent: flag("silent"),
            auto_exit: flag("autoExit"),
            usage: None,
            trigger_elapsed_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_params_parse_flags_and_strings() {
        let mut params = HashMap::new();
        params.insert("sourceApp".to_string(), "com.example.maps".to_string());
        params.insert("nfc".to_string(), "tag-0421".to_string());
        params.insert("wifi".to_string(), "true".to_string());
        params.insert("silent".to_string(), "1".to_string());
        params.insert("autoExit".to_string(), "no".to_string());

        let trigger = TriggerInfo::from_params(&params);
        assert_eq!(trigger.source_app.as_deref(), Some("com.example.maps"));
        assert_eq!(trigger.tag_token.as_deref(), Some("tag-0421"));
        assert!(trigger.tag_uid.is_none());
        assert!(trigger.wifi);
        assert!(trigger.silent);
        assert!(!trigger.auto_exit);
    }

    #[test]
    fn snapshot_field_display_names_are_stable() {
        assert_eq!(SnapshotField::AmbientLight.to_string(), "ambient_light");
        assert_eq!(SnapshotField::Audio.to_string(), "audio");
    }

    #[test]
    fn snapshot_serializes_and_restores() {
        let snapshot = SessionSnapshot {
            id: Uuid::nil(),
            timestamp: DateTime::parse_from_rfc3339("2026-08-06T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            location: None,
            network: Some(NetworkIdentity {
                address: "192.168.1.20".to_string(),
                origin: NetworkOrigin::LocalInterface {
                    interface: "wlan0".to_string(),
                },
            }),
            motion: None,
            magnetic: None,
            pressure: None,
            ambient_light: Some(AmbientLightReading {
                lux: 120.0,
                estimated: true,
            }),
            proximity: None,
            steps: None,
            thermal: None,
            battery: None,
            system: None,
            audio: None,
            trigger: TriggerInfo::from_params(&HashMap::new()),
            warnings: vec![CollectionWarning {
                field: SnapshotField::Location,
                reason: "location permission denied".to_string(),
            }],
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, snapshot);
    }
}
