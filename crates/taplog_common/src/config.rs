//! Collection configuration.
//!
//! Loaded from a TOML file or defaulted. Every knob has a serde default so a
//! partial file stays valid, and out-of-range durations are clamped on load
//! rather than rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Desired location accuracy tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    Best,
    TenMeters,
    HundredMeters,
}

impl Default for AccuracyTier {
    fn default() -> Self {
        Self::TenMeters
    }
}

impl AccuracyTier {
    /// Accuracy radius a fix must satisfy to resolve before the timeout.
    pub fn threshold_m(self) -> f64 {
        match self {
            Self::Best => 5.0,
            Self::TenMeters => 10.0,
            Self::HundredMeters => 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Accuracy tier a live fix must satisfy
    #[serde(default)]
    pub accuracy: AccuracyTier,

    /// Longest wait for a satisfying fix before degrading
    #[serde(default = "default_location_wait")]
    pub max_wait_secs: f64,

    /// Oldest acceptable age for a last-known fix; anything older is
    /// treated as no fix at all
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,

    /// Allowance for the single reverse-geocode lookup
    #[serde(default = "default_geocode_timeout")]
    pub geocode_timeout_secs: f64,
}

fn default_location_wait() -> f64 {
    8.0
}

fn default_staleness() -> u64 {
    120
}

fn default_geocode_timeout() -> f64 {
    5.0
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            accuracy: AccuracyTier::default(),
            max_wait_secs: default_location_wait(),
            staleness_secs: default_staleness(),
            geocode_timeout_secs: default_geocode_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Sampling duration in seconds, clamped to 1-10
    #[serde(default = "default_motion_duration")]
    pub duration_secs: f64,
}

fn default_motion_duration() -> f64 {
    5.0
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_motion_duration(),
        }
    }
}

/// Fixed inertial sample rate.
pub const MOTION_SAMPLE_RATE_HZ: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capture duration in seconds, clamped to 1-10
    #[serde(default = "default_audio_duration")]
    pub duration_secs: f64,
}

fn default_audio_duration() -> f64 {
    3.0
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_audio_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Designated interface to read a local address from
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Public "echo my address" endpoint, attempted once as fallback
    #[serde(default = "default_echo_url")]
    pub echo_url: String,

    /// Timeout for the single echo request
    #[serde(default = "default_echo_timeout")]
    pub echo_timeout_secs: f64,
}

fn default_interface() -> String {
    "wlan0".to_string()
}

fn default_echo_url() -> String {
    "https://api.ipify.org".to_string()
}

fn default_echo_timeout() -> f64 {
    4.0
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            echo_url: default_echo_url(),
            echo_timeout_secs: default_echo_timeout(),
        }
    }
}

/// Top-level collection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectConfig {
    #[serde(default)]
    pub location: LocationConfig,

    #[serde(default)]
    pub motion: MotionConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    /// Timeout for each instantaneous environment read
    #[serde(default = "default_sensor_timeout")]
    pub sensor_timeout_secs: f64,

    /// Grace margin added to the slowest acquirer budget to form the
    /// global deadline
    #[serde(default = "default_grace")]
    pub grace_secs: f64,
}

fn default_sensor_timeout() -> f64 {
    2.0
}

fn default_grace() -> f64 {
    2.0
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            location: LocationConfig::default(),
            motion: MotionConfig::default(),
            audio: AudioConfig::default(),
            network: NetworkConfig::default(),
            sensor_timeout_secs: default_sensor_timeout(),
            grace_secs: default_grace(),
        }
    }
}

impl CollectConfig {
    /// Load from a TOML file, applying clamps.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.clamp();
        Ok(config)
    }

    /// Clamp durations into their supported ranges.
    pub fn clamp(&mut self) {
        self.motion.duration_secs = self.motion.duration_secs.clamp(1.0, 10.0);
        self.audio.duration_secs = self.audio.duration_secs.clamp(1.0, 10.0);
        if self.location.max_wait_secs <= 0.0 {
            self.location.max_wait_secs = default_location_wait();
        }
        if self.sensor_timeout_secs <= 0.0 {
            self.sensor_timeout_secs = default_sensor_timeout();
        }
        if self.grace_secs < 0.0 {
            self.grace_secs = default_grace();
        }
    }

    pub fn motion_duration(&self) -> Duration {
        Duration::from_secs_f64(self.motion.duration_secs)
    }

    pub fn audio_duration(&self) -> Duration {
        Duration::from_secs_f64(self.audio.duration_secs)
    }

    pub fn location_wait(&self) -> Duration {
        Duration::from_secs_f64(self.location.max_wait_secs)
    }

    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sensor_timeout_secs)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.network.echo_timeout_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs_f64(self.grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = CollectConfig::default();
        assert_eq!(config.motion.duration_secs, 5.0);
        assert_eq!(config.audio.duration_secs, 3.0);
        assert_eq!(config.location.staleness_secs, 120);
        assert_eq!(config.location.accuracy, AccuracyTier::TenMeters);
    }

    #[test]
    fn clamp_bounds_durations() {
        let mut config = CollectConfig::default();
        config.motion.duration_secs = 42.0;
        config.audio.duration_secs = 0.2;
        config.clamp();
        assert_eq!(config.motion.duration_secs, 10.0);
        assert_eq!(config.audio.duration_secs, 1.0);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[audio]\nduration_secs = 6.0").unwrap();

        let config = CollectConfig::load(file.path()).unwrap();
        assert_eq!(config.audio.duration_secs, 6.0);
        assert_eq!(config.motion.duration_secs, 5.0);
        assert_eq!(config.network.interface, "wlan0");
    }

    #[test]
    fn accuracy_thresholds() {
        assert_eq!(AccuracyTier::Best.threshold_m(), 5.0);
        assert_eq!(AccuracyTier::TenMeters.threshold_m(), 10.0);
        assert_eq!(AccuracyTier::HundredMeters.threshold_m(), 100.0);
    }
}
