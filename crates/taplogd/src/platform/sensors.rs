//! Environment sensor host.
//!
//! Instantaneous reads behind one trait. The Linux implementation probes the
//! IIO subsystem for magnetometer/barometer/light/proximity channels and
//! falls back to `/sys` and sysinfo for the rest; a missing device is
//! reported as absent (`Ok(None)`), never as an error.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::System;

use taplog_common::{
    AmbientLightReading, BatteryReading, ChargeState, MagneticReading, PressureReading,
    ProximityReading, SystemReading, ThermalReading, ThermalZone,
};

/// Instantaneous environment reads. `Ok(None)` means the host has no such
/// device; `Err` is a genuine read fault.
pub trait SensorHost: Send + Sync {
    fn magnetic(&self) -> anyhow::Result<Option<MagneticReading>>;
    fn pressure(&self) -> anyhow::Result<Option<PressureReading>>;
    fn ambient_light(&self) -> anyhow::Result<Option<AmbientLightReading>>;
    fn proximity(&self) -> anyhow::Result<Option<ProximityReading>>;
    fn thermal(&self) -> anyhow::Result<Option<ThermalReading>>;
    fn battery(&self) -> anyhow::Result<Option<BatteryReading>>;
    fn system(&self) -> anyhow::Result<SystemReading>;
}

/// Step counter over a trailing window ending at `end`.
pub trait StepSource: Send + Sync {
    fn steps_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Option<u32>>;
}

/// Hosts without a pedometer.
pub struct NoStepCounter;

impl StepSource for NoStepCounter {
    fn steps_between(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> anyhow::Result<Option<u32>> {
        Ok(None)
    }
}

/// Linux sensor host over IIO, `/sys`, `/proc`, and sysinfo.
pub struct LinuxSensorHost {
    iio_root: PathBuf,
    sys_root: PathBuf,
}

impl LinuxSensorHost {
    pub fn new() -> Self {
        Self {
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
            sys_root: PathBuf::from("/sys/class"),
        }
    }

    /// Rooted elsewhere for tests against a fabricated sysfs tree.
    pub fn with_roots(iio_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            iio_root: iio_root.into(),
            sys_root: sys_root.into(),
        }
    }

    /// First IIO device directory exposing `marker`.
    fn iio_device_with(&self, marker: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.iio_root).ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if dir.join(marker).exists() {
                return Some(dir);
            }
        }
        None
    }
}

fn read_f64(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

impl Default for LinuxSensorHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorHost for LinuxSensorHost {
    fn magnetic(&self) -> anyhow::Result<Option<MagneticReading>> {
        let dir = match self.iio_device_with("in_magn_x_raw") {
            Some(dir) => dir,
            None => return Ok(None),
        };
        // IIO magnetometer scale yields Gauss; report microtesla.
        let scale = read_f64(&dir.join("in_magn_scale")).unwrap_or(1.0);
        let axis = |name: &str| {
            read_f64(&dir.join(format!("in_magn_{}_raw", name))).unwrap_or(0.0) * scale * 100.0
        };
        Ok(Some(MagneticReading {
            field_ut: [axis("x"), axis("y"), axis("z")],
        }))
    }

    fn pressure(&self) -> anyhow::Result<Option<PressureReading>> {
        let dir = match self.iio_device_with("in_pressure_input") {
            Some(dir) => dir,
            None => return Ok(None),
        };
        // IIO reports kilopascal.
        let kpa = match read_f64(&dir.join("in_pressure_input")) {
            Some(v) => v,
            None => return Ok(None),
        };
        let hpa = kpa * 10.0;
        // International barometric formula; the altitude is derived, the
        // pressure itself is a real measurement.
        let altitude_m = 44_330.0 * (1.0 - (hpa / 1013.25).powf(0.190_3));
        Ok(Some(PressureReading {
            pressure_hpa: hpa,
            altitude_m,
            estimated: false,
        }))
    }

    fn ambient_light(&self) -> anyhow::Result<Option<AmbientLightReading>> {
        if let Some(dir) = self.iio_device_with("in_illuminance_input") {
            if let Some(lux) = read_f64(&dir.join("in_illuminance_input")) {
                return Ok(Some(AmbientLightReading {
                    lux,
                    estimated: false,
                }));
            }
        }
        if let Some(dir) = self.iio_device_with("in_illuminance_raw") {
            let scale = read_f64(&dir.join("in_illuminance_scale")).unwrap_or(1.0);
            if let Some(raw) = read_f64(&dir.join("in_illuminance_raw")) {
                return Ok(Some(AmbientLightReading {
                    lux: raw * scale,
                    estimated: false,
                }));
            }
        }

        // No light sensor: estimate from screen backlight level. Marked as
        // an estimate so consumers never mistake it for a lux measurement.
        let backlight_root = self.sys_root.join("backlight");
        let entries = match std::fs::read_dir(&backlight_root) {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };
        for entry in entries.flatten() {
            let dir = entry.path();
            let brightness = read_f64(&dir.join("brightness"));
            let max = read_f64(&dir.join("max_brightness"));
            if let (Some(brightness), Some(max)) = (brightness, max) {
                if max > 0.0 {
                    return Ok(Some(AmbientLightReading {
                        lux: brightness / max * 400.0,
                        estimated: true,
                    }));
                }
            }
        }
        Ok(None)
    }

    fn proximity(&self) -> anyhow::Result<Option<ProximityReading>> {
        let dir = match self.iio_device_with("in_proximity_raw") {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let raw = match read_f64(&dir.join("in_proximity_raw")) {
            Some(v) => v,
            None => return Ok(None),
        };
        Ok(Some(ProximityReading {
            near: raw >= 1.0,
            level: Some(raw),
        }))
    }

    fn thermal(&self) -> anyhow::Result<Option<ThermalReading>> {
        let thermal_root = self.sys_root.join("thermal");
        let entries = match std::fs::read_dir(&thermal_root) {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        let mut zones = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.starts_with("thermal_zone") {
                continue;
            }
            if let Some(milli_c) = read_f64(&dir.join("temp")) {
                zones.push(ThermalZone {
                    zone: read_trimmed(&dir.join("type")).unwrap_or_else(|| name.to_string()),
                    temp_c: milli_c / 1000.0,
                });
            }
        }
        zones.sort_by(|a, b| a.zone.cmp(&b.zone));

        if zones.is_empty() {
            Ok(None)
        } else {
            Ok(Some(ThermalReading { zones }))
        }
    }

    fn battery(&self) -> anyhow::Result<Option<BatteryReading>> {
        let supply_root = self.sys_root.join("power_supply");
        let entries = match std::fs::read_dir(&supply_root) {
            Ok(entries) => entries,
            Err(_) => return Ok(None),
        };

        for entry in entries.flatten() {
            let dir = entry.path();
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !name.starts_with("BAT") {
                continue;
            }
            let percent = match read_f64(&dir.join("capacity")) {
                Some(v) => v.clamp(0.0, 100.0) as u8,
                None => continue,
            };
            let state = match read_trimmed(&dir.join("status")).as_deref() {
                Some("Charging") => ChargeState::Charging,
                Some("Discharging") => ChargeState::Discharging,
                Some("Full") => ChargeState::Full,
                _ => ChargeState::Unknown,
            };
            return Ok(Some(BatteryReading { percent, state }));
        }
        Ok(None)
    }

    fn system(&self) -> anyhow::Result<SystemReading> {
        let mut sys = System::new();
        sys.refresh_memory();

        let load_avg_1min = std::fs::read_to_string("/proc/loadavg")
            .ok()
            .and_then(|content| {
                content
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
            })
            .unwrap_or(0.0);

        let uptime_secs = std::fs::read_to_string("/proc/uptime")
            .ok()
            .and_then(|content| {
                content
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<f64>().ok())
            })
            .map(|s| s as u64)
            .unwrap_or(0);

        let os = std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|line| line.starts_with("PRETTY_NAME="))
                    .map(|line| {
                        line.trim_start_matches("PRETTY_NAME=")
                            .trim_matches('"')
                            .to_string()
                    })
            });

        Ok(SystemReading {
            mem_used_mb: sys.used_memory() / 1024 / 1024,
            mem_total_mb: sys.total_memory() / 1024 / 1024,
            load_avg_1min,
            uptime_secs,
            hostname: read_trimmed(Path::new("/etc/hostname")),
            os,
        })
    }
}

/// Configurable sensor host for tests. Each slot is either a value, absent,
/// or a fault.
#[derive(Default)]
pub struct FakeSensorHost {
    pub magnetic: Option<MagneticReading>,
    pub pressure: Option<PressureReading>,
    pub ambient_light: Option<AmbientLightReading>,
    pub proximity: Option<ProximityReading>,
    pub thermal: Option<ThermalReading>,
    pub battery: Option<BatteryReading>,
    pub system: Option<SystemReading>,
    /// Sensor names that should fail with a read fault.
    pub faults: Vec<&'static str>,
}

impl FakeSensorHost {
    /// A host where every sensor answers.
    pub fn fully_stocked() -> Self {
        Self {
            magnetic: Some(MagneticReading {
                field_ut: [21.0, -3.5, 44.2],
            }),
            pressure: Some(PressureReading {
                pressure_hpa: 1008.2,
                altitude_m: 42.0,
                estimated: false,
            }),
            ambient_light: Some(AmbientLightReading {
                lux: 312.0,
                estimated: false,
            }),
            proximity: Some(ProximityReading {
                near: false,
                level: Some(0.0),
            }),
            thermal: Some(ThermalReading {
                zones: vec![ThermalZone {
                    zone: "cpu".to_string(),
                    temp_c: 41.5,
                }],
            }),
            battery: Some(BatteryReading {
                percent: 81,
                state: ChargeState::Discharging,
            }),
            system: Some(SystemReading {
                mem_used_mb: 2048,
                mem_total_mb: 8192,
                load_avg_1min: 0.4,
                uptime_secs: 3600,
                hostname: Some("testhost".to_string()),
                os: Some("Test OS".to_string()),
            }),
            faults: Vec::new(),
        }
    }

    /// A host with no sensors at all.
    pub fn bare() -> Self {
        Self::default()
    }

    fn check_fault(&self, name: &str) -> anyhow::Result<()> {
        if self.faults.contains(&name) {
            anyhow::bail!("{} read fault", name);
        }
        Ok(())
    }
}

impl SensorHost for FakeSensorHost {
    fn magnetic(&self) -> anyhow::Result<Option<MagneticReading>> {
        self.check_fault("magnetic")?;
        Ok(self.magnetic.clone())
    }

    fn pressure(&self) -> anyhow::Result<Option<PressureReading>> {
        self.check_fault("pressure")?;
        Ok(self.pressure.clone())
    }

    fn ambient_light(&self) -> anyhow::Result<Option<AmbientLightReading>> {
        self.check_fault("ambient_light")?;
        Ok(self.ambient_light.clone())
    }

    fn proximity(&self) -> anyhow::Result<Option<ProximityReading>> {
        self.check_fault("proximity")?;
        Ok(self.proximity.clone())
    }

    fn thermal(&self) -> anyhow::Result<Option<ThermalReading>> {
        self.check_fault("thermal")?;
        Ok(self.thermal.clone())
    }

    fn battery(&self) -> anyhow::Result<Option<BatteryReading>> {
        self.check_fault("battery")?;
        Ok(self.battery.clone())
    }

    fn system(&self) -> anyhow::Result<SystemReading> {
        self.check_fault("system")?;
        self.system
            .clone()
            .ok_or_else(|| anyhow::anyhow!("system metrics unavailable"))
    }
}

/// Step log for tests: timestamped step batches, windowed on query.
pub struct FakeStepCounter {
    batches: Mutex<HashMap<i64, u32>>,
}

impl FakeStepCounter {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, at: DateTime<Utc>, steps: u32) {
        *self
            .batches
            .lock()
            .unwrap()
            .entry(at.timestamp())
            .or_insert(0) += steps;
    }
}

impl Default for FakeStepCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl StepSource for FakeStepCounter {
    fn steps_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Option<u32>> {
        let total = self
            .batches
            .lock()
            .unwrap()
            .iter()
            .filter(|(ts, _)| **ts >= start.timestamp() && **ts <= end.timestamp())
            .map(|(_, steps)| steps)
            .sum();
        Ok(Some(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linux_host_reads_fabricated_sysfs_tree() {
        let root = tempfile::tempdir().unwrap();
        let iio = root.path().join("iio");
        let sys = root.path().join("class");
        let device = iio.join("iio:device0");
        std::fs::create_dir_all(&device).unwrap();
        std::fs::write(device.join("in_magn_x_raw"), "100\n").unwrap();
        std::fs::write(device.join("in_magn_y_raw"), "-50\n").unwrap();
        std::fs::write(device.join("in_magn_z_raw"), "25\n").unwrap();
        std::fs::write(device.join("in_magn_scale"), "0.001\n").unwrap();

        let zone = sys.join("thermal/thermal_zone0");
        std::fs::create_dir_all(&zone).unwrap();
        std::fs::write(zone.join("temp"), "44500\n").unwrap();
        std::fs::write(zone.join("type"), "x86_pkg_temp\n").unwrap();

        let bat = sys.join("power_supply/BAT0");
        std::fs::create_dir_all(&bat).unwrap();
        std::fs::write(bat.join("capacity"), "73\n").unwrap();
        std::fs::write(bat.join("status"), "Charging\n").unwrap();

        let backlight = sys.join("backlight/intel_backlight");
        std::fs::create_dir_all(&backlight).unwrap();
        std::fs::write(backlight.join("brightness"), "500\n").unwrap();
        std::fs::write(backlight.join("max_brightness"), "1000\n").unwrap();

        let host = LinuxSensorHost::with_roots(&iio, &sys);

        let magnetic = host.magnetic().unwrap().unwrap();
        assert!((magnetic.field_ut[0] - 10.0).abs() < 1e-9);
        assert!((magnetic.field_ut[1] + 5.0).abs() < 1e-9);

        let thermal = host.thermal().unwrap().unwrap();
        assert_eq!(thermal.zones.len(), 1);
        assert_eq!(thermal.zones[0].zone, "x86_pkg_temp");
        assert!((thermal.zones[0].temp_c - 44.5).abs() < 1e-9);

        let battery = host.battery().unwrap().unwrap();
        assert_eq!(battery.percent, 73);
        assert_eq!(battery.state, ChargeState::Charging);

        // No light sensor in the tree: the backlight proxy kicks in and is
        // labeled as an estimate.
        let light = host.ambient_light().unwrap().unwrap();
        assert!(light.estimated);
        assert!((light.lux - 200.0).abs() < 1e-9);

        // Absent devices report None, not errors.
        assert!(host.pressure().unwrap().is_none());
        assert!(host.proximity().unwrap().is_none());
    }

    #[test]
    fn fake_step_counter_windows_batches() {
        let counter = FakeStepCounter::new();
        let now = Utc::now();
        counter.record(now - chrono::Duration::minutes(5), 120);
        counter.record(now - chrono::Duration::minutes(20), 900);

        let window_start = now - chrono::Duration::minutes(10);
        let steps = counter.steps_between(window_start, now).unwrap().unwrap();
        assert_eq!(steps, 120);
    }
}
