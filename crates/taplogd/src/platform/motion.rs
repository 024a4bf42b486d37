//! Inertial sample source seam.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// One raw inertial sample from the platform, unstamped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    /// Acceleration x/y/z in g
    pub accel: [f64; 3],
    /// Rotation rate x/y/z in rad/s; zero on hosts without a gyro
    pub gyro: [f64; 3],
}

pub type SampleCallback = Box<dyn Fn(InertialSample) + Send + Sync>;
pub type StopFn = Box<dyn FnOnce() + Send>;

/// Fixed-interval inertial sample source.
pub trait MotionSource: Send + Sync {
    /// Start delivering samples at `interval`; the returned closure stops
    /// the subscription.
    fn subscribe(&self, interval: Duration, on_sample: SampleCallback) -> anyhow::Result<StopFn>;
}

/// Accelerometer via the Linux industrial I/O subsystem.
///
/// Polls `in_accel_{x,y,z}_raw` at the requested interval on a dedicated
/// thread. Hosts without an IIO accelerometer fail `subscribe` and the
/// acquirer records `Unavailable`.
pub struct IioMotionSource {
    iio_root: PathBuf,
}

impl IioMotionSource {
    pub fn new() -> Self {
        Self {
            iio_root: PathBuf::from("/sys/bus/iio/devices"),
        }
    }

    pub fn with_root(iio_root: impl Into<PathBuf>) -> Self {
        Self {
            iio_root: iio_root.into(),
        }
    }

    fn accel_device(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.iio_root).ok()?;
        for entry in entries.flatten() {
            let dir = entry.path();
            if dir.join("in_accel_x_raw").exists() {
                return Some(dir);
            }
        }
        None
    }

    fn read_axis(dir: &Path, axis: &str, scale: f64) -> f64 {
        let raw = std::fs::read_to_string(dir.join(format!("in_accel_{}_raw", axis)))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        // IIO accel scale yields m/s^2; report g like the rest of the model.
        raw * scale / 9.80665
    }
}

impl Default for IioMotionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionSource for IioMotionSource {
    fn subscribe(&self, interval: Duration, on_sample: SampleCallback) -> anyhow::Result<StopFn> {
        let dir = self
            .accel_device()
            .ok_or_else(|| anyhow::anyhow!("no IIO accelerometer present"))?;

        let scale = std::fs::read_to_string(dir.join("in_accel_scale"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(1.0);

        debug!("IIO accelerometer at {}", dir.display());

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                let sample = InertialSample {
                    accel: [
                        Self::read_axis(&dir, "x", scale),
                        Self::read_axis(&dir, "y", scale),
                        Self::read_axis(&dir, "z", scale),
                    ],
                    gyro: [0.0; 3],
                };
                on_sample(sample);
                std::thread::sleep(interval);
            }
        });

        Ok(Box::new(move || {
            stopped.store(true, Ordering::SeqCst);
        }))
    }
}

/// Scripted motion source for tests.
pub struct FakeMotionSource {
    /// None simulates absent hardware: subscribe fails.
    available: bool,
    /// When true the source subscribes but never delivers a sample,
    /// exercising the safety-net timeout.
    mute: bool,
    pub subscribe_calls: AtomicUsize,
    pub stopped: Arc<AtomicBool>,
}

impl FakeMotionSource {
    pub fn steady() -> Self {
        Self {
            available: true,
            mute: false,
            subscribe_calls: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn absent() -> Self {
        Self {
            available: false,
            mute: false,
            subscribe_calls: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mute() -> Self {
        Self {
            available: true,
            mute: true,
            subscribe_calls: AtomicUsize::new(0),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl MotionSource for FakeMotionSource {
    fn subscribe(&self, interval: Duration, on_sample: SampleCallback) -> anyhow::Result<StopFn> {
        if !self.available {
            anyhow::bail!("motion sensor unavailable");
        }
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let stopped = self.stopped.clone();
        if !self.mute {
            let flag = stopped.clone();
            std::thread::spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    on_sample(InertialSample {
                        accel: [0.0, 0.0, 1.0],
                        gyro: [0.0; 3],
                    });
                    std::thread::sleep(interval);
                }
            });
        }

        Ok(Box::new(move || {
            stopped.store(true, Ordering::SeqCst);
        }))
    }
}
