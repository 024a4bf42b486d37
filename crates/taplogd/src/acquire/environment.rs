//! Environment acquisition: a registry of independent sub-acquisitions.
//!
//! All reads are instantaneous except the audio capture, whose configured
//! duration sets the floor on the group's completion time. Every
//! sub-acquisition runs as its own cancellable operation; none depends on
//! another.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use taplog_common::{
    AcquisitionResult, AmbientLightReading, AudioClip, BatteryReading, MagneticReading,
    PressureReading, ProximityReading, StepWindow, SystemReading, ThermalReading,
};

use crate::acquire::AudioAcquirer;
use crate::op::{OpOutcome, OperationHandle};
use crate::platform::{SensorHost, StepSource};

/// Trailing step-count window, ending at the query instant.
const STEP_WINDOW_MINUTES: i64 = 10;

/// Terminal results of every environment sub-acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentReport {
    pub magnetic: AcquisitionResult<MagneticReading>,
    pub pressure: AcquisitionResult<PressureReading>,
    pub ambient_light: AcquisitionResult<AmbientLightReading>,
    pub proximity: AcquisitionResult<ProximityReading>,
    pub steps: AcquisitionResult<StepWindow>,
    pub thermal: AcquisitionResult<ThermalReading>,
    pub battery: AcquisitionResult<BatteryReading>,
    pub system: AcquisitionResult<SystemReading>,
    pub audio: AcquisitionResult<AudioClip>,
}

impl EnvironmentReport {
    /// The whole group missed the global deadline.
    pub fn all_timed_out() -> Self {
        Self {
            magnetic: AcquisitionResult::TimedOut,
            pressure: AcquisitionResult::TimedOut,
            ambient_light: AcquisitionResult::TimedOut,
            proximity: AcquisitionResult::TimedOut,
            steps: AcquisitionResult::TimedOut,
            thermal: AcquisitionResult::TimedOut,
            battery: AcquisitionResult::TimedOut,
            system: AcquisitionResult::TimedOut,
            audio: AcquisitionResult::TimedOut,
        }
    }
}

pub struct EnvironmentAcquirer {
    sensors: Arc<dyn SensorHost>,
    steps: Arc<dyn StepSource>,
    audio: AudioAcquirer,
    read_timeout: Duration,
}

impl EnvironmentAcquirer {
    pub fn new(
        sensors: Arc<dyn SensorHost>,
        steps: Arc<dyn StepSource>,
        audio: AudioAcquirer,
        read_timeout: Duration,
    ) -> Self {
        Self {
            sensors,
            steps,
            audio,
            read_timeout,
        }
    }

    pub async fn acquire(&self) -> EnvironmentReport {
        let (magnetic, pressure, ambient_light, proximity, steps, thermal, battery, system, audio) =
            tokio::join!(
                self.read("magnetic", |host| host.magnetic()),
                self.read("pressure", |host| host.pressure()),
                self.read("ambient light", |host| host.ambient_light()),
                self.read("proximity", |host| host.proximity()),
                self.step_window(),
                self.read("thermal", |host| host.thermal()),
                self.read("battery", |host| host.battery()),
                self.read("system", |host| host.system().map(Some)),
                self.audio.acquire(),
            );

        EnvironmentReport {
            magnetic,
            pressure,
            ambient_light,
            proximity,
            steps,
            thermal,
            battery,
            system,
            audio,
        }
    }

    /// One instantaneous read wrapped as a cancellable operation on the
    /// blocking pool.
    async fn read<T, F>(&self, name: &'static str, f: F) -> AcquisitionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SensorHost) -> anyhow::Result<Option<T>> + Send + 'static,
    {
        let host = self.sensors.clone();
        let handle = OperationHandle::start(self.read_timeout, move |completer| {
            tokio::task::spawn_blocking(move || match f(host.as_ref()) {
                Ok(Some(value)) => completer.complete(value),
                Ok(None) => completer.fail(format!("no {} sensor", name)),
                Err(e) => {
                    warn!("{} read fault: {}", name, e);
                    completer.fail(format!("{} read failed", name));
                }
            });
            Ok(Box::new(|| {}) as crate::op::Cleanup)
        });

        match handle.wait().await {
            OpOutcome::Completed(value) => AcquisitionResult::Value(value),
            OpOutcome::Failed(reason) => AcquisitionResult::unavailable(reason),
            OpOutcome::TimedOut | OpOutcome::Cancelled => AcquisitionResult::TimedOut,
        }
    }

    /// Step count over the trailing window ending at "now" - anchored to the
    /// query instant, not to when the run started.
    async fn step_window(&self) -> AcquisitionResult<StepWindow> {
        let end = Utc::now();
        let start = end - ChronoDuration::minutes(STEP_WINDOW_MINUTES);
        let steps = self.steps.clone();

        let handle = OperationHandle::start(self.read_timeout, move |completer| {
            tokio::task::spawn_blocking(move || match steps.steps_between(start, end) {
                Ok(Some(count)) => completer.complete(StepWindow {
                    count,
                    window_start: start,
                    window_end: end,
                }),
                Ok(None) => completer.fail("no step counter"),
                Err(e) => {
                    warn!("step counter fault: {}", e);
                    completer.fail("step counter failed");
                }
            });
            Ok(Box::new(|| {}) as crate::op::Cleanup)
        });

        match handle.wait().await {
            OpOutcome::Completed(window) => AcquisitionResult::Value(window),
            OpOutcome::Failed(reason) => AcquisitionResult::unavailable(reason),
            OpOutcome::TimedOut | OpOutcome::Cancelled => AcquisitionResult::TimedOut,
        }
    }
}
