//! Snapshot orchestrator: fan out every acquirer, join under a global
//! deadline, fold the terminal results into one immutable snapshot.
//!
//! The run walks Idle -> Collecting -> Assembling -> Complete. Joining is
//! "wait for all, bounded by a ceiling": no acquirer's slowness blocks
//! another's result, stragglers at the deadline are cancelled and recorded
//! as timed out, and the fold cannot fail - absence is encoded, not thrown.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use taplog_common::{
    AcquisitionResult, CollectConfig, CollectPhase, CollectionWarning, LocationReading,
    MotionSeries, NetworkIdentity, ProgressEvent, SessionSnapshot, SnapshotField, TaplogError,
    TriggerInfo, UsageCategory,
};

use crate::acquire::{
    AudioAcquirer, EnvironmentAcquirer, EnvironmentReport, LocationAcquirer, MotionAcquirer,
    NetworkAcquirer,
};
use crate::classify::UsageClassifier;
use crate::platform::{
    AudioInput, Geocoder, LocalAddressSource, LocationSource, MotionSource, PermissionProvider,
    PublicAddressEcho, SensorHost, StepSource,
};
use crate::store::SnapshotStore;

/// Everything one run needs, injected at construction. No acquirer reads
/// ambient global state; sources live exactly as long as their run.
pub struct RunContext {
    pub config: CollectConfig,
    pub permissions: Arc<dyn PermissionProvider>,
    pub location: Arc<dyn LocationSource>,
    pub geocoder: Arc<dyn Geocoder>,
    pub motion: Arc<dyn MotionSource>,
    pub sensors: Arc<dyn SensorHost>,
    pub steps: Arc<dyn StepSource>,
    pub audio: Arc<dyn AudioInput>,
    pub local_addr: Arc<dyn LocalAddressSource>,
    pub echo: Arc<dyn PublicAddressEcho>,
    pub store: Arc<dyn SnapshotStore>,
    pub classifier: Arc<dyn UsageClassifier>,
    pub scratch_dir: PathBuf,
}

/// Terminal results of the four concurrent acquirers.
#[derive(Debug, Clone)]
pub struct RunResults {
    pub location: AcquisitionResult<LocationReading>,
    pub network: AcquisitionResult<NetworkIdentity>,
    pub motion: AcquisitionResult<MotionSeries>,
    pub environment: EnvironmentReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Location,
    Network,
    Motion,
    Environment,
}

enum Report {
    Location(AcquisitionResult<LocationReading>),
    Network(AcquisitionResult<NetworkIdentity>),
    Motion(AcquisitionResult<MotionSeries>),
    Environment(Box<EnvironmentReport>),
}

/// Results as they land; anything still empty when the run leaves
/// Collecting is recorded as timed out.
#[derive(Default)]
struct Gathered {
    location: Option<AcquisitionResult<LocationReading>>,
    network: Option<AcquisitionResult<NetworkIdentity>>,
    motion: Option<AcquisitionResult<MotionSeries>>,
    environment: Option<EnvironmentReport>,
}

impl Gathered {
    fn put(&mut self, report: Report) {
        match report {
            Report::Location(result) => self.location = Some(result),
            Report::Network(result) => self.network = Some(result),
            Report::Motion(result) => self.motion = Some(result),
            Report::Environment(report) => self.environment = Some(*report),
        }
    }

    fn fail_slot(&mut self, slot: Slot, reason: &str) {
        match slot {
            Slot::Location => self.location = Some(AcquisitionResult::unavailable(reason)),
            Slot::Network => self.network = Some(AcquisitionResult::unavailable(reason)),
            Slot::Motion => self.motion = Some(AcquisitionResult::unavailable(reason)),
            Slot::Environment => self.environment = Some(EnvironmentReport::all_timed_out()),
        }
    }

    fn into_results(self) -> RunResults {
        RunResults {
            location: self.location.unwrap_or(AcquisitionResult::TimedOut),
            network: self.network.unwrap_or(AcquisitionResult::TimedOut),
            motion: self.motion.unwrap_or(AcquisitionResult::TimedOut),
            environment: self
                .environment
                .unwrap_or_else(EnvironmentReport::all_timed_out),
        }
    }
}

/// Releases the admission flag however the run exits.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub struct SnapshotOrchestrator {
    ctx: RunContext,
    run_active: AtomicBool,
    progress_tx: watch::Sender<ProgressEvent>,
}

impl SnapshotOrchestrator {
    pub fn new(ctx: RunContext) -> Self {
        let (progress_tx, _) = watch::channel(ProgressEvent::idle());
        Self {
            ctx,
            run_active: AtomicBool::new(false),
            progress_tx,
        }
    }

    /// Latest-phase progress stream; lossy by design.
    pub fn progress(&self) -> watch::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Run one collection for the given decoded trigger parameters.
    ///
    /// Exactly one run at a time: a trigger arriving while a run is active
    /// (notably while its audio capture still owns the scratch file) is
    /// rejected, not queued.
    pub async fn collect(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<SessionSnapshot, TaplogError> {
        if self
            .run_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TaplogError::RunInProgress);
        }
        let _guard = RunGuard {
            flag: &self.run_active,
        };

        let started = std::time::Instant::now();
        let timestamp = Utc::now();
        let id = Uuid::new_v4();
        let trigger = TriggerInfo::from_params(params);

        info!(
            "collection run {} triggered by {}",
            id,
            trigger.source_app.as_deref().unwrap_or("unknown")
        );
        self.publish(CollectPhase::Collecting, "starting acquirers", started);

        let deadline = tokio::time::Instant::now() + self.deadline_budget();
        let mut join_set = JoinSet::new();
        let mut slots: HashMap<tokio::task::Id, Slot> = HashMap::new();

        {
            let ctx = &self.ctx;

            let location = LocationAcquirer::new(
                ctx.config.location.clone(),
                ctx.permissions.clone(),
                ctx.location.clone(),
                ctx.geocoder.clone(),
            );
            let handle =
                join_set.spawn(async move { Report::Location(location.acquire().await) });
            slots.insert(handle.id(), Slot::Location);

            let network = NetworkAcquirer::new(
                ctx.config.network.clone(),
                ctx.local_addr.clone(),
                ctx.echo.clone(),
            );
            let handle = join_set.spawn(async move { Report::Network(network.acquire().await) });
            slots.insert(handle.id(), Slot::Network);

            let motion = MotionAcquirer::new(ctx.config.motion.clone(), ctx.motion.clone());
            let handle = join_set.spawn(async move { Report::Motion(motion.acquire().await) });
            slots.insert(handle.id(), Slot::Motion);

            let audio = AudioAcquirer::new(
                ctx.config.audio.clone(),
                ctx.permissions.clone(),
                ctx.audio.clone(),
                ctx.scratch_dir.clone(),
            );
            let environment = EnvironmentAcquirer::new(
                ctx.sensors.clone(),
                ctx.steps.clone(),
                audio,
                ctx.config.sensor_timeout(),
            );
            let handle = join_set
                .spawn(async move { Report::Environment(Box::new(environment.acquire().await)) });
            slots.insert(handle.id(), Slot::Environment);
        }

        let total = slots.len();
        let mut gathered = Gathered::default();

        while !join_set.is_empty() {
            match tokio::time::timeout_at(deadline, join_set.join_next_with_id()).await {
                Ok(Some(Ok((task_id, report)))) => {
                    slots.remove(&task_id);
                    gathered.put(report);
                    self.publish(
                        CollectPhase::Collecting,
                        format!("{}/{} acquirers done", total - slots.len(), total),
                        started,
                    );
                }
                Ok(Some(Err(join_err))) => {
                    // A panicking acquirer costs its own slot, nothing else.
                    if let Some(slot) = slots.remove(&join_err.id()) {
                        warn!("acquirer {:?} failed: {}", slot, join_err);
                        if join_err.is_panic() {
                            gathered.fail_slot(slot, "acquirer panicked");
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Global deadline: cancel stragglers and move on without
                    // waiting for them to acknowledge.
                    warn!(
                        "global deadline reached; cancelling {} straggler(s)",
                        join_set.len()
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        self.publish(CollectPhase::Assembling, "folding results", started);
        let usage = Some(self.ctx.classifier.classify(&trigger));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let snapshot = assemble_snapshot(
            id,
            timestamp,
            trigger,
            usage,
            elapsed_ms,
            gathered.into_results(),
        );

        self.publish(CollectPhase::Storing, "persisting snapshot", started);
        self.ctx.store.store(&snapshot).await?;

        self.publish(
            CollectPhase::Complete,
            format!("{} warning(s)", snapshot.warnings.len()),
            started,
        );
        info!(
            "collection run {} complete: {} warning(s) in {} ms",
            id,
            snapshot.warnings.len(),
            elapsed_ms
        );

        Ok(snapshot)
    }

    /// Ceiling for the Collecting phase: the slowest acquirer budget plus
    /// the grace margin.
    fn deadline_budget(&self) -> Duration {
        let config = &self.ctx.config;
        let location = config.location_wait()
            + Duration::from_secs_f64(config.location.geocode_timeout_secs);
        let motion = config.motion_duration() + Duration::from_secs(1);
        let environment = (config.audio_duration() + Duration::from_secs(1))
            .max(config.sensor_timeout());
        let network = config.echo_timeout();

        location
            .max(motion)
            .max(environment)
            .max(network)
            + config.grace()
    }

    fn publish(&self, phase: CollectPhase, detail: impl Into<String>, started: std::time::Instant) {
        self.progress_tx.send_replace(ProgressEvent::phase(
            phase,
            detail,
            started.elapsed().as_millis() as u64,
        ));
    }
}

/// Fold terminal results into the snapshot. Pure: same inputs, same
/// snapshot - every clock read happens before this point.
pub fn assemble_snapshot(
    id: Uuid,
    timestamp: DateTime<Utc>,
    mut trigger: TriggerInfo,
    usage: Option<UsageCategory>,
    elapsed_ms: u64,
    results: RunResults,
) -> SessionSnapshot {
    trigger.usage = usage;
    trigger.trigger_elapsed_ms = elapsed_ms;

    let mut warnings = Vec::new();
    let mut warn_if_empty = |field: SnapshotField, reason: Option<String>| {
        if let Some(reason) = reason {
            warnings.push(CollectionWarning { field, reason });
        }
    };

    let RunResults {
        location,
        network,
        motion,
        environment,
    } = results;

    warn_if_empty(SnapshotField::Location, location.warning_reason());
    warn_if_empty(SnapshotField::Network, network.warning_reason());
    warn_if_empty(SnapshotField::Motion, motion.warning_reason());
    warn_if_empty(SnapshotField::Magnetic, environment.magnetic.warning_reason());
    warn_if_empty(SnapshotField::Pressure, environment.pressure.warning_reason());
    warn_if_empty(
        SnapshotField::AmbientLight,
        environment.ambient_light.warning_reason(),
    );
    warn_if_empty(
        SnapshotField::Proximity,
        environment.proximity.warning_reason(),
    );
    warn_if_empty(SnapshotField::Steps, environment.steps.warning_reason());
    warn_if_empty(SnapshotField::Thermal, environment.thermal.warning_reason());
    warn_if_empty(SnapshotField::Battery, environment.battery.warning_reason());
    warn_if_empty(SnapshotField::System, environment.system.warning_reason());
    warn_if_empty(SnapshotField::Audio, environment.audio.warning_reason());

    SessionSnapshot {
        id,
        timestamp,
        location: location.into_value(),
        network: network.into_value(),
        motion: motion.into_value(),
        magnetic: environment.magnetic.into_value(),
        pressure: environment.pressure.into_value(),
        ambient_light: environment.ambient_light.into_value(),
        proximity: environment.proximity.into_value(),
        steps: environment.steps.into_value(),
        thermal: environment.thermal.into_value(),
        battery: environment.battery.into_value(),
        system: environment.system.into_value(),
        audio: environment.audio.into_value(),
        trigger,
        warnings,
    }
}
