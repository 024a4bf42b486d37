//! Orchestrator integration tests.
//!
//! Deterministic: every platform source is a fake. No hardware, no network.
//! These cover the joining semantics - wait for all bounded by a ceiling -
//! plus partial-failure completeness, run admission, and the pure fold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use taplog_common::{
    AccuracyTier, AcquisitionResult, AudioConfig, ChargeState, CollectConfig, CollectPhase,
    LocationConfig, LocationReading, MotionConfig, NetworkConfig, NetworkIdentity, NetworkOrigin,
    SnapshotField, TaplogError, TriggerInfo, UsageCategory,
};
use taplogd::acquire::EnvironmentReport;
use taplogd::classify::RuleClassifier;
use taplogd::orchestrator::{assemble_snapshot, RunContext, RunResults, SnapshotOrchestrator};
use taplogd::platform::location::{FixCallback, StopFn};
use taplogd::platform::{
    FakeAudioInput, FakeGeocoder, FakeLocalAddressSource, FakeLocationSource, FakeMotionSource,
    FakePublicAddressEcho, FakeSensorHost, FakeStepCounter, LocationSource, NoStepCounter,
    PermissionStatus, StaticPermissionProvider,
};
use taplogd::store::MemoryStore;

/// Everything short so a full run completes in well under a second.
fn test_config() -> CollectConfig {
    CollectConfig {
        location: LocationConfig {
            accuracy: AccuracyTier::TenMeters,
            max_wait_secs: 0.2,
            staleness_secs: 120,
            geocode_timeout_secs: 0.2,
        },
        motion: MotionConfig { duration_secs: 0.2 },
        audio: AudioConfig { duration_secs: 0.2 },
        network: NetworkConfig {
            interface: "wlan0".to_string(),
            echo_url: "http://echo.invalid".to_string(),
            echo_timeout_secs: 0.2,
        },
        sensor_timeout_secs: 0.5,
        grace_secs: 0.5,
    }
}

struct Harness {
    orchestrator: Arc<SnapshotOrchestrator>,
    store: Arc<MemoryStore>,
    _scratch: tempfile::TempDir,
}

/// A context where every source answers promptly.
fn harness(mutate: impl FnOnce(&mut RunContext)) -> Harness {
    let scratch = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let steps = FakeStepCounter::new();
    steps.record(chrono::Utc::now() - chrono::Duration::minutes(3), 180);

    let mut ctx = RunContext {
        config: test_config(),
        permissions: Arc::new(StaticPermissionProvider::granting_all()),
        location: Arc::new(FakeLocationSource::new(
            vec![FakeLocationSource::fix(59.9139, 10.7522, 5.0)],
            Duration::from_millis(10),
        )),
        geocoder: Arc::new(FakeGeocoder::answering(FakeGeocoder::sample_address())),
        motion: Arc::new(FakeMotionSource::steady()),
        sensors: Arc::new(FakeSensorHost::fully_stocked()),
        steps: Arc::new(steps),
        audio: Arc::new(FakeAudioInput::instant(1600)),
        local_addr: Arc::new(FakeLocalAddressSource::with("wlan0", "192.168.1.20")),
        echo: Arc::new(FakePublicAddressEcho::answering("203.0.113.9")),
        store: store.clone(),
        classifier: Arc::new(RuleClassifier),
        scratch_dir: scratch.path().to_path_buf(),
    };
    mutate(&mut ctx);

    Harness {
        orchestrator: Arc::new(SnapshotOrchestrator::new(ctx)),
        store,
        _scratch: scratch,
    }
}

fn trigger_params() -> HashMap<String, String> {
    let mut params = HashMap::new();
    params.insert("sourceApp".to_string(), "com.example.maps".to_string());
    params.insert("nfc".to_string(), "tag-0421".to_string());
    params.insert("wifi".to_string(), "1".to_string());
    params
}

fn warned_fields(snapshot: &taplog_common::SessionSnapshot) -> Vec<SnapshotField> {
    snapshot.warnings.iter().map(|w| w.field).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_run_populates_every_slot() {
    let h = harness(|_| {});
    let snapshot = h.orchestrator.collect(&trigger_params()).await.unwrap();

    assert!(snapshot.warnings.is_empty(), "{:?}", snapshot.warnings);
    assert!(snapshot.location.is_some());
    assert!(snapshot.network.is_some());
    assert!(snapshot.motion.is_some());
    assert!(snapshot.magnetic.is_some());
    assert!(snapshot.pressure.is_some());
    assert!(snapshot.ambient_light.is_some());
    assert!(snapshot.proximity.is_some());
    assert!(snapshot.steps.is_some());
    assert!(snapshot.thermal.is_some());
    assert!(snapshot.battery.is_some());
    assert!(snapshot.system.is_some());
    assert!(snapshot.audio.is_some());

    assert_eq!(snapshot.trigger.usage, Some(UsageCategory::Commute));
    assert!(snapshot.trigger.wifi);
    assert_eq!(h.store.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn partial_failure_yields_exact_warning_count() {
    // 11 of 12 sources fail; only the network answers.
    let h = harness(|ctx| {
        ctx.permissions = Arc::new(StaticPermissionProvider::new(
            PermissionStatus::Denied,
            PermissionStatus::Granted,
        ));
        ctx.motion = Arc::new(FakeMotionSource::absent());
        ctx.sensors = Arc::new(FakeSensorHost::bare());
        ctx.steps = Arc::new(NoStepCounter);
        ctx.audio = Arc::new(FakeAudioInput::unavailable());
    });

    let snapshot = h.orchestrator.collect(&trigger_params()).await.unwrap();

    assert_eq!(snapshot.warnings.len(), 11, "{:?}", snapshot.warnings);
    assert!(snapshot.network.is_some());
    assert!(snapshot.location.is_none());
    assert!(snapshot.motion.is_none());
    assert!(snapshot.audio.is_none());
    // Warnings land in slot order, location first, audio last.
    let fields = warned_fields(&snapshot);
    assert_eq!(fields.first(), Some(&SnapshotField::Location));
    assert_eq!(fields.last(), Some(&SnapshotField::Audio));
    // A mostly-empty run still stores a well-formed snapshot.
    assert_eq!(h.store.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn denied_location_absent_motion_audio_still_lands() {
    // Audio runs in near real time for 0.3 s; the run should take about
    // that long, not the sum of every budget.
    let h = harness(|ctx| {
        ctx.config.audio.duration_secs = 0.3;
        ctx.permissions = Arc::new(StaticPermissionProvider::new(
            PermissionStatus::Denied,
            PermissionStatus::Granted,
        ));
        ctx.motion = Arc::new(FakeMotionSource::absent());
        ctx.audio = Arc::new(FakeAudioInput::looping(
            vec![2000i16; 480],
            Duration::from_millis(30),
        ));
    });

    let started = Instant::now();
    let snapshot = h.orchestrator.collect(&trigger_params()).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        warned_fields(&snapshot),
        vec![SnapshotField::Location, SnapshotField::Motion]
    );
    let clip = snapshot.audio.expect("audio clip");
    assert!(clip.stats.peak_amplitude > 0.0);
    assert!(elapsed >= Duration::from_millis(280), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_time_is_bounded_by_slowest_acquirer_not_sum() {
    let h = harness(|ctx| {
        ctx.config.motion.duration_secs = 0.4;
    });

    let started = Instant::now();
    let snapshot = h.orchestrator.collect(&trigger_params()).await.unwrap();
    let elapsed = started.elapsed();

    assert!(snapshot.motion.is_some());
    assert!(elapsed >= Duration::from_millis(400), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1200), "took {:?}", elapsed);
}

/// A source that blocks inside subscribe far past every budget.
struct HangingLocationSource;

impl LocationSource for HangingLocationSource {
    fn is_enabled(&self) -> bool {
        true
    }

    fn subscribe(&self, _on_fix: FixCallback) -> anyhow::Result<StopFn> {
        std::thread::sleep(Duration::from_secs(3));
        Ok(Box::new(|| {}))
    }

    fn last_known(&self) -> Option<taplogd::platform::GeoFix> {
        None
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn global_deadline_bounds_a_hanging_acquirer() {
    let h = harness(|ctx| {
        ctx.location = Arc::new(HangingLocationSource);
    });

    let started = Instant::now();
    let snapshot = h.orchestrator.collect(&trigger_params()).await.unwrap();
    let elapsed = started.elapsed();

    // Deadline = slowest budget (motion: 0.2 + 1.0) + grace 0.5.
    assert!(elapsed < Duration::from_millis(2500), "took {:?}", elapsed);
    assert!(snapshot.location.is_none());
    assert_eq!(warned_fields(&snapshot), vec![SnapshotField::Location]);
    assert_eq!(
        snapshot.warnings[0].reason, "timed out",
        "straggler recorded as timed out"
    );
    // The straggler cost only its own slot.
    assert!(snapshot.motion.is_some());
    assert!(snapshot.audio.is_some());
    assert_eq!(h.store.count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_trigger_during_active_run_is_rejected() {
    let h = harness(|ctx| {
        // Keep the first run busy for ~0.5 s of real-time audio.
        ctx.config.audio.duration_secs = 0.5;
        ctx.audio = Arc::new(FakeAudioInput::looping(
            vec![1000i16; 480],
            Duration::from_millis(30),
        ));
    });

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.collect(&trigger_params()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = h.orchestrator.collect(&trigger_params()).await;
    assert!(matches!(second, Err(TaplogError::RunInProgress)));

    let snapshot = first.await.unwrap().unwrap();
    assert!(snapshot.audio.is_some());

    // Admission reopens once the run finished.
    let third = h.orchestrator.collect(&trigger_params()).await;
    assert!(third.is_ok());
    assert_eq!(h.store.count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_fault_is_the_only_run_level_failure() {
    let h = harness(|ctx| {
        ctx.store = Arc::new(MemoryStore::failing("disk full"));
    });

    let result = h.orchestrator.collect(&trigger_params()).await;
    assert!(matches!(result, Err(TaplogError::Store(reason)) if reason == "disk full"));

    // The admission flag was released on the failure path.
    let again = h.orchestrator.collect(&trigger_params()).await;
    assert!(matches!(again, Err(TaplogError::Store(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn progress_stream_ends_at_complete() {
    let h = harness(|_| {});
    let progress = h.orchestrator.progress();

    h.orchestrator.collect(&trigger_params()).await.unwrap();

    let event = progress.borrow().clone();
    assert_eq!(event.phase, CollectPhase::Complete);
}

fn sample_results() -> RunResults {
    let mut environment = EnvironmentReport::all_timed_out();
    environment.system = AcquisitionResult::Value(taplog_common::SystemReading {
        mem_used_mb: 1024,
        mem_total_mb: 4096,
        load_avg_1min: 0.2,
        uptime_secs: 900,
        hostname: Some("host".to_string()),
        os: Some("Test OS".to_string()),
    });
    environment.battery = AcquisitionResult::Value(taplog_common::BatteryReading {
        percent: 55,
        state: ChargeState::Full,
    });

    RunResults {
        location: AcquisitionResult::Value(LocationReading {
            latitude: 59.9139,
            longitude: 10.7522,
            accuracy_m: 5.0,
            altitude_m: None,
            fix_time: chrono::DateTime::parse_from_rfc3339("2026-08-06T12:00:00Z")
                .unwrap()
                .with_timezone(&chrono::Utc),
            address: None,
        }),
        network: AcquisitionResult::Value(NetworkIdentity {
            address: "192.168.1.20".to_string(),
            origin: NetworkOrigin::LocalInterface {
                interface: "wlan0".to_string(),
            },
        }),
        motion: AcquisitionResult::unavailable("motion sensor unavailable"),
        environment,
    }
}

#[test]
fn fold_is_idempotent() {
    let id = uuid::Uuid::nil();
    let timestamp = chrono::DateTime::parse_from_rfc3339("2026-08-06T12:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let trigger = TriggerInfo::from_params(&trigger_params());

    let first = assemble_snapshot(
        id,
        timestamp,
        trigger.clone(),
        Some(UsageCategory::Commute),
        1234,
        sample_results(),
    );
    let second = assemble_snapshot(
        id,
        timestamp,
        trigger,
        Some(UsageCategory::Commute),
        1234,
        sample_results(),
    );

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn fold_counts_match_populated_slots() {
    let snapshot = assemble_snapshot(
        uuid::Uuid::nil(),
        chrono::Utc::now(),
        TriggerInfo::from_params(&HashMap::new()),
        None,
        10,
        sample_results(),
    );

    // 4 populated slots (location, network, system, battery) of 12.
    assert_eq!(snapshot.warnings.len(), 8);
    assert!(snapshot.location.is_some());
    assert!(snapshot.network.is_some());
    assert!(snapshot.system.is_some());
    assert!(snapshot.battery.is_some());
    assert_eq!(snapshot.trigger.trigger_elapsed_ms, 10);

    let motion_warning = snapshot
        .warnings
        .iter()
        .find(|w| w.field == SnapshotField::Motion)
        .expect("motion warning");
    assert_eq!(motion_warning.reason, "motion sensor unavailable");
}
