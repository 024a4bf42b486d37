//! Taplog Daemon - one-shot collection runner.
//!
//! Consumes decoded trigger parameters from the command line, runs one
//! collection against the host's real sources, and stores the snapshot.

use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn, Level};

use taplog_common::CollectConfig;
use taplogd::classify::RuleClassifier;
use taplogd::orchestrator::{RunContext, SnapshotOrchestrator};
use taplogd::platform::{
    CpalAudioInput, DisabledLocationSource, HttpEcho, IioMotionSource, LinuxSensorHost,
    NixLocalAddressSource, NoStepCounter, NominatimGeocoder, StaticPermissionProvider,
};
use taplogd::store::JsonFileStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Taplog v{} starting", env!("CARGO_PKG_VERSION"));

    // Trigger parameters arrive as key=value arguments, already decoded by
    // the trigger source (sourceApp=..., nfc=..., wifi=1, ...).
    let params: HashMap<String, String> = std::env::args()
        .skip(1)
        .filter_map(|arg| {
            arg.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();

    let config = match std::env::var("TAPLOG_CONFIG") {
        Ok(path) => CollectConfig::load(Path::new(&path))?,
        Err(_) => CollectConfig::default(),
    };

    let snapshot_dir =
        std::env::var("TAPLOG_SNAPSHOT_DIR").unwrap_or_else(|_| "snapshots".to_string());
    let scratch_dir = std::env::temp_dir().join("taplog");
    std::fs::create_dir_all(&scratch_dir)?;

    let echo = HttpEcho::new(config.network.echo_url.clone(), config.echo_timeout());

    let ctx = RunContext {
        config,
        permissions: Arc::new(StaticPermissionProvider::granting_all()),
        // No positioning hardware on this host; the acquirer records it as
        // unavailable rather than waiting.
        location: Arc::new(DisabledLocationSource),
        geocoder: Arc::new(NominatimGeocoder::new()),
        motion: Arc::new(IioMotionSource::new()),
        sensors: Arc::new(LinuxSensorHost::new()),
        steps: Arc::new(NoStepCounter),
        audio: Arc::new(CpalAudioInput::new()),
        local_addr: Arc::new(NixLocalAddressSource),
        echo: Arc::new(echo),
        store: Arc::new(JsonFileStore::new(&snapshot_dir)),
        classifier: Arc::new(RuleClassifier),
        scratch_dir,
    };

    let orchestrator = SnapshotOrchestrator::new(ctx);

    let mut progress = orchestrator.progress();
    let progress_task = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let event = progress.borrow().clone();
            info!(
                "[{}] {} ({} ms)",
                event.phase,
                event.detail.as_deref().unwrap_or(""),
                event.elapsed_ms
            );
        }
    });

    let snapshot = orchestrator.collect(&params).await?;
    progress_task.abort();

    for warning in &snapshot.warnings {
        warn!("not collected - {}: {}", warning.field, warning.reason);
    }
    info!(
        "snapshot {} complete: {} warning(s), stored in {}",
        snapshot.id,
        snapshot.warnings.len(),
        snapshot_dir
    );

    Ok(())
}
