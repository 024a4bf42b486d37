//! Motion acquisition: fixed-rate sampling with a bounded buffer and a
//! safety-net timeout.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use taplog_common::{AcquisitionResult, MotionConfig, MotionSample, MotionSeries,
    MOTION_SAMPLE_RATE_HZ};

use crate::op::{OpOutcome, OperationHandle};
use crate::platform::MotionSource;

/// Margin past the configured duration before the safety net assumes the
/// platform motion subsystem went quiet.
const SAFETY_NET: Duration = Duration::from_secs(1);

pub struct MotionAcquirer {
    config: MotionConfig,
    source: Arc<dyn MotionSource>,
}

impl MotionAcquirer {
    pub fn new(config: MotionConfig, source: Arc<dyn MotionSource>) -> Self {
        Self { config, source }
    }

    pub async fn acquire(&self) -> AcquisitionResult<MotionSeries> {
        let duration = Duration::from_secs_f64(self.config.duration_secs);
        let interval = Duration::from_millis(1000 / MOTION_SAMPLE_RATE_HZ as u64);

        let buffer: Arc<Mutex<Vec<MotionSample>>> = Arc::new(Mutex::new(Vec::new()));
        let buffer_in_callback = buffer.clone();
        let source = self.source.clone();

        // The subscription stops itself through the completer once the
        // elapsed time covers the configured duration; the outer timeout is
        // only the safety net for a source that never calls back.
        let handle = OperationHandle::start(duration + SAFETY_NET, move |completer| {
            let started = Instant::now();
            source.subscribe(
                interval,
                Box::new(move |sample| {
                    let elapsed = started.elapsed();
                    if elapsed >= duration {
                        completer.complete(());
                        return;
                    }
                    buffer_in_callback.lock().unwrap().push(MotionSample {
                        offset_ms: elapsed.as_millis() as u64,
                        accel: sample.accel,
                        gyro: sample.gyro,
                    });
                }),
            )
        });

        let outcome = handle.wait().await;
        let samples = std::mem::take(&mut *buffer.lock().unwrap());

        match outcome {
            OpOutcome::Completed(()) => AcquisitionResult::Value(MotionSeries {
                rate_hz: MOTION_SAMPLE_RATE_HZ,
                samples,
            }),
            OpOutcome::TimedOut => {
                // Forward progress over completeness: emit what was buffered.
                warn!(
                    "motion source stalled; emitting {} buffered samples",
                    samples.len()
                );
                AcquisitionResult::Value(MotionSeries {
                    rate_hz: MOTION_SAMPLE_RATE_HZ,
                    samples,
                })
            }
            OpOutcome::Failed(reason) => AcquisitionResult::unavailable(reason),
            OpOutcome::Cancelled => AcquisitionResult::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FakeMotionSource;
    use std::sync::atomic::Ordering;

    fn config(duration_secs: f64) -> MotionConfig {
        MotionConfig { duration_secs }
    }

    #[tokio::test]
    async fn collects_for_configured_duration_then_stops() {
        let source = Arc::new(FakeMotionSource::steady());
        let acquirer = MotionAcquirer::new(config(0.2), source.clone());

        let started = Instant::now();
        let series = acquirer.acquire().await.into_value().expect("series");
        let elapsed = started.elapsed();

        assert!(!series.samples.is_empty());
        assert_eq!(series.rate_hz, MOTION_SAMPLE_RATE_HZ);
        // Stopped by elapsed time, well before the safety net.
        assert!(elapsed < Duration::from_millis(900), "took {:?}", elapsed);
        assert!(source.stopped.load(Ordering::SeqCst));
        // Offsets are relative and within the window.
        assert!(series.samples.iter().all(|s| s.offset_ms < 200));
    }

    #[tokio::test]
    async fn absent_hardware_is_unavailable() {
        let acquirer = MotionAcquirer::new(config(0.2), Arc::new(FakeMotionSource::absent()));
        let result = acquirer.acquire().await;
        assert_eq!(
            result.warning_reason().as_deref(),
            Some("motion sensor unavailable")
        );
    }

    #[tokio::test]
    async fn mute_source_trips_safety_net_with_empty_buffer() {
        let source = Arc::new(FakeMotionSource::mute());
        let acquirer = MotionAcquirer::new(config(0.1), source.clone());

        let started = Instant::now();
        let series = acquirer.acquire().await.into_value().expect("empty series");
        let elapsed = started.elapsed();

        assert!(series.samples.is_empty());
        // The safety net fired at roughly duration + 1 s; no unbounded wait.
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(2500), "took {:?}", elapsed);
        assert!(source.stopped.load(Ordering::SeqCst));
    }
}
