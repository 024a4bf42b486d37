//! Audio acquisition: fixed-format capture staged through a private scratch
//! WAV file, summarized, then deleted.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use taplog_common::{AcquisitionResult, AudioClip, AudioConfig, AudioStats};

use crate::op::{OpOutcome, OperationHandle};
use crate::platform::{AudioInput, AudioSpec, PermissionKind, PermissionProvider};

/// Margin past the configured duration before the capture is declared
/// stalled.
const SAFETY_NET: Duration = Duration::from_secs(1);

/// Scratch file that cannot outlive the acquisition, whatever the path out.
struct ScratchFile {
    path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("failed to remove audio scratch file: {}", e);
            }
        }
    }
}

/// Capture state shared between the chunk callback and the acquirer. The
/// target sample count is only known once the device reports its format, so
/// early chunks accumulate until it is set.
struct CaptureState {
    samples: Vec<i16>,
    target: Option<usize>,
}

pub struct AudioAcquirer {
    config: AudioConfig,
    permissions: Arc<dyn PermissionProvider>,
    input: Arc<dyn AudioInput>,
    scratch_dir: PathBuf,
}

impl AudioAcquirer {
    pub fn new(
        config: AudioConfig,
        permissions: Arc<dyn PermissionProvider>,
        input: Arc<dyn AudioInput>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            config,
            permissions,
            input,
            scratch_dir,
        }
    }

    pub async fn acquire(&self) -> AcquisitionResult<AudioClip> {
        if self
            .permissions
            .status(PermissionKind::Microphone)
            .is_blocked()
        {
            return AcquisitionResult::unavailable("microphone permission denied");
        }

        let duration = Duration::from_secs_f64(self.config.duration_secs);
        let state = Arc::new(Mutex::new(CaptureState {
            samples: Vec::new(),
            target: None,
        }));
        let spec_cell: Arc<Mutex<Option<AudioSpec>>> = Arc::new(Mutex::new(None));

        let input = self.input.clone();
        let sink_state = state.clone();
        let start_state = state.clone();
        let start_spec = spec_cell.clone();
        let duration_secs = self.config.duration_secs;

        let handle = OperationHandle::start(duration + SAFETY_NET, move |completer| {
            let chunk_completer = completer.clone();
            let capture = input.start(Box::new(move |chunk| {
                let mut state = sink_state.lock().unwrap();
                state.samples.extend_from_slice(chunk);
                if let Some(target) = state.target {
                    if state.samples.len() >= target {
                        chunk_completer.complete(());
                    }
                }
            }))?;

            // Format is known now; arm the target. Chunks may already have
            // covered it.
            let target =
                (capture.spec.sample_rate as f64 * capture.spec.channels as f64 * duration_secs)
                    as usize;
            *start_spec.lock().unwrap() = Some(capture.spec);
            {
                let mut state = start_state.lock().unwrap();
                state.target = Some(target);
                if state.samples.len() >= target {
                    completer.complete(());
                }
            }

            Ok(capture.stop)
        });

        let outcome = handle.wait().await;

        let (samples, target) = {
            let mut state = state.lock().unwrap();
            let target = state.target.unwrap_or(state.samples.len());
            (std::mem::take(&mut state.samples), target)
        };
        let spec = spec_cell.lock().unwrap().take();

        let (mut samples, spec) = match (outcome, spec) {
            (OpOutcome::Completed(()), Some(spec)) => (samples, spec),
            (OpOutcome::TimedOut, Some(spec)) if !samples.is_empty() => {
                warn!(
                    "audio capture stalled; keeping {} buffered samples",
                    samples.len()
                );
                (samples, spec)
            }
            (OpOutcome::TimedOut, _) => return AcquisitionResult::TimedOut,
            (OpOutcome::Cancelled, _) => return AcquisitionResult::TimedOut,
            (OpOutcome::Failed(reason), _) => return AcquisitionResult::unavailable(reason),
            (OpOutcome::Completed(()), None) => {
                return AcquisitionResult::unavailable("audio capture lost its format")
            }
        };
        samples.truncate(target);

        // Stage through the scratch file: write, read back, summarize,
        // delete. The guard removes the file on every exit.
        let path = self
            .scratch_dir
            .join(format!("capture-{}.wav", Uuid::new_v4()));
        let scratch = ScratchFile { path: path.clone() };

        let clip = match stage_and_summarize(&scratch.path, spec, &samples) {
            Ok(clip) => clip,
            Err(e) => {
                warn!("audio scratch staging failed: {}", e);
                return AcquisitionResult::unavailable("audio staging failed");
            }
        };
        drop(scratch);
        debug!(
            "audio clip: {} ms, peak {:.3}",
            clip.duration_ms, clip.stats.peak_amplitude
        );

        AcquisitionResult::Value(clip)
    }
}

/// Write the samples to a WAV scratch file, read them back, and derive the
/// summary statistics from what the file round-tripped.
fn stage_and_summarize(
    path: &std::path::Path,
    spec: AudioSpec,
    samples: &[i16],
) -> anyhow::Result<AudioClip> {
    let wav_spec = hound::WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, wav_spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    let mut reader = hound::WavReader::open(path)?;
    let samples: Vec<i16> = reader.samples::<i16>().collect::<Result<_, _>>()?;

    let stats = summarize(&samples);
    let frames = samples.len() as u64 / spec.channels.max(1) as u64;
    let duration_ms = frames * 1000 / spec.sample_rate.max(1) as u64;

    Ok(AudioClip {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        duration_ms,
        samples,
        stats,
    })
}

fn summarize(samples: &[i16]) -> AudioStats {
    if samples.is_empty() {
        return AudioStats {
            mean_amplitude: 0.0,
            peak_amplitude: 0.0,
        };
    }
    let full_scale = i16::MAX as f64;
    let mut sum = 0.0;
    let mut peak = 0.0f64;
    for &sample in samples {
        let amplitude = (sample as f64).abs() / full_scale;
        sum += amplitude;
        peak = peak.max(amplitude);
    }
    AudioStats {
        mean_amplitude: sum / samples.len() as f64,
        peak_amplitude: peak,
    }
}
