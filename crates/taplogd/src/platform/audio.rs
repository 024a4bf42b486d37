//! Audio input seam.
//!
//! Capture is callback-style: the input pushes PCM chunks into the sink
//! until stopped. The cpal stream is not `Send`, so the real implementation
//! owns it on a dedicated thread and the stop closure just signals that
//! thread.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Negotiated capture format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

pub type ChunkSink = Box<dyn FnMut(&[i16]) + Send>;
pub type StopFn = Box<dyn FnOnce() + Send>;

/// A running capture: the format the device settled on plus its stop handle.
pub struct AudioCapture {
    pub spec: AudioSpec,
    pub stop: StopFn,
}

/// Microphone-style input source.
pub trait AudioInput: Send + Sync {
    /// Start capturing; chunks flow into `sink` until the returned capture
    /// is stopped. Fails when no input device is available - in that case
    /// nothing was started and nothing must be cleaned up.
    fn start(&self, sink: ChunkSink) -> anyhow::Result<AudioCapture>;
}

/// Default-device capture through cpal.
pub struct CpalAudioInput;

impl CpalAudioInput {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalAudioInput {
    fn default() -> Self {
        Self::new()
    }
}

enum StartReport {
    Ready(AudioSpec),
    Failed(String),
}

impl AudioInput for CpalAudioInput {
    fn start(&self, mut sink: ChunkSink) -> anyhow::Result<AudioCapture> {
        let (report_tx, report_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        // Stream construction and teardown both happen on this thread; the
        // stream object never crosses it.
        std::thread::spawn(move || {
            let host = cpal::default_host();
            let device = match host.default_input_device() {
                Some(device) => device,
                None => {
                    let _ = report_tx.send(StartReport::Failed(
                        "no default input device".to_string(),
                    ));
                    return;
                }
            };

            let supported = match device.default_input_config() {
                Ok(config) => config,
                Err(e) => {
                    let _ = report_tx
                        .send(StartReport::Failed(format!("input config error: {}", e)));
                    return;
                }
            };

            let spec = AudioSpec {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            };
            let sample_format = supported.sample_format();
            let config = supported.into();
            let err_fn = |e| warn!("audio input stream error: {}", e);

            let stream = match sample_format {
                SampleFormat::I16 => device.build_input_stream(
                    &config,
                    move |data: &[i16], _| sink(data),
                    err_fn,
                    None,
                ),
                SampleFormat::F32 => device.build_input_stream(
                    &config,
                    move |data: &[f32], _| {
                        let converted: Vec<i16> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        sink(&converted);
                    },
                    err_fn,
                    None,
                ),
                other => {
                    let _ = report_tx.send(StartReport::Failed(format!(
                        "unsupported input sample format: {:?}",
                        other
                    )));
                    return;
                }
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = report_tx
                        .send(StartReport::Failed(format!("input stream error: {}", e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = report_tx.send(StartReport::Failed(format!("input start error: {}", e)));
                return;
            }

            debug!(
                "audio capture running: {} Hz, {} ch",
                spec.sample_rate, spec.channels
            );
            let _ = report_tx.send(StartReport::Ready(spec));

            // Park until stopped; dropping the stream closes the device.
            let _ = stop_rx.recv();
            drop(stream);
        });

        match report_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(StartReport::Ready(spec)) => Ok(AudioCapture {
                spec,
                stop: Box::new(move || {
                    let _ = stop_tx.send(());
                }),
            }),
            Ok(StartReport::Failed(reason)) => anyhow::bail!(reason),
            Err(_) => anyhow::bail!("audio input did not start in time"),
        }
    }
}

/// Deterministic input for tests: repeats a fixed waveform chunk at a fixed
/// cadence until stopped, or refuses to start at all.
pub struct FakeAudioInput {
    available: bool,
    chunk: Vec<i16>,
    chunk_interval: Duration,
    spec: AudioSpec,
    pub stopped: Arc<AtomicBool>,
}

impl FakeAudioInput {
    /// 16 kHz mono source emitting `chunk` every `chunk_interval`.
    pub fn looping(chunk: Vec<i16>, chunk_interval: Duration) -> Self {
        Self {
            available: true,
            chunk,
            chunk_interval,
            spec: AudioSpec {
                sample_rate: 16_000,
                channels: 1,
            },
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A source with no input device.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            chunk: Vec::new(),
            chunk_interval: Duration::from_millis(10),
            spec: AudioSpec {
                sample_rate: 16_000,
                channels: 1,
            },
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Emit chunks fast enough to fill `duration` of audio almost
    /// immediately, for tests that should not wait in real time.
    pub fn instant(samples_per_chunk: usize) -> Self {
        let chunk = (0..samples_per_chunk)
            .map(|i| ((i % 100) as i16 - 50) * 200)
            .collect();
        Self::looping(chunk, Duration::from_millis(1))
    }
}

impl AudioInput for FakeAudioInput {
    fn start(&self, mut sink: ChunkSink) -> anyhow::Result<AudioCapture> {
        if !self.available {
            anyhow::bail!("no default input device");
        }

        let chunk = self.chunk.clone();
        let interval = self.chunk_interval;
        let stopped = self.stopped.clone();
        let flag = stopped.clone();
        std::thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                sink(&chunk);
                std::thread::sleep(interval);
            }
        });

        Ok(AudioCapture {
            spec: self.spec,
            stop: Box::new(move || {
                stopped.store(true, Ordering::SeqCst);
            }),
        })
    }
}
