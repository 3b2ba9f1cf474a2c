//! Microphone capture via cpal.
//!
//! The cpal stream is owned by a dedicated thread (cpal streams are not
//! `Send`). The thread downmixes to mono, resamples to the requested rate,
//! converts to PCM s16le, and frames the result into fixed-duration chunks
//! delivered over a bounded channel. Stopping the capture signals the
//! thread and joins it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{AudioSource, AudioSpec, AudioStream, CaptureGuard, CaptureHandle, ResamplerState};
use super::{f32_to_s16le, resample_linear};
use crate::core::stt::{SttError, SttResult};

/// Fallback capture rate when the device cannot open at the target rate.
const FALLBACK_SAMPLE_RATE: u32 = 48000;

/// How long the processing loop waits for samples before re-checking the
/// stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Microphone audio source.
///
/// Produces a mono stream; sessions using it must be configured for one
/// channel.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneSource {
    device_name: Option<String>,
}

impl MicrophoneSource {
    /// Capture from the default input device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from a specific input device by name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn open(&mut self, spec: &AudioSpec) -> SttResult<AudioStream> {
        if spec.channels != 1 {
            return Err(SttError::ConfigurationError(
                "Microphone capture is mono; configure one channel".to_string(),
            ));
        }

        let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(128);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<SttResult<()>>();
        let stop = Arc::new(AtomicBool::new(false));

        let device_name = self.device_name.clone();
        let spec = *spec;
        let stop_flag = stop.clone();
        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || run_capture(device_name, spec, chunk_tx, ready_tx, stop_flag))
            .map_err(|e| {
                SttError::MediaAccessFailed(format!("Failed to spawn capture thread: {e}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(AudioStream {
                chunks: chunk_rx,
                guard: CaptureGuard::new(Box::new(MicrophoneHandle {
                    stop,
                    thread: Some(thread),
                })),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SttError::MediaAccessFailed(
                "Capture thread exited during setup".to_string(),
            )),
        }
    }
}

struct MicrophoneHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle for MicrophoneHandle {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Capture thread body: owns the cpal stream for its whole lifetime.
fn run_capture(
    device_name: Option<String>,
    spec: AudioSpec,
    chunk_tx: mpsc::Sender<Bytes>,
    ready_tx: std::sync::mpsc::Sender<SttResult<()>>,
    stop: Arc<AtomicBool>,
) {
    let host = cpal::default_host();

    let device = match &device_name {
        Some(name) => {
            let found = host
                .input_devices()
                .ok()
                .and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                });
            match found {
                Some(device) => device,
                None => {
                    let _ = ready_tx.send(Err(SttError::MediaAccessFailed(format!(
                        "Input device '{name}' not found"
                    ))));
                    return;
                }
            }
        }
        None => match host.default_input_device() {
            Some(device) => device,
            None => {
                let _ = ready_tx.send(Err(SttError::MediaAccessFailed(
                    "No default input device".to_string(),
                )));
                return;
            }
        },
    };

    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    // Prefer the target rate, fall back to 48kHz, then the device default.
    let config = match try_config(&device, spec.sample_rate)
        .or_else(|| try_config(&device, FALLBACK_SAMPLE_RATE))
    {
        Some(config) => config,
        None => match device.default_input_config() {
            Ok(default) => StreamConfig {
                channels: default.channels(),
                sample_rate: default.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            },
            Err(e) => {
                let _ = ready_tx.send(Err(SttError::MediaAccessFailed(format!(
                    "No usable input config: {e}"
                ))));
                return;
            }
        },
    };

    let input_rate = config.sample_rate.0;
    debug!(
        "Capture config: {}Hz {}ch -> {}Hz mono",
        input_rate, config.channels, spec.sample_rate
    );

    // Channel from the cpal callback into this thread's framing loop.
    let (raw_tx, raw_rx) = std::sync::mpsc::sync_channel::<Vec<f32>>(128);

    let channels = config.channels as usize;
    let stream = match device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono: Vec<f32> = if channels > 1 {
                data.chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                    .collect()
            } else {
                data.to_vec()
            };
            let _ = raw_tx.try_send(mono);
        },
        |err| {
            error!("Capture stream error: {}", err);
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(SttError::MediaAccessFailed(format!(
                "Failed to build input stream: {e}"
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(SttError::MediaAccessFailed(format!(
            "Failed to start input stream: {e}"
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    let chunk_bytes = spec.chunk_bytes();
    let mut pending: Vec<u8> = Vec::with_capacity(chunk_bytes * 2);
    let mut resampler = ResamplerState::default();

    while !stop.load(Ordering::SeqCst) {
        let samples = match raw_rx.recv_timeout(POLL_INTERVAL) {
            Ok(samples) => samples,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let samples = resample_linear(&samples, input_rate, spec.sample_rate, &mut resampler);
        pending.extend(f32_to_s16le(&samples));

        while pending.len() >= chunk_bytes {
            let chunk: Vec<u8> = pending.drain(..chunk_bytes).collect();
            match chunk_tx.try_send(Bytes::from(chunk)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Audio chunk dropped: consumer is behind");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Audio consumer gone, stopping capture");
                    return;
                }
            }
        }
    }

    // Flush the partial tail chunk before the channel closes.
    if !pending.is_empty() {
        let _ = chunk_tx.try_send(Bytes::from(pending));
    }

    drop(stream);
    debug!("Capture thread stopped");
}

fn try_config(device: &cpal::Device, rate: u32) -> Option<StreamConfig> {
    let supported = device.supported_input_configs().ok()?;
    for range in supported {
        if range.channels() == 1
            && range.min_sample_rate().0 <= rate
            && range.max_sample_rate().0 >= rate
        {
            return Some(StreamConfig {
                channels: 1,
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }
    // Stereo configs work too; the callback downmixes.
    let supported = device.supported_input_configs().ok()?;
    for range in supported {
        if range.min_sample_rate().0 <= rate && range.max_sample_rate().0 >= rate {
            return Some(StreamConfig {
                channels: range.channels(),
                sample_rate: SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            });
        }
    }
    None
}

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(_) => return Vec::new(),
    };
    devices.filter_map(|d| d.name().ok()).collect()
}
