//! WAV file audio source.
//!
//! Decodes a 16-bit PCM (or 32-bit float) WAV file, downmixes and resamples
//! it to the requested spec, and replays it as framed chunks. By default
//! chunks are paced at the chunk interval to mimic a live capture; unpaced
//! mode floods the stream as fast as the consumer accepts it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::{AudioSource, AudioSpec, AudioStream, CaptureGuard, CaptureHandle, ResamplerState};
use super::{f32_to_s16le, resample_linear};
use crate::core::stt::{SttError, SttResult};

/// Replays a WAV file as a session audio stream.
#[derive(Debug, Clone)]
pub struct WavSource {
    path: PathBuf,
    realtime: bool,
}

impl WavSource {
    /// Replay `path` paced at the chunk interval.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: true,
        }
    }

    /// Replay `path` as fast as the consumer accepts chunks.
    pub fn unpaced(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
        }
    }
}

impl AudioSource for WavSource {
    fn open(&mut self, spec: &AudioSpec) -> SttResult<AudioStream> {
        let mut reader = hound::WavReader::open(&self.path).map_err(|e| {
            SttError::MediaAccessFailed(format!("Failed to open {}: {e}", self.path.display()))
        })?;
        let wav_spec = reader.spec();

        let samples: Vec<f32> = match (wav_spec.sample_format, wav_spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| {
                    SttError::MediaAccessFailed(format!(
                        "Failed to read {}: {e}",
                        self.path.display()
                    ))
                })?,
            (hound::SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| {
                    SttError::MediaAccessFailed(format!(
                        "Failed to read {}: {e}",
                        self.path.display()
                    ))
                })?,
            (format, bits) => {
                return Err(SttError::MediaAccessFailed(format!(
                    "Unsupported WAV format: {bits}-bit {format:?}"
                )));
            }
        };

        // Downmix to mono before resampling.
        let channels = wav_spec.channels as usize;
        let mono: Vec<f32> = if channels > 1 {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            samples
        };

        let mut resampler = ResamplerState::default();
        let resampled = resample_linear(&mono, wav_spec.sample_rate, spec.sample_rate, &mut resampler);
        let pcm = f32_to_s16le(&resampled);

        debug!(
            "Replaying {} ({} samples at {}Hz -> {} bytes at {}Hz)",
            self.path.display(),
            mono.len(),
            wav_spec.sample_rate,
            pcm.len(),
            spec.sample_rate
        );

        let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(128);
        let stop = Arc::new(AtomicBool::new(false));

        let chunk_bytes = spec.chunk_bytes();
        let chunk_interval = Duration::from_millis(spec.chunk_ms as u64);
        let realtime = self.realtime;
        let stop_flag = stop.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(chunk_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            for chunk in pcm.chunks(chunk_bytes) {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                if realtime {
                    interval.tick().await;
                }
                if chunk_tx.send(Bytes::copy_from_slice(chunk)).await.is_err() {
                    break;
                }
            }
            // Dropping the sender closes the stream: end of audio.
        });

        Ok(AudioStream {
            chunks: chunk_rx,
            guard: CaptureGuard::new(Box::new(WavHandle { stop })),
        })
    }
}

struct WavHandle {
    stop: Arc<AtomicBool>,
}

impl CaptureHandle for WavHandle {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
