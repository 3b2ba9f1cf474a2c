//! Audio input pipeline.
//!
//! An [`AudioSource`] turns some input (microphone, WAV file) into a
//! bounded channel of raw PCM s16le chunks framed at a fixed interval.
//! The stream is finite once stopped and not restartable; a fresh session
//! opens a fresh stream.
//!
//! - [`capture`]: microphone capture via cpal
//! - [`wav`]: WAV file playback via hound

pub mod capture;
pub mod wav;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::core::stt::SttResult;

pub use capture::{MicrophoneSource, list_input_devices};
pub use wav::WavSource;

/// Shape of the PCM stream a source must produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    /// Output sample rate, Hz
    pub sample_rate: u32,
    /// Output channel count
    pub channels: u16,
    /// Duration of one chunk, milliseconds
    pub chunk_ms: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_ms: 100,
        }
    }
}

impl AudioSpec {
    /// Size of one chunk in bytes (s16le).
    pub fn chunk_bytes(&self) -> usize {
        let bytes_per_second = self.sample_rate as usize * self.channels as usize * 2;
        (bytes_per_second * self.chunk_ms as usize / 1000).max(2)
    }
}

/// Stops the underlying capture when told to (and when dropped).
pub trait CaptureHandle: Send {
    fn stop(&mut self);
}

/// Keeps a capture alive; dropping it stops the capture and lets the chunk
/// channel drain to completion.
pub struct CaptureGuard {
    handle: Option<Box<dyn CaptureHandle>>,
}

impl CaptureGuard {
    pub fn new(handle: Box<dyn CaptureHandle>) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }
}

/// An open audio stream: framed PCM chunks plus the guard keeping the
/// capture alive.
pub struct AudioStream {
    /// Framed PCM s16le chunks. Closed once the source is exhausted or the
    /// guard is dropped.
    pub chunks: mpsc::Receiver<Bytes>,
    /// Capture lifetime guard
    pub guard: CaptureGuard,
}

impl AudioStream {
    /// Split into the chunk receiver and the capture guard.
    pub fn into_parts(self) -> (mpsc::Receiver<Bytes>, CaptureGuard) {
        (self.chunks, self.guard)
    }
}

/// Something that can produce one audio stream per session.
pub trait AudioSource: Send {
    /// Open a stream matching `spec`. Fails with the media error kind when
    /// the input cannot be acquired (missing device, permission, bad file).
    fn open(&mut self, spec: &AudioSpec) -> SttResult<AudioStream>;
}

// =============================================================================
// Resampling
// =============================================================================

/// Carry-over state for the linear resampler, so chunk boundaries do not
/// produce discontinuities.
#[derive(Default)]
pub(crate) struct ResamplerState {
    t: f64,
    last_sample: f32,
    has_last: bool,
}

/// Linear resampler for mono f32 samples.
pub(crate) fn resample_linear(
    samples: &[f32],
    input_rate: u32,
    target_rate: u32,
    state: &mut ResamplerState,
) -> Vec<f32> {
    if samples.is_empty() || input_rate == target_rate {
        return samples.to_vec();
    }
    let step = input_rate as f64 / target_rate as f64;
    let mut out = Vec::with_capacity(((samples.len() as f64 / step) + 2.0) as usize);

    let mut buf = Vec::with_capacity(samples.len() + 1);
    if state.has_last {
        buf.push(state.last_sample);
    }
    buf.extend_from_slice(samples);

    let mut i: usize = 0;
    let mut t = state.t;
    while i + 1 < buf.len() {
        let s0 = buf[i];
        let s1 = buf[i + 1];
        out.push(s0 + (s1 - s0) * t as f32);
        t += step;
        while t >= 1.0 {
            t -= 1.0;
            i += 1;
            if i + 1 >= buf.len() {
                break;
            }
        }
        if i + 1 >= buf.len() {
            break;
        }
    }

    state.t = t;
    if let Some(last) = buf.last() {
        state.last_sample = *last;
        state.has_last = true;
    }
    out
}

/// Convert mono f32 samples to PCM s16le bytes.
pub(crate) fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let clamped = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            clamped.to_le_bytes()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bytes() {
        let spec = AudioSpec::default();
        // 16kHz mono s16le at 100ms = 3200 bytes
        assert_eq!(spec.chunk_bytes(), 3200);

        let spec = AudioSpec {
            sample_rate: 48000,
            channels: 2,
            chunk_ms: 50,
        };
        assert_eq!(spec.chunk_bytes(), 9600);
    }

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        let mut state = ResamplerState::default();
        let out = resample_linear(&samples, 16000, 16000, &mut state);
        assert_eq!(out, samples);
    }

    #[test]
    fn test_resample_halves_sample_count() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0).sin()).collect();
        let mut state = ResamplerState::default();
        let out = resample_linear(&samples, 32000, 16000, &mut state);
        // Roughly half, allowing for boundary carry-over.
        assert!((out.len() as i64 - 500).abs() <= 2, "got {}", out.len());
    }

    #[test]
    fn test_resample_carries_state_across_chunks() {
        let first: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let second: Vec<f32> = (100..200).map(|i| i as f32 / 100.0).collect();

        let mut state = ResamplerState::default();
        let a = resample_linear(&first, 48000, 16000, &mut state);
        let b = resample_linear(&second, 48000, 16000, &mut state);
        let total = a.len() + b.len();
        // 200 input samples at 3:1 ≈ 66 output samples.
        assert!((total as i64 - 66).abs() <= 2, "got {}", total);
    }

    #[test]
    fn test_f32_to_s16le_clamps() {
        let bytes = f32_to_s16le(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        let max = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!(max, 32767);
        let over = i16::from_le_bytes([bytes[6], bytes[7]]);
        assert_eq!(over, 32767);
    }
}
