//! Soniox real-time speech-to-text WebSocket integration.
//!
//! This module provides a streaming STT client for the Soniox real-time
//! transcription API with support for:
//!
//! - Real-time streaming transcription with partial (non-final) results
//! - Speaker diarization and per-token language identification
//! - Endpoint detection for utterance boundaries
//! - Live one-way and two-way translation
//! - Binary audio streaming (no base64 encoding overhead)
//!
//! # Architecture
//!
//! The module is organized into focused submodules:
//!
//! - [`config`]: Configuration types (`SonioxConfig`, `AudioFormat`, etc.)
//! - [`messages`]: WebSocket message types for API communication
//! - [`client`]: The main `SonioxStt` client implementation
//!
//! # Protocol Shape
//!
//! Unlike header-authenticated streaming APIs, Soniox takes everything in
//! band: the first WebSocket frame is a JSON configuration object carrying
//! the API key, and every later outbound frame is raw binary audio. A
//! zero-length binary frame marks the end of the audio; the service then
//! flushes its remaining results and reports `finished`.
//!
//! Tokens arrive in batches. Final tokens are committed and never revised;
//! non-final tokens are the service's current best guess for audio that has
//! not been committed yet and are replaced wholesale by each batch.
//!
//! # Example
//!
//! ```rust,no_run
//! use soniox_live::core::stt::{SonioxConfig, SonioxStt, SttEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SonioxConfig::new("your-soniox-api-key");
//!     let mut stt = SonioxStt::new(config)?;
//!     let mut events = stt.connect().await?;
//!
//!     // Send audio data (raw PCM s16le, no base64 encoding needed)
//!     let audio_data = vec![0u8; 3200];
//!     stt.send_audio(audio_data.into()).await?;
//!
//!     // End the stream and drain results
//!     stt.finish().await?;
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             SttEvent::Batch(tokens) => println!("got {} tokens", tokens.len()),
//!             SttEvent::Finished { .. } => break,
//!             _ => break,
//!         }
//!     }
//!
//!     stt.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod messages;

// Re-export public types
pub use client::{SonioxStt, SttEvent};
pub use config::{
    AudioFormat, ContextEntry, DEFAULT_REALTIME_MODEL, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE,
    RecognitionContext, SONIOX_WEBSOCKET_URL, SonioxConfig, TranslationConfig, TranslationTerm,
};
pub use messages::{FinalizeMessage, StartRequest, TranscribeResponse};
