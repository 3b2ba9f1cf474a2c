//! WebSocket message types for the Soniox real-time API.
//!
//! The wire protocol is deliberately small:
//!
//! - **Outgoing**: one JSON [`StartRequest`] as the first frame, then raw
//!   binary audio frames, an optional [`FinalizeMessage`] control frame, and
//!   a zero-length binary frame as the end-of-audio sentinel.
//! - **Incoming**: JSON [`TranscribeResponse`] objects carrying token
//!   batches, processing progress, a `finished` notice, or an error code.

use serde::{Deserialize, Serialize};

use super::config::{RecognitionContext, SonioxConfig, TranslationConfig};
use crate::core::stt::base::{SttError, Token};

// =============================================================================
// Outgoing Messages (Client to Server)
// =============================================================================

/// Configuration payload sent as the first WebSocket frame.
///
/// Everything the service needs to know about the session is carried here;
/// subsequent frames are raw audio.
#[derive(Debug, Clone, Serialize)]
pub struct StartRequest {
    pub api_key: String,
    pub model: String,
    pub audio_format: String,
    /// Required for raw PCM formats, omitted for `auto`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Required for raw PCM formats, omitted for `auto`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u16>,
    /// Omitted for automatic language detection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_hints: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RecognitionContext>,
    pub enable_speaker_diarization: bool,
    pub enable_language_identification: bool,
    pub enable_endpoint_detection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<TranslationConfig>,
}

impl StartRequest {
    /// Build the start request from a session configuration.
    pub fn from_config(config: &SonioxConfig) -> Self {
        let (sample_rate, num_channels) = if config.audio_format.is_raw_pcm() {
            (Some(config.sample_rate), Some(config.num_channels))
        } else {
            (None, None)
        };

        Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            audio_format: config.audio_format.as_str().to_string(),
            sample_rate,
            num_channels,
            language_hints: config.language_hints.clone(),
            context: config.context.clone(),
            enable_speaker_diarization: config.enable_speaker_diarization,
            enable_language_identification: config.enable_language_identification,
            enable_endpoint_detection: config.enable_endpoint_detection,
            translation: config.translation.clone(),
        }
    }
}

/// Control frame asking the service to finalize pending tail audio.
///
/// Sent before the end-of-audio sentinel so the trailing words are committed
/// instead of being dropped with the close.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizeMessage {
    /// Message type identifier (always "finalize")
    #[serde(rename = "type")]
    pub message_type: &'static str,
}

impl Default for FinalizeMessage {
    fn default() -> Self {
        Self {
            message_type: "finalize",
        }
    }
}

// =============================================================================
// Incoming Messages (Server to Client)
// =============================================================================

/// One inbound message from the service.
///
/// All fields are optional on the wire; a response may carry any mix of
/// tokens, progress counters, the finished notice, or an error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscribeResponse {
    /// Token batch, possibly empty (keep-alive / progress-only messages)
    #[serde(default)]
    pub tokens: Vec<Token>,
    /// Set once the service has processed the end-of-audio sentinel
    #[serde(default)]
    pub finished: bool,
    /// Present when the session failed server-side; supersedes `tokens`
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Milliseconds of audio finalized so far
    #[serde(default)]
    pub final_audio_proc_ms: Option<u64>,
    /// Milliseconds of audio processed so far, finalized or not
    #[serde(default)]
    pub total_audio_proc_ms: Option<u64>,
}

impl TranscribeResponse {
    /// Parse a raw WebSocket text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Whether this message carries an error code.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Convert an error-coded message into the typed error.
    pub fn error(&self) -> Option<SttError> {
        self.error_code.map(|code| SttError::ServiceError {
            code,
            message: self
                .error_message
                .clone()
                .unwrap_or_else(|| "Unknown service error".to_string()),
        })
    }

    /// Take the speech tokens of this batch, dropping control markers.
    pub fn speech_tokens(self) -> Vec<Token> {
        self.tokens.into_iter().filter(|t| !t.is_marker()).collect()
    }
}
