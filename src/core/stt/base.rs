//! Shared types for the speech-to-text streaming client.
//!
//! This module defines the error type used across the crate, the transcript
//! token delivered by the service, and the result alias the client APIs
//! return.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running a transcription session.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// Microphone or other audio input could not be acquired
    #[error("Media access failed: {0}")]
    MediaAccessFailed(String),

    /// WebSocket connection could not be established
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket-level failure after the connection was established
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Error-coded message received from the service
    #[error("Service error {code}: {message}")]
    ServiceError {
        /// Numeric error code reported by the service (HTTP-style)
        code: u16,
        /// Human-readable error description
        message: String,
    },

    /// Malformed inbound payload. Non-fatal: the offending message is
    /// skipped and the session continues.
    #[error("Malformed payload: {0}")]
    ParseError(String),

    /// Invalid session configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl SttError {
    /// Whether this error terminates the session.
    ///
    /// Parse errors are swallowed per-message; every other kind tears the
    /// session down.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SttError::ParseError(_))
    }
}

/// Result type for streaming client operations.
pub type SttResult<T> = Result<T, SttError>;

// =============================================================================
// Transcript Tokens
// =============================================================================

/// Marker token emitted by the service when endpoint detection fires.
pub const END_MARKER: &str = "<end>";

/// Marker token emitted by the service after a manual finalize request.
pub const FIN_MARKER: &str = "<fin>";

/// A single transcription unit delivered by the service.
///
/// Tokens are immutable once received. Ordering within a batch reflects
/// recognition order; no global ordering across batches is guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Transcribed text, including any leading whitespace
    pub text: String,
    /// Start of the token in the audio stream, milliseconds
    #[serde(default)]
    pub start_ms: u64,
    /// End of the token in the audio stream, milliseconds
    #[serde(default)]
    pub end_ms: u64,
    /// Confidence score (0.0 to 1.0)
    #[serde(default)]
    pub confidence: f64,
    /// Whether the service will revise this token further.
    /// Final tokens are committed; non-final tokens are the current best
    /// guess for not-yet-committed audio.
    #[serde(default)]
    pub is_final: bool,
    /// Speaker label when diarization is enabled
    #[serde(default)]
    pub speaker: Option<String>,
}

impl Token {
    /// Whether this token is a service control marker rather than speech.
    #[inline]
    pub fn is_marker(&self) -> bool {
        matches!(self.text.as_str(), END_MARKER | FIN_MARKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SttError::MediaAccessFailed("permission denied".to_string());
        assert!(err.to_string().contains("Media access failed"));

        let err = SttError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = SttError::ServiceError {
            code: 401,
            message: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "Service error 401: Unauthorized");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(SttError::MediaAccessFailed("x".into()).is_fatal());
        assert!(SttError::ConnectionFailed("x".into()).is_fatal());
        assert!(
            SttError::ServiceError {
                code: 500,
                message: "x".into()
            }
            .is_fatal()
        );
        assert!(!SttError::ParseError("x".into()).is_fatal());
    }

    #[test]
    fn test_token_deserialization_defaults() {
        // Only `text` is required; everything else defaults.
        let token: Token = serde_json::from_str(r#"{"text":"hello"}"#).unwrap();
        assert_eq!(token.text, "hello");
        assert_eq!(token.start_ms, 0);
        assert!(!token.is_final);
        assert!(token.speaker.is_none());
    }

    #[test]
    fn test_token_full_deserialization() {
        let json = r#"{
            "text": " world",
            "start_ms": 500,
            "end_ms": 900,
            "confidence": 0.97,
            "is_final": true,
            "speaker": "1"
        }"#;
        let token: Token = serde_json::from_str(json).unwrap();
        assert_eq!(token.text, " world");
        assert_eq!(token.start_ms, 500);
        assert_eq!(token.end_ms, 900);
        assert!(token.is_final);
        assert_eq!(token.speaker.as_deref(), Some("1"));
    }

    #[test]
    fn test_marker_detection() {
        let marker: Token = serde_json::from_str(r#"{"text":"<end>","is_final":true}"#).unwrap();
        assert!(marker.is_marker());

        let marker: Token = serde_json::from_str(r#"{"text":"<fin>","is_final":true}"#).unwrap();
        assert!(marker.is_marker());

        let speech: Token = serde_json::from_str(r#"{"text":"end"}"#).unwrap();
        assert!(!speech.is_marker());
    }
}
