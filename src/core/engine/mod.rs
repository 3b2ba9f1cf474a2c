//! Callback-driven recognizer engines.
//!
//! This is the second of the two session styles this crate offers. Instead
//! of polling an event stream from [`crate::core::session::SessionController`],
//! the consumer hands a [`StreamingRecognizer`] a configuration and a set of
//! async callbacks and lets the engine own audio capture, protocol framing,
//! and lifecycle. [`relay::RecognizerSession`] wires those callbacks back
//! into observable state and token sequences.
//!
//! The two styles are intentionally not unified: they use separate state
//! enums and separate defaults (this one enables speaker diarization,
//! language identification, and endpoint detection out of the box).

mod client;
pub mod relay;

pub use client::SonioxRecognizer;
pub use relay::RecognizerSession;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::stt::{SttError, SttResult, Token, TranslationConfig};

/// Default model for callback-driven engines.
pub const RECOGNIZER_DEFAULT_MODEL: &str = "stt-rt-v3";

// =============================================================================
// Recognizer State
// =============================================================================

/// Lifecycle state reported through `on_state_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognizerState {
    /// Constructed, nothing started yet
    #[default]
    Init,
    /// Acquiring the audio input
    RequestingMedia,
    /// Opening the WebSocket and sending the configuration payload
    OpeningWebSocket,
    /// Streaming audio and receiving results
    Running,
    /// End-of-audio sent; waiting for remaining results
    FinishingProcessing,
    /// Completed normally (terminal)
    Finished,
    /// Failed (terminal)
    Error,
    /// Torn down by `cancel()` (terminal)
    Canceled,
}

impl RecognizerState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecognizerState::Finished | RecognizerState::Error | RecognizerState::Canceled
        )
    }
}

impl fmt::Display for RecognizerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerState::Init => write!(f, "Init"),
            RecognizerState::RequestingMedia => write!(f, "RequestingMedia"),
            RecognizerState::OpeningWebSocket => write!(f, "OpeningWebSocket"),
            RecognizerState::Running => write!(f, "Running"),
            RecognizerState::FinishingProcessing => write!(f, "FinishingProcessing"),
            RecognizerState::Finished => write!(f, "Finished"),
            RecognizerState::Error => write!(f, "Error"),
            RecognizerState::Canceled => write!(f, "Canceled"),
        }
    }
}

// =============================================================================
// Recognizer Errors
// =============================================================================

/// Broad classification carried alongside the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerErrorStatus {
    MediaAccess,
    Connection,
    Service,
    Unknown,
}

impl fmt::Display for RecognizerErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecognizerErrorStatus::MediaAccess => write!(f, "MediaAccess"),
            RecognizerErrorStatus::Connection => write!(f, "Connection"),
            RecognizerErrorStatus::Service => write!(f, "Service"),
            RecognizerErrorStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Structured error delivered through `on_error`.
#[derive(Debug, Clone)]
pub struct RecognizerError {
    pub status: RecognizerErrorStatus,
    pub message: String,
    /// Numeric code for service-reported failures
    pub code: Option<u16>,
}

impl fmt::Display for RecognizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} ({}): {}", self.status, code, self.message),
            None => write!(f, "{}: {}", self.status, self.message),
        }
    }
}

impl From<SttError> for RecognizerError {
    fn from(error: SttError) -> Self {
        match error {
            SttError::MediaAccessFailed(message) => Self {
                status: RecognizerErrorStatus::MediaAccess,
                message,
                code: None,
            },
            SttError::ConnectionFailed(message) | SttError::NetworkError(message) => Self {
                status: RecognizerErrorStatus::Connection,
                message,
                code: None,
            },
            SttError::ServiceError { code, message } => Self {
                status: RecognizerErrorStatus::Service,
                message,
                code: Some(code),
            },
            SttError::ParseError(message) | SttError::ConfigurationError(message) => Self {
                status: RecognizerErrorStatus::Unknown,
                message,
                code: None,
            },
        }
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Callback with no payload (`on_started`, `on_finished`).
pub type LifecycleCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for state transitions.
pub type StateChangeCallback =
    Arc<dyn Fn(RecognizerState) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for inbound token batches.
pub type PartialResultCallback =
    Arc<dyn Fn(Vec<Token>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback for errors.
pub type RecognizerErrorCallback =
    Arc<dyn Fn(RecognizerError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The callback set handed to [`StreamingRecognizer::start`]. Unset slots
/// are skipped.
#[derive(Clone, Default)]
pub struct RecognizerCallbacks {
    pub on_started: Option<LifecycleCallback>,
    pub on_finished: Option<LifecycleCallback>,
    pub on_state_change: Option<StateChangeCallback>,
    pub on_partial_result: Option<PartialResultCallback>,
    pub on_error: Option<RecognizerErrorCallback>,
}

impl RecognizerCallbacks {
    pub(crate) async fn notify_started(&self) {
        if let Some(cb) = &self.on_started {
            cb().await;
        }
    }

    pub(crate) async fn notify_finished(&self) {
        if let Some(cb) = &self.on_finished {
            cb().await;
        }
    }

    pub(crate) async fn notify_state(&self, state: RecognizerState) {
        if let Some(cb) = &self.on_state_change {
            cb(state).await;
        }
    }

    pub(crate) async fn notify_partial(&self, tokens: Vec<Token>) {
        if let Some(cb) = &self.on_partial_result {
            cb(tokens).await;
        }
    }

    pub(crate) async fn notify_error(&self, error: RecognizerError) {
        if let Some(cb) = &self.on_error {
            cb(error).await;
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-session configuration for a recognizer engine. The API key belongs
/// to the engine itself, not the session.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub model: String,
    pub enable_language_identification: bool,
    pub enable_speaker_diarization: bool,
    pub enable_endpoint_detection: bool,
    pub translation: Option<TranslationConfig>,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model: RECOGNIZER_DEFAULT_MODEL.to_string(),
            enable_language_identification: true,
            enable_speaker_diarization: true,
            enable_endpoint_detection: true,
            translation: None,
        }
    }
}

// =============================================================================
// Engine Trait
// =============================================================================

/// A client object owning audio capture, protocol framing, and session
/// lifecycle, reporting everything through callbacks.
#[async_trait]
pub trait StreamingRecognizer: Send {
    /// Begin a session. The engine keeps running in the background and
    /// reports progress through `callbacks` until a terminal state.
    async fn start(
        &mut self,
        config: RecognizerConfig,
        callbacks: RecognizerCallbacks,
    ) -> SttResult<()>;

    /// End the session gracefully, letting pending audio finalize.
    async fn stop(&mut self);

    /// Tear the session down immediately. Safe to call at any time.
    fn cancel(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(RecognizerState::Init.to_string(), "Init");
        assert_eq!(RecognizerState::Running.to_string(), "Running");
        assert_eq!(
            RecognizerState::OpeningWebSocket.to_string(),
            "OpeningWebSocket"
        );
    }

    #[test]
    fn test_state_terminal_classification() {
        assert!(RecognizerState::Finished.is_terminal());
        assert!(RecognizerState::Error.is_terminal());
        assert!(RecognizerState::Canceled.is_terminal());
        assert!(!RecognizerState::Init.is_terminal());
        assert!(!RecognizerState::Running.is_terminal());
    }

    #[test]
    fn test_default_config_enables_everything() {
        let config = RecognizerConfig::default();
        assert_eq!(config.model, RECOGNIZER_DEFAULT_MODEL);
        assert!(config.enable_language_identification);
        assert!(config.enable_speaker_diarization);
        assert!(config.enable_endpoint_detection);
        assert!(config.translation.is_none());
    }

    #[test]
    fn test_error_conversion() {
        let err: RecognizerError = SttError::MediaAccessFailed("denied".into()).into();
        assert_eq!(err.status, RecognizerErrorStatus::MediaAccess);
        assert!(err.code.is_none());

        let err: RecognizerError = SttError::ServiceError {
            code: 401,
            message: "Unauthorized".into(),
        }
        .into();
        assert_eq!(err.status, RecognizerErrorStatus::Service);
        assert_eq!(err.code, Some(401));
        assert_eq!(err.to_string(), "Service (401): Unauthorized");

        let err: RecognizerError = SttError::NetworkError("reset".into()).into();
        assert_eq!(err.status, RecognizerErrorStatus::Connection);
    }
}
