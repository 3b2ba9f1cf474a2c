//! Configuration types for the Soniox real-time WebSocket API.
//!
//! This module contains all configuration-related types including:
//! - Audio format selection
//! - Language hints and recognition context
//! - Diarization, language-identification, and endpoint-detection toggles
//! - Optional live translation directives

use std::str::FromStr;

use serde::Serialize;

use crate::core::stt::base::{SttError, SttResult};

// =============================================================================
// Constants
// =============================================================================

/// Default real-time transcription endpoint.
pub const SONIOX_WEBSOCKET_URL: &str = "wss://stt-rt.soniox.com/transcribe-websocket";

/// Default model for the manually driven session controller.
pub const DEFAULT_REALTIME_MODEL: &str = "stt-rt-preview";

/// Minimum supported sample rate for raw PCM input (telephony)
pub const MIN_SAMPLE_RATE: u32 = 8000;

/// Maximum supported sample rate for raw PCM input
pub const MAX_SAMPLE_RATE: u32 = 48000;

// =============================================================================
// Audio Format
// =============================================================================

/// How the audio frames sent after the start request are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// Let the service detect the container/codec from the byte stream
    Auto,
    /// PCM signed 16-bit little-endian; requires `sample_rate` and
    /// `num_channels` in the start request
    #[default]
    PcmS16le,
}

impl AudioFormat {
    /// Convert to the wire value used in the start request.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::PcmS16le => "pcm_s16le",
        }
    }

    /// Whether this format carries explicit sample-rate/channel metadata.
    #[inline]
    pub fn is_raw_pcm(&self) -> bool {
        matches!(self, Self::PcmS16le)
    }
}

impl FromStr for AudioFormat {
    type Err = ();

    /// Parse from a format string (case-insensitive).
    /// Returns `Ok(Self::Auto)` for unknown values.
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "pcm_s16le" | "pcm" | "linear16" => Self::PcmS16le,
            _ => Self::Auto,
        })
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Live translation directive for the session.
///
/// One-way translation translates everything into `language_b`; two-way
/// translation translates between the two languages in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TranslationConfig {
    /// Translate from `language_a` into `language_b`
    #[serde(rename = "one_way")]
    OneWay {
        /// Source language code
        language_a: String,
        /// Target language code
        language_b: String,
    },
    /// Translate between both languages in both directions
    #[serde(rename = "two_way")]
    TwoWay {
        /// First language code
        language_a: String,
        /// Second language code
        language_b: String,
    },
}

// =============================================================================
// Recognition Context
// =============================================================================

/// A key/value pair biasing recognition towards domain vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextEntry {
    pub key: String,
    pub value: String,
}

/// A source/target pair pinning a translation for a specific term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationTerm {
    pub source: String,
    pub target: String,
}

/// Optional recognition context sent with the start request.
///
/// All fields are independent; empty collections are omitted from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecognitionContext {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub general: Vec<ContextEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub translation_terms: Vec<TranslationTerm>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Immutable per-session configuration.
///
/// Supplied at session start and never mutated mid-session; changing the
/// language or model requires a new session.
#[derive(Debug, Clone)]
pub struct SonioxConfig {
    /// API key, sent inside the first WebSocket message
    pub api_key: String,

    /// Transcription model (e.g. "stt-rt-preview", "stt-rt-v3")
    pub model: String,

    /// Encoding of the audio frames that follow the start request
    pub audio_format: AudioFormat,

    /// Sample rate of the raw PCM stream, Hz. Ignored for `Auto`.
    pub sample_rate: u32,

    /// Channel count of the raw PCM stream. Ignored for `Auto`.
    pub num_channels: u16,

    /// Language hints; `None` means automatic language detection
    pub language_hints: Option<Vec<String>>,

    /// Optional vocabulary/context biasing
    pub context: Option<RecognitionContext>,

    /// Tag tokens with a speaker label
    pub enable_speaker_diarization: bool,

    /// Report the detected language per token
    pub enable_language_identification: bool,

    /// Let the service mark utterance boundaries with `<end>` tokens
    pub enable_endpoint_detection: bool,

    /// Optional live translation directive
    pub translation: Option<TranslationConfig>,

    /// WebSocket endpoint. Overridable for testing and private deployments.
    pub endpoint: String,
}

impl Default for SonioxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            audio_format: AudioFormat::PcmS16le,
            sample_rate: 16000,
            num_channels: 1,
            language_hints: Some(vec!["en".to_string()]),
            context: None,
            enable_speaker_diarization: true,
            enable_language_identification: false,
            enable_endpoint_detection: false,
            translation: None,
            endpoint: SONIOX_WEBSOCKET_URL.to_string(),
        }
    }
}

impl SonioxConfig {
    /// Create a configuration with the given API key and the defaults above.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration before any resource acquisition.
    pub fn validate(&self) -> SttResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(SttError::ConfigurationError(
                "API key is required".to_string(),
            ));
        }

        if self.model.trim().is_empty() {
            return Err(SttError::ConfigurationError("Model is required".to_string()));
        }

        if self.audio_format.is_raw_pcm() {
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
                return Err(SttError::ConfigurationError(format!(
                    "Sample rate {} Hz is outside supported range ({}-{} Hz)",
                    self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
                )));
            }
            if self.num_channels == 0 {
                return Err(SttError::ConfigurationError(
                    "Channel count must be at least 1".to_string(),
                ));
            }
        }

        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| {
            SttError::ConfigurationError(format!("Invalid endpoint '{}': {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(SttError::ConfigurationError(format!(
                "Endpoint must use ws:// or wss://, got '{}'",
                endpoint.scheme()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_format_as_str() {
        assert_eq!(AudioFormat::Auto.as_str(), "auto");
        assert_eq!(AudioFormat::PcmS16le.as_str(), "pcm_s16le");
    }

    #[test]
    fn test_audio_format_from_str() {
        assert_eq!("pcm_s16le".parse::<AudioFormat>(), Ok(AudioFormat::PcmS16le));
        assert_eq!("linear16".parse::<AudioFormat>(), Ok(AudioFormat::PcmS16le));
        assert_eq!("auto".parse::<AudioFormat>(), Ok(AudioFormat::Auto));
        assert_eq!("unknown".parse::<AudioFormat>(), Ok(AudioFormat::Auto));
    }

    #[test]
    fn test_default_config() {
        let config = SonioxConfig::default();
        assert_eq!(config.model, DEFAULT_REALTIME_MODEL);
        assert_eq!(config.audio_format, AudioFormat::PcmS16le);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.num_channels, 1);
        assert_eq!(config.language_hints, Some(vec!["en".to_string()]));
        assert!(config.enable_speaker_diarization);
        assert!(!config.enable_language_identification);
        assert!(!config.enable_endpoint_detection);
        assert_eq!(config.endpoint, SONIOX_WEBSOCKET_URL);
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = SonioxConfig::default();
        let result = config.validate();
        assert!(result.is_err());
        if let Err(SttError::ConfigurationError(msg)) = result {
            assert!(msg.contains("API key is required"));
        } else {
            panic!("Expected ConfigurationError");
        }
    }

    #[test]
    fn test_validate_sample_rate_bounds() {
        let mut config = SonioxConfig::new("test_key");
        config.sample_rate = 4000;
        assert!(config.validate().is_err());

        config.sample_rate = 96000;
        assert!(config.validate().is_err());

        config.sample_rate = 16000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ignores_sample_rate_for_auto() {
        let mut config = SonioxConfig::new("test_key");
        config.audio_format = AudioFormat::Auto;
        config.sample_rate = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let mut config = SonioxConfig::new("test_key");
        config.endpoint = "https://stt-rt.soniox.com".to_string();
        assert!(config.validate().is_err());

        config.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());

        config.endpoint = "ws://127.0.0.1:9030/transcribe-websocket".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_translation_serialization() {
        let one_way = TranslationConfig::OneWay {
            language_a: "en".to_string(),
            language_b: "es".to_string(),
        };
        let json = serde_json::to_string(&one_way).unwrap();
        assert!(json.contains(r#""type":"one_way""#));
        assert!(json.contains(r#""language_a":"en""#));
        assert!(json.contains(r#""language_b":"es""#));

        let two_way = TranslationConfig::TwoWay {
            language_a: "en".to_string(),
            language_b: "de".to_string(),
        };
        let json = serde_json::to_string(&two_way).unwrap();
        assert!(json.contains(r#""type":"two_way""#));
    }

    #[test]
    fn test_context_serialization_omits_empty() {
        let context = RecognitionContext {
            terms: vec!["tungstenite".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_string(&context).unwrap();
        assert!(json.contains("terms"));
        assert!(!json.contains("general"));
        assert!(!json.contains("text"));
        assert!(!json.contains("translation_terms"));
    }
}
