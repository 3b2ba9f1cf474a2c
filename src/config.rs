//! Environment-backed application configuration.
//!
//! Resolution order is CLI flags over environment variables over defaults;
//! this module handles the environment layer. The binary loads `.env` via
//! dotenvy before calling [`AppConfig::from_env`].
//!
//! Recognized variables:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `SONIOX_API_KEY` | API key (required) |
//! | `SONIOX_MODEL` | Transcription model override |
//! | `SONIOX_WEBSOCKET_URL` | Endpoint override (testing, private deployments) |
//! | `SONIOX_LANGUAGE_HINTS` | Comma-separated language hints; empty enables auto-detect |

use crate::core::stt::{
    DEFAULT_REALTIME_MODEL, SONIOX_WEBSOCKET_URL, SonioxConfig, SttError, SttResult,
};

/// Application-level configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    /// `None` enables automatic language detection
    pub language_hints: Option<Vec<String>>,
}

impl AppConfig {
    /// Read configuration from environment variables.
    pub fn from_env() -> SttResult<Self> {
        let api_key = std::env::var("SONIOX_API_KEY").map_err(|_| {
            SttError::ConfigurationError(
                "SONIOX_API_KEY is not set; export it or add it to .env".to_string(),
            )
        })?;
        if api_key.trim().is_empty() {
            return Err(SttError::ConfigurationError(
                "SONIOX_API_KEY is empty".to_string(),
            ));
        }

        let model = std::env::var("SONIOX_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string());

        let endpoint = std::env::var("SONIOX_WEBSOCKET_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| SONIOX_WEBSOCKET_URL.to_string());

        let language_hints = std::env::var("SONIOX_LANGUAGE_HINTS")
            .ok()
            .map(|hints| {
                hints
                    .split(',')
                    .map(|h| h.trim().to_string())
                    .filter(|h| !h.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|hints: &Vec<String>| !hints.is_empty());

        Ok(Self {
            api_key,
            model,
            endpoint,
            language_hints,
        })
    }

    /// Build a session configuration from this application configuration.
    pub fn session_config(&self) -> SonioxConfig {
        SonioxConfig {
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            language_hints: self.language_hints.clone(),
            endpoint: self.endpoint.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("SONIOX_API_KEY");
            std::env::remove_var("SONIOX_MODEL");
            std::env::remove_var("SONIOX_WEBSOCKET_URL");
            std::env::remove_var("SONIOX_LANGUAGE_HINTS");
        }
    }

    #[test]
    #[serial]
    fn test_missing_api_key_fails() {
        clear_env();
        let result = AppConfig::from_env();
        assert!(matches!(result, Err(SttError::ConfigurationError(_))));
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        clear_env();
        unsafe {
            std::env::set_var("SONIOX_API_KEY", "test_key");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.api_key, "test_key");
        assert_eq!(config.model, DEFAULT_REALTIME_MODEL);
        assert_eq!(config.endpoint, SONIOX_WEBSOCKET_URL);
        assert!(config.language_hints.is_none());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_overrides_applied() {
        clear_env();
        unsafe {
            std::env::set_var("SONIOX_API_KEY", "test_key");
            std::env::set_var("SONIOX_MODEL", "stt-rt-v3");
            std::env::set_var("SONIOX_WEBSOCKET_URL", "ws://127.0.0.1:9030/ws");
            std::env::set_var("SONIOX_LANGUAGE_HINTS", "en, de ,fr");
        }

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.model, "stt-rt-v3");
        assert_eq!(config.endpoint, "ws://127.0.0.1:9030/ws");
        assert_eq!(
            config.language_hints,
            Some(vec!["en".to_string(), "de".to_string(), "fr".to_string()])
        );

        let session = config.session_config();
        assert_eq!(session.api_key, "test_key");
        assert_eq!(session.model, "stt-rt-v3");
        assert!(session.validate().is_ok());

        clear_env();
    }
}
