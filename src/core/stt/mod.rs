//! Speech-to-text streaming transport.
//!
//! The [`base`] module holds the shared error and token types; [`soniox`]
//! contains the wire protocol and the duplex WebSocket client.

mod base;
pub mod soniox;

// Re-export public types and traits
pub use base::{END_MARKER, FIN_MARKER, SttError, SttResult, Token};
pub use soniox::{
    AudioFormat, DEFAULT_REALTIME_MODEL, RecognitionContext, SONIOX_WEBSOCKET_URL, SonioxConfig,
    SonioxStt, SttEvent, TranscribeResponse, TranslationConfig,
};
