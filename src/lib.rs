pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use core::audio::{AudioSource, AudioSpec, AudioStream, MicrophoneSource, WavSource};
pub use core::engine::{
    RecognizerConfig, RecognizerError, RecognizerSession, RecognizerState, SonioxRecognizer,
    StreamingRecognizer,
};
pub use core::session::{SessionController, SessionEvent, SessionState, TranscriptState};
pub use core::stt::{
    SonioxConfig, SonioxStt, SttError, SttEvent, SttResult, Token, TranslationConfig,
};
