pub mod audio;
pub mod engine;
pub mod session;
pub mod stt;

// Re-export commonly used types for convenience
pub use stt::{
    SonioxConfig, SonioxStt, SttError, SttEvent, SttResult, Token, TranscribeResponse,
    TranslationConfig,
};

pub use session::{SessionController, SessionEvent, SessionState, TranscriptState};

pub use engine::{
    RecognizerCallbacks, RecognizerConfig, RecognizerError, RecognizerSession, RecognizerState,
    SonioxRecognizer, StreamingRecognizer,
};

pub use audio::{AudioSource, AudioSpec, AudioStream, MicrophoneSource, WavSource};
