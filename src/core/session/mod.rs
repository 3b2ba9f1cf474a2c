//! Manually driven transcription sessions.
//!
//! [`controller`] owns the session lifecycle and state machine;
//! [`transcript`] maintains the committed and in-flight token sequences.

pub mod controller;
pub mod transcript;

pub use controller::{SessionController, SessionEvent, SessionState};
pub use transcript::{BatchOutcome, TranscriptState};
