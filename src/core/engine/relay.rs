//! Relay between a recognizer engine and its consumer.
//!
//! [`RecognizerSession`] owns a boxed [`StreamingRecognizer`], registers the
//! callback set on start, and re-exposes the callback-driven state as
//! snapshot getters: recognizer state, the committed and in-flight token
//! sequences, and the last error. Token batches are partitioned here, with
//! the same merge semantics as the manually driven session: final tokens
//! append, non-final tokens replace.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    LifecycleCallback, RecognizerCallbacks, RecognizerConfig, RecognizerError, RecognizerState,
    StreamingRecognizer,
};
use crate::core::session::transcript::TranscriptState;
use crate::core::stt::{SttResult, Token};

struct RelayShared {
    state: Mutex<RecognizerState>,
    transcript: Mutex<TranscriptState>,
    error: Mutex<Option<RecognizerError>>,
}

/// Consumer-facing wrapper around a recognizer engine.
pub struct RecognizerSession {
    engine: Box<dyn StreamingRecognizer>,
    shared: Arc<RelayShared>,
    on_started: Option<LifecycleCallback>,
    on_finished: Option<LifecycleCallback>,
}

impl RecognizerSession {
    pub fn new(engine: Box<dyn StreamingRecognizer>) -> Self {
        Self {
            engine,
            shared: Arc::new(RelayShared {
                state: Mutex::new(RecognizerState::Init),
                transcript: Mutex::new(TranscriptState::new()),
                error: Mutex::new(None),
            }),
            on_started: None,
            on_finished: None,
        }
    }

    /// Hook invoked once the engine is running.
    pub fn on_started(&mut self, callback: LifecycleCallback) {
        self.on_started = Some(callback);
    }

    /// Hook invoked once the engine finished gracefully.
    pub fn on_finished(&mut self, callback: LifecycleCallback) {
        self.on_finished = Some(callback);
    }

    /// Clear prior results and start the engine.
    pub async fn start_transcription(&mut self, config: RecognizerConfig) -> SttResult<()> {
        {
            self.shared.transcript.lock().clear();
            *self.shared.error.lock() = None;
            *self.shared.state.lock() = RecognizerState::Init;
        }

        let callbacks = RecognizerCallbacks {
            on_started: self.on_started.clone(),
            on_finished: self.on_finished.clone(),
            on_state_change: Some({
                let shared = self.shared.clone();
                Arc::new(move |state| {
                    let shared = shared.clone();
                    Box::pin(async move {
                        *shared.state.lock() = state;
                    })
                })
            }),
            on_partial_result: Some({
                let shared = self.shared.clone();
                Arc::new(move |tokens: Vec<Token>| {
                    let shared = shared.clone();
                    Box::pin(async move {
                        shared.transcript.lock().apply_batch(tokens);
                    })
                })
            }),
            on_error: Some({
                let shared = self.shared.clone();
                Arc::new(move |error: RecognizerError| {
                    let shared = shared.clone();
                    Box::pin(async move {
                        *shared.error.lock() = Some(error);
                    })
                })
            }),
        };

        self.engine.start(config, callbacks).await
    }

    /// End the session gracefully.
    pub async fn stop_transcription(&mut self) {
        self.engine.stop().await;
    }

    /// Tear the session down immediately. Safe at any time.
    pub fn cancel(&mut self) {
        self.engine.cancel();
    }

    /// Current recognizer state.
    pub fn state(&self) -> RecognizerState {
        *self.shared.state.lock()
    }

    /// Snapshot of the committed token sequence.
    pub fn final_tokens(&self) -> Vec<Token> {
        self.shared.transcript.lock().final_tokens().to_vec()
    }

    /// Snapshot of the in-flight token sequence.
    pub fn non_final_tokens(&self) -> Vec<Token> {
        self.shared.transcript.lock().non_final_tokens().to_vec()
    }

    /// Committed text plus the in-flight guess.
    pub fn display_text(&self) -> String {
        self.shared.transcript.lock().display_text()
    }

    /// The last error reported through `on_error`.
    pub fn error(&self) -> Option<RecognizerError> {
        self.shared.error.lock().clone()
    }
}

impl Drop for RecognizerSession {
    fn drop(&mut self) {
        self.engine.cancel();
    }
}
