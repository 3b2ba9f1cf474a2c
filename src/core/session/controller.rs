//! Transcription session controller.
//!
//! [`SessionController`] owns the full lifecycle of one session: audio
//! acquisition, the duplex connection, token merging, and state reporting.
//! All session and token mutation happens in a single driver task, so
//! consumers observe a sequentially consistent view through the state watch
//! channel, the event stream, and the snapshot getters.
//!
//! # State machine
//!
//! ```text
//! Idle → RequestingMedia → ConnectionOpening → Streaming
//!                                                 │
//!                        ┌────────────────────────┤
//!                        ▼                        ▼
//!               FinishingProcessing        Error | Canceled
//!                        │
//!                        ▼
//!                    Finished
//! ```
//!
//! `Finished`, `Error`, and `Canceled` are terminal. `cancel()` forces
//! `Canceled` from any non-terminal state. A terminal controller returns to
//! `Idle` via `reset()`, or implicitly on the next `start()`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transcript::TranscriptState;
use crate::core::audio::{AudioSource, AudioSpec, CaptureGuard, MicrophoneSource};
use crate::core::stt::{SonioxConfig, SonioxStt, SttError, SttEvent, SttResult, Token};

// =============================================================================
// Constants
// =============================================================================

/// Bounded wait for remaining results after the end-of-audio sentinel.
const FINISH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the consumer-facing event channel.
const SESSION_EVENT_BUFFER: usize = 256;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a transcription session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session started, or terminal state cleared by `reset()`
    #[default]
    Idle,
    /// Acquiring the audio input
    RequestingMedia,
    /// Opening the WebSocket and sending the configuration payload
    ConnectionOpening,
    /// Audio flowing out, token batches flowing in
    Streaming,
    /// End-of-audio sentinel sent; draining remaining results
    FinishingProcessing,
    /// Session completed normally (terminal)
    Finished,
    /// Session failed (terminal); see `last_error()`
    Error,
    /// Session canceled (terminal)
    Canceled,
}

impl SessionState {
    /// Whether the session has ended and will make no further progress.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Finished | SessionState::Error | SessionState::Canceled
        )
    }

    /// Whether a session currently holds audio or network resources.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::RequestingMedia
                | SessionState::ConnectionOpening
                | SessionState::Streaming
                | SessionState::FinishingProcessing
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::RequestingMedia => write!(f, "RequestingMedia"),
            SessionState::ConnectionOpening => write!(f, "ConnectionOpening"),
            SessionState::Streaming => write!(f, "Streaming"),
            SessionState::FinishingProcessing => write!(f, "FinishingProcessing"),
            SessionState::Finished => write!(f, "Finished"),
            SessionState::Error => write!(f, "Error"),
            SessionState::Canceled => write!(f, "Canceled"),
        }
    }
}

// =============================================================================
// Session Events
// =============================================================================

/// Typed events emitted by the controller, delivered in arrival order to a
/// single consumer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session moved to a new state
    StateChanged(SessionState),
    /// Text committed by one inbound batch
    TranscriptFinal(String),
    /// The full in-flight guess after one inbound batch (may be empty,
    /// which clears the previous guess)
    TranscriptInterim(String),
    /// The session completed normally
    Finished,
    /// The session failed; the same error is available via `last_error()`
    Failed(SttError),
}

// =============================================================================
// Shared Session Data
// =============================================================================

struct SessionShared {
    transcript: Mutex<TranscriptState>,
    last_error: Mutex<Option<SttError>>,
}

fn publish_state(
    state_tx: &watch::Sender<SessionState>,
    event_tx: &mpsc::Sender<SessionEvent>,
    state: SessionState,
) {
    let changed = state_tx.send_if_modified(|current| {
        if *current != state {
            *current = state;
            true
        } else {
            false
        }
    });
    if changed {
        info!("Session state -> {}", state);
        if event_tx
            .try_send(SessionEvent::StateChanged(state))
            .is_err()
        {
            debug!("State event dropped - consumer behind or absent");
        }
    }
}

// =============================================================================
// Session Controller
// =============================================================================

/// Owns one transcription session at a time.
///
/// Construct once per consumer; `start()` acquires resources, `stop()` ends
/// the stream gracefully, `cancel()` tears everything down immediately, and
/// `reset()` clears the transcript and returns a terminal controller to
/// `Idle`. Dropping the controller cancels any running session.
pub struct SessionController {
    audio_source: Box<dyn AudioSource>,
    shared: Arc<SessionShared>,
    state_tx: watch::Sender<SessionState>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    stop_tx: Option<oneshot::Sender<()>>,
    cancel: CancellationToken,
    driver: Option<tokio::task::JoinHandle<()>>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    /// Controller capturing from the default microphone.
    pub fn new() -> Self {
        Self::with_audio_source(Box::new(MicrophoneSource::new()))
    }

    /// Controller using a custom audio source (file replay, tests).
    pub fn with_audio_source(audio_source: Box<dyn AudioSource>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_BUFFER);

        Self {
            audio_source,
            shared: Arc::new(SessionShared {
                transcript: Mutex::new(TranscriptState::new()),
                last_error: Mutex::new(None),
            }),
            state_tx,
            event_tx,
            event_rx: Some(event_rx),
            stop_tx: None,
            cancel: CancellationToken::new(),
            driver: None,
        }
    }

    /// Take the event receiver. Available once; events are delivered to a
    /// single consumer in arrival order.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Watch channel for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Snapshot of the committed token sequence.
    pub fn final_tokens(&self) -> Vec<Token> {
        self.shared.transcript.lock().final_tokens().to_vec()
    }

    /// Snapshot of the in-flight token sequence.
    pub fn non_final_tokens(&self) -> Vec<Token> {
        self.shared.transcript.lock().non_final_tokens().to_vec()
    }

    /// The full displayed transcript: committed text plus in-flight guess.
    pub fn display_text(&self) -> String {
        self.shared.transcript.lock().display_text()
    }

    /// The error that terminated the session, if any.
    pub fn last_error(&self) -> Option<SttError> {
        self.shared.last_error.lock().clone()
    }

    /// Start a new session.
    ///
    /// A warned no-op while a session is active; a fresh start from a
    /// terminal state implicitly resets the transcript and error. Fails
    /// without opening a connection when the audio input cannot be
    /// acquired.
    pub async fn start(&mut self, config: SonioxConfig) -> SttResult<()> {
        if self.state().is_active() {
            warn!("start() ignored: a session is already active");
            return Ok(());
        }

        config.validate()?;

        // Implicit reset before a fresh start.
        self.shared.transcript.lock().clear();
        *self.shared.last_error.lock() = None;
        if let Some(prior) = self.driver.take() {
            prior.abort();
        }
        self.cancel = CancellationToken::new();

        let session_id = Uuid::new_v4();
        info!(%session_id, model = %config.model, "Starting transcription session");

        publish_state(&self.state_tx, &self.event_tx, SessionState::RequestingMedia);

        let spec = AudioSpec {
            sample_rate: config.sample_rate,
            channels: config.num_channels,
            chunk_ms: 100,
        };
        let audio = match self.audio_source.open(&spec) {
            Ok(audio) => audio,
            Err(e) => {
                self.record_failure(e.clone());
                return Err(e);
            }
        };

        publish_state(
            &self.state_tx,
            &self.event_tx,
            SessionState::ConnectionOpening,
        );

        let mut client = match SonioxStt::new(config) {
            Ok(client) => client,
            Err(e) => {
                self.record_failure(e.clone());
                return Err(e);
            }
        };
        let events = match client.connect().await {
            Ok(events) => events,
            Err(e) => {
                // The audio stream drops here, releasing the capture.
                self.record_failure(e.clone());
                return Err(e);
            }
        };

        publish_state(&self.state_tx, &self.event_tx, SessionState::Streaming);

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let (chunks, capture) = audio.into_parts();
        let driver = SessionDriver {
            client,
            chunks,
            capture: Some(capture),
            events,
            shared: self.shared.clone(),
            state_tx: self.state_tx.clone(),
            event_tx: self.event_tx.clone(),
            cancel: self.cancel.clone(),
            stop_rx,
        };
        self.driver = Some(tokio::spawn(driver.run()));

        Ok(())
    }

    /// End the stream gracefully: the remaining audio is finalized, the
    /// end-of-audio sentinel is sent, and results are drained for a bounded
    /// wait. Idempotent; a second call has no effect.
    pub fn stop(&mut self) {
        match self.stop_tx.take() {
            Some(stop_tx) => {
                let _ = stop_tx.send(());
            }
            None => {
                debug!("stop() ignored: no active session");
            }
        }
    }

    /// Tear down immediately without waiting for a graceful close. Always
    /// safe, including before `start()`; forces `Canceled` from any
    /// non-terminal state.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if self.driver.is_none() && !self.state().is_terminal() {
            publish_state(&self.state_tx, &self.event_tx, SessionState::Canceled);
        }
    }

    /// Clear the token sequences and stored error. Returns a terminal
    /// controller to `Idle`; an in-progress session is not affected.
    pub fn reset(&mut self) {
        self.shared.transcript.lock().clear();
        *self.shared.last_error.lock() = None;
        if self.state().is_terminal() {
            publish_state(&self.state_tx, &self.event_tx, SessionState::Idle);
        }
    }

    fn record_failure(&self, error: SttError) {
        *self.shared.last_error.lock() = Some(error.clone());
        publish_state(&self.state_tx, &self.event_tx, SessionState::Error);
        let _ = self.event_tx.try_send(SessionEvent::Failed(error));
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Driver Task
// =============================================================================

enum StreamOutcome {
    /// Graceful finish requested (stop() or audio source exhausted)
    FinishRequested,
    /// Immediate teardown requested
    Canceled,
    /// The service reported completion on its own
    ServerFinished,
    /// Fatal failure
    Failed(SttError),
}

enum DrainOutcome {
    Finished,
    Canceled,
    Failed(SttError),
}

/// Runs one session: forwards audio, merges inbound batches, and walks the
/// state machine. All mutation happens here.
struct SessionDriver {
    client: SonioxStt,
    chunks: mpsc::Receiver<Bytes>,
    capture: Option<CaptureGuard>,
    events: mpsc::Receiver<SttEvent>,
    shared: Arc<SessionShared>,
    state_tx: watch::Sender<SessionState>,
    event_tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
    stop_rx: oneshot::Receiver<()>,
}

impl SessionDriver {
    async fn run(mut self) {
        match self.stream_phase().await {
            StreamOutcome::FinishRequested => self.finish_phase().await,
            StreamOutcome::Canceled => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.set_state(SessionState::Canceled);
            }
            StreamOutcome::ServerFinished => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.set_state(SessionState::Finished);
                let _ = self.event_tx.try_send(SessionEvent::Finished);
            }
            StreamOutcome::Failed(error) => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.fail(error);
            }
        }
    }

    /// Streaming phase: runs until stop, cancel, audio exhaustion, or a
    /// fatal event.
    async fn stream_phase(&mut self) -> StreamOutcome {
        let mut stop_closed = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Session canceled");
                    return StreamOutcome::Canceled;
                }

                stop = &mut self.stop_rx, if !stop_closed => {
                    match stop {
                        Ok(()) => {
                            info!("Graceful stop requested");
                            return StreamOutcome::FinishRequested;
                        }
                        // The controller dropped the sender without
                        // signaling; keep streaming.
                        Err(_) => stop_closed = true,
                    }
                }

                chunk = self.chunks.recv() => {
                    match chunk {
                        Some(data) => {
                            if let Err(send_err) = self.client.send_audio(data).await {
                                // The connection task reports its root cause
                                // before dropping the audio channel; prefer
                                // that over the send failure.
                                while let Ok(event) = self.events.try_recv() {
                                    match event {
                                        SttEvent::Batch(tokens) => self.merge_batch(tokens),
                                        SttEvent::Error(e) => return StreamOutcome::Failed(e),
                                        SttEvent::Finished { .. } => {
                                            return StreamOutcome::ServerFinished;
                                        }
                                        SttEvent::Closed => break,
                                    }
                                }
                                return StreamOutcome::Failed(send_err);
                            }
                        }
                        None => {
                            info!("Audio source exhausted");
                            return StreamOutcome::FinishRequested;
                        }
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(SttEvent::Batch(tokens)) => self.merge_batch(tokens),
                        Some(SttEvent::Finished { .. }) => return StreamOutcome::ServerFinished,
                        Some(SttEvent::Closed) => {
                            return StreamOutcome::Failed(SttError::NetworkError(
                                "Server closed the connection unexpectedly".to_string(),
                            ));
                        }
                        Some(SttEvent::Error(e)) => return StreamOutcome::Failed(e),
                        None => {
                            return StreamOutcome::Failed(SttError::NetworkError(
                                "Event stream ended unexpectedly".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Finishing phase: release the capture, send the finalize request and
    /// the end-of-audio sentinel, then drain remaining results for a
    /// bounded wait.
    async fn finish_phase(mut self) {
        self.capture.take();
        self.set_state(SessionState::FinishingProcessing);

        if let Err(e) = self.client.finalize().await {
            warn!("Finalize request failed: {}", e);
        }
        if let Err(e) = self.client.finish().await {
            let _ = self.client.disconnect().await;
            self.fail(e);
            return;
        }

        let drained = timeout(FINISH_DRAIN_TIMEOUT, async {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return DrainOutcome::Canceled,
                    event = self.events.recv() => {
                        match event {
                            Some(SttEvent::Batch(tokens)) => self.merge_batch(tokens),
                            Some(SttEvent::Finished { .. }) => return DrainOutcome::Finished,
                            // A close after the sentinel counts as done.
                            Some(SttEvent::Closed) | None => return DrainOutcome::Finished,
                            Some(SttEvent::Error(e)) => return DrainOutcome::Failed(e),
                        }
                    }
                }
            }
        })
        .await;

        let _ = self.client.disconnect().await;

        match drained {
            Ok(DrainOutcome::Finished) => {
                self.set_state(SessionState::Finished);
                let _ = self.event_tx.try_send(SessionEvent::Finished);
            }
            Ok(DrainOutcome::Canceled) => self.set_state(SessionState::Canceled),
            Ok(DrainOutcome::Failed(e)) => self.fail(e),
            Err(_elapsed) => {
                warn!(
                    "Service did not confirm completion within {:?}; closing anyway",
                    FINISH_DRAIN_TIMEOUT
                );
                self.set_state(SessionState::Finished);
                let _ = self.event_tx.try_send(SessionEvent::Finished);
            }
        }
    }

    fn merge_batch(&mut self, tokens: Vec<Token>) {
        let outcome = self.shared.transcript.lock().apply_batch(tokens);
        if let Some(outcome) = outcome {
            if !outcome.appended.is_empty() {
                let text: String = outcome
                    .appended
                    .iter()
                    .map(|t| t.text.as_str())
                    .collect();
                debug!("Transcript final: {:?}", text);
                let _ = self.event_tx.try_send(SessionEvent::TranscriptFinal(text));
            }
            let interim: String = outcome
                .non_final
                .iter()
                .map(|t| t.text.as_str())
                .collect();
            let _ = self
                .event_tx
                .try_send(SessionEvent::TranscriptInterim(interim));
        }
    }

    fn set_state(&self, state: SessionState) {
        publish_state(&self.state_tx, &self.event_tx, state);
    }

    fn fail(&self, error: SttError) {
        *self.shared.last_error.lock() = Some(error.clone());
        self.set_state(SessionState::Error);
        let _ = self.event_tx.try_send(SessionEvent::Failed(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::{AudioStream, CaptureHandle};

    struct NoopHandle;
    impl CaptureHandle for NoopHandle {
        fn stop(&mut self) {}
    }

    /// Audio source that always fails, as if microphone permission were
    /// denied.
    struct DeniedSource;
    impl AudioSource for DeniedSource {
        fn open(&mut self, _spec: &AudioSpec) -> SttResult<AudioStream> {
            Err(SttError::MediaAccessFailed(
                "Permission denied".to_string(),
            ))
        }
    }

    /// Audio source producing an endless stream of silence.
    struct SilenceSource;
    impl AudioSource for SilenceSource {
        fn open(&mut self, spec: &AudioSpec) -> SttResult<AudioStream> {
            let (tx, rx) = mpsc::channel(16);
            let chunk = Bytes::from(vec![0u8; spec.chunk_bytes()]);
            tokio::spawn(async move {
                while tx.send(chunk.clone()).await.is_ok() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            });
            Ok(AudioStream {
                chunks: rx,
                guard: CaptureGuard::new(Box::new(NoopHandle)),
            })
        }
    }

    fn test_config() -> SonioxConfig {
        let mut config = SonioxConfig::new("test_key");
        // Nothing listens here; connection attempts fail fast.
        config.endpoint = "ws://127.0.0.1:9".to_string();
        config
    }

    #[test]
    fn test_state_display_and_classification() {
        assert_eq!(SessionState::Idle.to_string(), "Idle");
        assert_eq!(SessionState::Streaming.to_string(), "Streaming");
        assert_eq!(
            SessionState::FinishingProcessing.to_string(),
            "FinishingProcessing"
        );

        assert!(SessionState::Finished.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(SessionState::Canceled.is_terminal());
        assert!(!SessionState::Idle.is_terminal());

        assert!(SessionState::Streaming.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Finished.is_active());
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let mut controller = SessionController::with_audio_source(Box::new(SilenceSource));
        controller.cancel();
        assert_eq!(controller.state(), SessionState::Canceled);

        // Idempotent.
        controller.cancel();
        assert_eq!(controller.state(), SessionState::Canceled);
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let mut controller = SessionController::with_audio_source(Box::new(SilenceSource));
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_reset_returns_terminal_to_idle() {
        let mut controller = SessionController::with_audio_source(Box::new(SilenceSource));
        controller.cancel();
        assert_eq!(controller.state(), SessionState::Canceled);

        controller.reset();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.final_tokens().is_empty());
        assert!(controller.last_error().is_none());
    }

    #[tokio::test]
    async fn test_start_with_denied_media() {
        let mut controller = SessionController::with_audio_source(Box::new(DeniedSource));

        let result = controller.start(test_config()).await;
        assert!(matches!(result, Err(SttError::MediaAccessFailed(_))));
        assert_eq!(controller.state(), SessionState::Error);
        assert!(matches!(
            controller.last_error(),
            Some(SttError::MediaAccessFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_start_with_unreachable_endpoint() {
        let mut controller = SessionController::with_audio_source(Box::new(SilenceSource));

        let result = controller.start(test_config()).await;
        assert!(matches!(result, Err(SttError::ConnectionFailed(_))));
        assert_eq!(controller.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let mut controller = SessionController::with_audio_source(Box::new(SilenceSource));

        let result = controller.start(SonioxConfig::default()).await;
        assert!(matches!(result, Err(SttError::ConfigurationError(_))));
        // Configuration errors are rejected before any resource
        // acquisition and do not mark the session failed.
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_reset_after_error_clears_error() {
        let mut controller = SessionController::with_audio_source(Box::new(DeniedSource));
        let _ = controller.start(test_config()).await;
        assert!(controller.last_error().is_some());

        controller.reset();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.last_error().is_none());
    }

    #[tokio::test]
    async fn test_events_report_media_failure() {
        let mut controller = SessionController::with_audio_source(Box::new(DeniedSource));
        let mut events = controller.take_events().unwrap();

        let _ = controller.start(test_config()).await;

        let mut saw_requesting_media = false;
        let mut saw_failed = false;
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::StateChanged(SessionState::RequestingMedia) => {
                    saw_requesting_media = true;
                }
                SessionEvent::Failed(SttError::MediaAccessFailed(_)) => {
                    saw_failed = true;
                }
                _ => {}
            }
        }
        assert!(saw_requesting_media);
        assert!(saw_failed);
    }
}
