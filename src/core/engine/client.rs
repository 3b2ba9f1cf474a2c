//! Soniox-backed recognizer engine.
//!
//! [`SonioxRecognizer`] is the crate's own [`StreamingRecognizer`]: it owns
//! an audio source and a [`SonioxStt`] stream per session and reports
//! progress purely through the callback set. Construct it with the API key;
//! everything else arrives per session in [`RecognizerConfig`].

use bytes::Bytes;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    RecognizerCallbacks, RecognizerConfig, RecognizerState, StreamingRecognizer,
};
use crate::core::audio::{AudioSource, AudioSpec, CaptureGuard, MicrophoneSource};
use crate::core::stt::{
    AudioFormat, SONIOX_WEBSOCKET_URL, SonioxConfig, SonioxStt, SttError, SttEvent, SttResult,
};

/// Bounded wait for remaining results after the end-of-audio sentinel.
const FINISH_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback-driven engine backed by the Soniox streaming API.
pub struct SonioxRecognizer {
    api_key: String,
    endpoint: String,
    audio_source: Box<dyn AudioSource>,
    cancel: CancellationToken,
    stop_tx: Option<oneshot::Sender<()>>,
    driver: Option<tokio::task::JoinHandle<()>>,
}

impl SonioxRecognizer {
    /// Engine capturing from the default microphone.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_audio_source(api_key, Box::new(MicrophoneSource::new()))
    }

    /// Engine using a custom audio source.
    pub fn with_audio_source(api_key: impl Into<String>, audio_source: Box<dyn AudioSource>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: SONIOX_WEBSOCKET_URL.to_string(),
            audio_source,
            cancel: CancellationToken::new(),
            stop_tx: None,
            driver: None,
        }
    }

    /// Override the service endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn session_config(&self, config: &RecognizerConfig) -> SonioxConfig {
        SonioxConfig {
            api_key: self.api_key.clone(),
            model: config.model.clone(),
            audio_format: AudioFormat::PcmS16le,
            sample_rate: 16000,
            num_channels: 1,
            // Language identification replaces explicit hints here.
            language_hints: None,
            context: None,
            enable_speaker_diarization: config.enable_speaker_diarization,
            enable_language_identification: config.enable_language_identification,
            enable_endpoint_detection: config.enable_endpoint_detection,
            translation: config.translation.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl StreamingRecognizer for SonioxRecognizer {
    async fn start(
        &mut self,
        config: RecognizerConfig,
        callbacks: RecognizerCallbacks,
    ) -> SttResult<()> {
        if self.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            warn!("start() ignored: a recognizer session is already running");
            return Ok(());
        }
        self.driver = None;
        self.stop_tx = None;
        self.cancel = CancellationToken::new();

        let session_config = self.session_config(&config);
        session_config.validate()?;

        callbacks.notify_state(RecognizerState::RequestingMedia).await;

        let spec = AudioSpec {
            sample_rate: session_config.sample_rate,
            channels: session_config.num_channels,
            chunk_ms: 100,
        };
        let audio = match self.audio_source.open(&spec) {
            Ok(audio) => audio,
            Err(e) => {
                callbacks.notify_error(e.clone().into()).await;
                callbacks.notify_state(RecognizerState::Error).await;
                return Err(e);
            }
        };

        callbacks.notify_state(RecognizerState::OpeningWebSocket).await;

        let mut client = SonioxStt::new(session_config)?;
        let events = match client.connect().await {
            Ok(events) => events,
            Err(e) => {
                callbacks.notify_error(e.clone().into()).await;
                callbacks.notify_state(RecognizerState::Error).await;
                return Err(e);
            }
        };

        callbacks.notify_state(RecognizerState::Running).await;
        callbacks.notify_started().await;

        let (stop_tx, stop_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);

        let (chunks, capture) = audio.into_parts();
        let driver = EngineDriver {
            client,
            chunks,
            capture: Some(capture),
            events,
            callbacks,
            cancel: self.cancel.clone(),
            stop_rx,
        };
        self.driver = Some(tokio::spawn(driver.run()));

        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn cancel(&mut self) {
        self.cancel.cancel();
        self.stop_tx = None;
    }
}

impl Drop for SonioxRecognizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// =============================================================================
// Driver Task
// =============================================================================

struct EngineDriver {
    client: SonioxStt,
    chunks: mpsc::Receiver<Bytes>,
    capture: Option<CaptureGuard>,
    events: mpsc::Receiver<SttEvent>,
    callbacks: RecognizerCallbacks,
    cancel: CancellationToken,
    stop_rx: oneshot::Receiver<()>,
}

enum RunOutcome {
    Finish,
    Canceled,
    ServerFinished,
    Failed(SttError),
}

impl EngineDriver {
    async fn run(mut self) {
        let outcome = self.stream_until_stop().await;
        match outcome {
            RunOutcome::Finish => self.finish().await,
            RunOutcome::Canceled => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.callbacks.notify_state(RecognizerState::Canceled).await;
            }
            RunOutcome::ServerFinished => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.callbacks.notify_state(RecognizerState::Finished).await;
                self.callbacks.notify_finished().await;
            }
            RunOutcome::Failed(e) => {
                self.capture.take();
                let _ = self.client.disconnect().await;
                self.callbacks.notify_error(e.into()).await;
                self.callbacks.notify_state(RecognizerState::Error).await;
            }
        }
    }

    async fn stream_until_stop(&mut self) -> RunOutcome {
        let mut stop_closed = false;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return RunOutcome::Canceled,

                stop = &mut self.stop_rx, if !stop_closed => {
                    match stop {
                        Ok(()) => return RunOutcome::Finish,
                        Err(_) => stop_closed = true,
                    }
                }

                chunk = self.chunks.recv() => {
                    match chunk {
                        Some(data) => {
                            if let Err(send_err) = self.client.send_audio(data).await {
                                // Prefer the connection task's root cause
                                // over the send failure.
                                while let Ok(event) = self.events.try_recv() {
                                    match event {
                                        SttEvent::Batch(tokens) => {
                                            self.callbacks.notify_partial(tokens).await;
                                        }
                                        SttEvent::Error(e) => return RunOutcome::Failed(e),
                                        SttEvent::Finished { .. } => {
                                            return RunOutcome::ServerFinished;
                                        }
                                        SttEvent::Closed => break,
                                    }
                                }
                                return RunOutcome::Failed(send_err);
                            }
                        }
                        None => return RunOutcome::Finish,
                    }
                }

                event = self.events.recv() => {
                    match event {
                        Some(SttEvent::Batch(tokens)) => {
                            self.callbacks.notify_partial(tokens).await;
                        }
                        Some(SttEvent::Finished { .. }) => return RunOutcome::ServerFinished,
                        Some(SttEvent::Closed) => {
                            return RunOutcome::Failed(SttError::NetworkError(
                                "Server closed the connection unexpectedly".to_string(),
                            ));
                        }
                        Some(SttEvent::Error(e)) => return RunOutcome::Failed(e),
                        None => {
                            return RunOutcome::Failed(SttError::NetworkError(
                                "Event stream ended unexpectedly".to_string(),
                            ));
                        }
                    }
                }
            }
        }
    }

    async fn finish(mut self) {
        self.capture.take();
        self.callbacks
            .notify_state(RecognizerState::FinishingProcessing)
            .await;

        if let Err(e) = self.client.finalize().await {
            warn!("Finalize request failed: {}", e);
        }
        if let Err(e) = self.client.finish().await {
            let _ = self.client.disconnect().await;
            self.callbacks.notify_error(e.into()).await;
            self.callbacks.notify_state(RecognizerState::Error).await;
            return;
        }

        let mut failed: Option<SttError> = None;
        let drained = timeout(FINISH_DRAIN_TIMEOUT, async {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return false,
                    event = self.events.recv() => {
                        match event {
                            Some(SttEvent::Batch(tokens)) => {
                                self.callbacks.notify_partial(tokens).await;
                            }
                            Some(SttEvent::Finished { .. }) => return true,
                            Some(SttEvent::Closed) | None => return true,
                            Some(SttEvent::Error(e)) => {
                                failed = Some(e);
                                return false;
                            }
                        }
                    }
                }
            }
        })
        .await;

        let completed = matches!(drained, Ok(true));
        let timed_out = drained.is_err();

        let _ = self.client.disconnect().await;

        if let Some(e) = failed {
            self.callbacks.notify_error(e.into()).await;
            self.callbacks.notify_state(RecognizerState::Error).await;
        } else if completed || timed_out {
            if timed_out {
                info!("Service did not confirm completion in time; closing anyway");
            }
            self.callbacks.notify_state(RecognizerState::Finished).await;
            self.callbacks.notify_finished().await;
        } else {
            // Canceled during the drain.
            self.callbacks.notify_state(RecognizerState::Canceled).await;
        }
    }
}
