//! Soniox real-time WebSocket client.
//!
//! This module contains the low-level [`SonioxStt`] duplex client. It owns
//! the WebSocket connection for one transcription stream and nothing else:
//! session lifecycle, microphone handling, and token merging live in the
//! layers above.
//!
//! # Architecture
//!
//! The implementation uses a multi-channel architecture so callers never
//! block on the socket:
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │   send_audio()  │────▶│  ws_sender (mpsc)│────▶│ Connection Task │
//! └─────────────────┘     └──────────────────┘     └────────┬────────┘
//!                                                           │
//!                         ┌──────────────────┐              │
//!                         │  event_tx (mpsc) │◀─────────────┘
//!                         └────────┬─────────┘
//!                                  │
//!                         ┌────────▼─────────┐
//!                         │      Owner       │
//!                         └──────────────────┘
//! ```
//!
//! # Protocol Notes
//!
//! 1. **First frame is the config**: authentication happens inside the JSON
//!    start request, not in HTTP headers
//! 2. **Binary audio**: audio is sent as raw binary frames (no base64)
//! 3. **Zero-length sentinel**: an empty binary frame signals end-of-audio;
//!    the service answers with a `finished` response once the tail is
//!    processed

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use super::config::SonioxConfig;
use super::messages::{FinalizeMessage, StartRequest, TranscribeResponse};
use crate::core::stt::base::{SttError, SttResult, Token};

// =============================================================================
// Constants
// =============================================================================

/// Maximum audio chunk size in bytes (sanity check).
///
/// The service expects small frequent frames (~100ms of audio each). This
/// limit prevents memory issues from buggy callers sending excessively large
/// chunks. At 48kHz mono 16-bit PCM, 1 second of audio is ~96KB, so 256KB
/// allows for ~2.5 seconds which is generous.
const MAX_AUDIO_CHUNK_SIZE: usize = 256 * 1024;

/// Per-message idle timeout for WebSocket message reception.
/// Resets after each successful message. Catches stuck/dead connections.
const WS_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for connection establishment, including the start request send.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded wait for the connection task to exit during disconnect.
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Events
// =============================================================================

/// Typed events delivered to the client owner, in arrival order.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// A token batch with markers already filtered out. Never empty.
    Batch(Vec<Token>),
    /// The service finished processing the end-of-audio sentinel.
    Finished {
        /// Milliseconds of audio finalized by the service
        final_audio_proc_ms: Option<u64>,
        /// Milliseconds of audio processed in total
        total_audio_proc_ms: Option<u64>,
    },
    /// The server closed the connection without reporting an error.
    Closed,
    /// Fatal stream error; no further events follow.
    Error(SttError),
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state for the WebSocket client.
#[derive(Debug, Clone, Default)]
pub(crate) enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    #[allow(dead_code)]
    Error(String),
}

// =============================================================================
// SonioxStt Client
// =============================================================================

/// Duplex WebSocket client for one Soniox transcription stream.
///
/// Create with [`SonioxStt::new`], open with [`SonioxStt::connect`] (which
/// returns the event receiver), push audio with [`SonioxStt::send_audio`],
/// and end the stream with [`SonioxStt::finalize`] + [`SonioxStt::finish`].
/// Dropping the client fires the shutdown signal so the connection task can
/// never outlive its owner.
pub struct SonioxStt {
    /// Session configuration, validated at construction
    config: SonioxConfig,

    /// Current connection state
    pub(crate) state: ConnectionState,

    /// WebSocket sender for audio data.
    /// Bounded (32 items) to provide backpressure.
    ws_sender: Option<mpsc::Sender<Bytes>>,

    /// Control message sender for finalize requests
    control_tx: Option<mpsc::Sender<String>>,

    /// Shutdown signal sender
    shutdown_tx: Option<oneshot::Sender<()>>,

    /// Connection task handle
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    /// Connection state flag (shared with connection task)
    is_connected: Arc<AtomicBool>,
}

impl SonioxStt {
    /// Create a new client. Fails fast on invalid configuration.
    pub fn new(config: SonioxConfig) -> SttResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: ConnectionState::Disconnected,
            ws_sender: None,
            control_tx: None,
            shutdown_tx: None,
            connection_handle: None,
            is_connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Handle one incoming WebSocket message.
    ///
    /// # Returns
    /// * `Ok(true)` - Continue processing messages
    /// * `Ok(false)` - Stream complete or server closed, stop the loop
    /// * `Err(SttError)` - Fatal error, stop the loop
    pub(crate) fn handle_server_message(
        message: Message,
        event_tx: &mpsc::Sender<SttEvent>,
    ) -> SttResult<bool> {
        match message {
            Message::Text(text) => {
                debug!("Received transcribe response: {}", text);

                let response = match TranscribeResponse::parse(&text) {
                    Ok(response) => response,
                    Err(e) => {
                        // Malformed payloads are skipped, not fatal.
                        warn!("Skipping malformed transcribe response: {}", e);
                        return Ok(true);
                    }
                };

                // An error code supersedes any tokens in the same message.
                if let Some(err) = response.error() {
                    error!("{}", err);
                    return Err(err);
                }

                let finished = response.finished;
                let final_audio_proc_ms = response.final_audio_proc_ms;
                let total_audio_proc_ms = response.total_audio_proc_ms;

                let tokens = response.speech_tokens();
                if !tokens.is_empty() && event_tx.try_send(SttEvent::Batch(tokens)).is_err() {
                    warn!("Failed to deliver token batch - event channel full or closed");
                }

                if finished {
                    info!(
                        "Transcription finished (final: {:?}ms, total: {:?}ms)",
                        final_audio_proc_ms, total_audio_proc_ms
                    );
                    let _ = event_tx.try_send(SttEvent::Finished {
                        final_audio_proc_ms,
                        total_audio_proc_ms,
                    });
                    return Ok(false);
                }

                Ok(true)
            }

            Message::Close(close_frame) => {
                info!("Server closed WebSocket: {:?}", close_frame);
                let _ = event_tx.try_send(SttEvent::Closed);
                Ok(false)
            }

            Message::Ping(_) | Message::Pong(_) => Ok(true),

            Message::Binary(_) => {
                debug!("Ignoring unexpected binary message from server");
                Ok(true)
            }

            _ => Ok(true),
        }
    }

    /// Open the WebSocket connection and send the start request.
    ///
    /// Returns the event receiver for this stream. The connection attempt is
    /// bounded by a 10 second timeout.
    pub async fn connect(&mut self) -> SttResult<mpsc::Receiver<SttEvent>> {
        if self.connection_handle.is_some() {
            return Err(SttError::ConfigurationError(
                "Client is already connected".to_string(),
            ));
        }

        let start_request = StartRequest::from_config(&self.config);
        let start_payload = serde_json::to_string(&start_request).map_err(|e| {
            SttError::ConfigurationError(format!("Failed to serialize start request: {e}"))
        })?;

        // Channels for communication with the connection task.
        let (ws_tx, mut ws_rx) = mpsc::channel::<Bytes>(32);
        let (control_tx, mut control_rx) = mpsc::channel::<String>(8);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        // Bounded to handle bursts while preventing memory exhaustion.
        let (event_tx, event_rx) = mpsc::channel::<SttEvent>(256);
        let (connected_tx, connected_rx) = oneshot::channel::<SttResult<()>>();

        self.ws_sender = Some(ws_tx);
        self.control_tx = Some(control_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let endpoint = self.config.endpoint.clone();
        let is_connected = self.is_connected.clone();

        let connection_handle = tokio::spawn(async move {
            let connect_result = timeout(CONNECT_TIMEOUT, connect_async(endpoint.as_str())).await;
            let ws_stream = match connect_result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    let _ = connected_tx.send(Err(SttError::ConnectionFailed(format!(
                        "Failed to connect to {endpoint}: {e}"
                    ))));
                    return;
                }
                Err(_elapsed) => {
                    let _ = connected_tx.send(Err(SttError::ConnectionFailed(format!(
                        "Timed out connecting to {endpoint}"
                    ))));
                    return;
                }
            };

            let (mut ws_sink, mut ws_stream) = ws_stream.split();

            // The start request must be the first frame on the wire.
            if let Err(e) = ws_sink.send(Message::Text(start_payload.into())).await {
                let _ = connected_tx.send(Err(SttError::ConnectionFailed(format!(
                    "Failed to send start request: {e}"
                ))));
                return;
            }

            info!("Connected to transcription service at {}", endpoint);
            is_connected.store(true, Ordering::Release);
            let _ = connected_tx.send(Ok(()));

            // Main event loop
            loop {
                tokio::select! {
                    // Outgoing audio. A zero-length chunk is the
                    // end-of-audio sentinel and is forwarded as-is.
                    Some(audio_data) = ws_rx.recv() => {
                        let data_len = audio_data.len();
                        if let Err(e) = ws_sink.send(Message::Binary(audio_data)).await {
                            let stt_error = SttError::NetworkError(format!(
                                "Failed to send audio: {e}"
                            ));
                            error!("{}", stt_error);
                            let _ = event_tx.try_send(SttEvent::Error(stt_error));
                            break;
                        }
                        if data_len == 0 {
                            debug!("Sent end-of-audio sentinel");
                        } else {
                            debug!("Sent {} bytes of audio", data_len);
                        }
                    }

                    // Control messages (finalize)
                    Some(control_msg) = control_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(control_msg.into())).await {
                            warn!("Failed to send control message: {}", e);
                        }
                    }

                    // Incoming messages with idle timeout
                    message = timeout(WS_MESSAGE_TIMEOUT, ws_stream.next()) => {
                        match message {
                            Ok(Some(Ok(msg))) => {
                                match Self::handle_server_message(msg, &event_tx) {
                                    Ok(true) => {}
                                    Ok(false) => {
                                        is_connected.store(false, Ordering::Release);
                                        break;
                                    }
                                    Err(e) => {
                                        let _ = event_tx.try_send(SttEvent::Error(e));
                                        is_connected.store(false, Ordering::Release);
                                        break;
                                    }
                                }
                            }
                            Ok(Some(Err(e))) => {
                                let stt_error = SttError::NetworkError(format!(
                                    "WebSocket error: {e}"
                                ));
                                error!("{}", stt_error);
                                let _ = event_tx.try_send(SttEvent::Error(stt_error));
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                            Ok(None) => {
                                info!("WebSocket stream ended");
                                let _ = event_tx.try_send(SttEvent::Closed);
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                            Err(_elapsed) => {
                                let stt_error = SttError::NetworkError(
                                    "WebSocket idle timeout - no message for 60 seconds".into()
                                );
                                error!("{}", stt_error);
                                let _ = event_tx.try_send(SttEvent::Error(stt_error));
                                is_connected.store(false, Ordering::Release);
                                break;
                            }
                        }
                    }

                    // Shutdown signal from the owner
                    _ = &mut shutdown_rx => {
                        info!("Received shutdown signal");
                        let _ = ws_sink.send(Message::Close(None)).await;
                        is_connected.store(false, Ordering::Release);
                        break;
                    }
                }
            }

            info!("WebSocket connection task finished");
        });

        self.connection_handle = Some(connection_handle);
        self.state = ConnectionState::Connecting;

        match timeout(CONNECT_TIMEOUT, connected_rx).await {
            Ok(Ok(Ok(()))) => {
                self.state = ConnectionState::Connected;
                Ok(event_rx)
            }
            Ok(Ok(Err(e))) => {
                self.state = ConnectionState::Error(e.to_string());
                self.abort_connection();
                Err(e)
            }
            Ok(Err(_closed)) => {
                let err =
                    SttError::ConnectionFailed("Connection task exited unexpectedly".to_string());
                self.state = ConnectionState::Error(err.to_string());
                self.abort_connection();
                Err(err)
            }
            Err(_elapsed) => {
                let err = SttError::ConnectionFailed(
                    "Timed out waiting for connection handshake".to_string(),
                );
                self.state = ConnectionState::Error(err.to_string());
                self.abort_connection();
                Err(err)
            }
        }
    }

    /// Whether the client can accept audio.
    pub fn is_ready(&self) -> bool {
        self.is_connected.load(Ordering::Acquire) && self.ws_sender.is_some()
    }

    /// Queue one audio chunk for transmission.
    ///
    /// Empty chunks are ignored; the end-of-audio sentinel is sent with
    /// [`SonioxStt::finish`].
    pub async fn send_audio(&self, audio_data: Bytes) -> SttResult<()> {
        if audio_data.is_empty() {
            return Ok(());
        }

        if !self.is_ready() {
            return Err(SttError::ConnectionFailed(
                "Not connected to transcription service".to_string(),
            ));
        }

        let data_len = audio_data.len();
        if data_len > MAX_AUDIO_CHUNK_SIZE {
            return Err(SttError::ConfigurationError(format!(
                "Audio chunk size {} bytes exceeds maximum {} bytes",
                data_len, MAX_AUDIO_CHUNK_SIZE
            )));
        }

        if let Some(ws_sender) = &self.ws_sender {
            ws_sender
                .send(audio_data)
                .await
                .map_err(|e| SttError::NetworkError(format!("Failed to queue audio: {e}")))?;
        }

        Ok(())
    }

    /// Ask the service to finalize pending tail audio.
    pub async fn finalize(&self) -> SttResult<()> {
        if !self.is_ready() {
            return Err(SttError::ConnectionFailed(
                "Not connected to transcription service".to_string(),
            ));
        }

        let control_tx = self.control_tx.as_ref().ok_or_else(|| {
            SttError::ConnectionFailed("Control channel not available".to_string())
        })?;

        let json = serde_json::to_string(&FinalizeMessage::default()).map_err(|e| {
            SttError::ConfigurationError(format!("Failed to serialize finalize message: {e}"))
        })?;

        control_tx
            .send(json)
            .await
            .map_err(|e| SttError::NetworkError(format!("Failed to send finalize: {e}")))?;

        debug!("Queued finalize request");
        Ok(())
    }

    /// Send the zero-length end-of-audio sentinel.
    ///
    /// After this call the service keeps delivering remaining results and
    /// then reports `finished`; no further audio may be sent.
    pub async fn finish(&self) -> SttResult<()> {
        if !self.is_ready() {
            return Err(SttError::ConnectionFailed(
                "Not connected to transcription service".to_string(),
            ));
        }

        if let Some(ws_sender) = &self.ws_sender {
            ws_sender
                .send(Bytes::new())
                .await
                .map_err(|e| SttError::NetworkError(format!("Failed to send sentinel: {e}")))?;
        }

        debug!("Queued end-of-audio sentinel");
        Ok(())
    }

    /// Tear the connection down. Idempotent; the connection task join is
    /// bounded.
    pub async fn disconnect(&mut self) -> SttResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.connection_handle.take() {
            let _ = timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await;
        }

        self.clear_channels();
        self.is_connected.store(false, Ordering::Release);
        self.state = ConnectionState::Disconnected;

        debug!("Disconnected from transcription service");
        Ok(())
    }

    /// Session configuration this client was built with.
    pub fn config(&self) -> &SonioxConfig {
        &self.config
    }

    fn clear_channels(&mut self) {
        self.ws_sender = None;
        self.control_tx = None;
    }

    /// Drop a connection attempt that never became ready.
    fn abort_connection(&mut self) {
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
        self.shutdown_tx = None;
        self.clear_channels();
        self.is_connected.store(false, Ordering::Release);
    }
}

impl Drop for SonioxStt {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SonioxConfig {
        SonioxConfig::new("test_key")
    }

    #[test]
    fn test_new_with_valid_config() {
        let stt = SonioxStt::new(test_config());
        assert!(stt.is_ok());

        let stt = stt.unwrap();
        assert!(!stt.is_ready());
        assert_eq!(stt.config().api_key, "test_key");
    }

    #[test]
    fn test_new_with_empty_api_key() {
        let stt = SonioxStt::new(SonioxConfig::default());
        assert!(stt.is_err());

        if let Err(SttError::ConfigurationError(msg)) = stt {
            assert!(msg.contains("API key is required"));
        } else {
            panic!("Expected ConfigurationError");
        }
    }

    #[tokio::test]
    async fn test_send_audio_when_not_connected() {
        let stt = SonioxStt::new(test_config()).unwrap();
        let result = stt.send_audio(Bytes::from(vec![0u8; 1024])).await;

        assert!(result.is_err());
        if let Err(SttError::ConnectionFailed(msg)) = result {
            assert!(msg.contains("Not connected"));
        } else {
            panic!("Expected ConnectionFailed error");
        }
    }

    #[tokio::test]
    async fn test_send_audio_ignores_empty_chunk() {
        // Empty chunks are reserved for the sentinel; sending one through
        // send_audio is a no-op even when disconnected.
        let stt = SonioxStt::new(test_config()).unwrap();
        assert!(stt.send_audio(Bytes::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_finalize_when_not_connected() {
        let stt = SonioxStt::new(test_config()).unwrap();
        assert!(stt.finalize().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut stt = SonioxStt::new(test_config()).unwrap();
        assert!(stt.disconnect().await.is_ok());
        assert!(stt.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_handle_token_batch() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(
            r#"{"tokens":[{"text":"Hello","is_final":true,"confidence":0.95},{"text":" there","is_final":false}]}"#.into(),
        );

        let result = SonioxStt::handle_server_message(msg, &tx);
        assert!(matches!(result, Ok(true)));

        match rx.try_recv().unwrap() {
            SttEvent::Batch(tokens) => {
                assert_eq!(tokens.len(), 2);
                assert_eq!(tokens[0].text, "Hello");
                assert!(tokens[0].is_final);
                assert!(!tokens[1].is_final);
            }
            other => panic!("Expected Batch event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_keepalive_emits_nothing() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(r#"{"tokens":[],"total_audio_proc_ms":1200}"#.into());
        let result = SonioxStt::handle_server_message(msg, &tx);

        assert!(matches!(result, Ok(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_marker_only_batch_emits_nothing() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(r#"{"tokens":[{"text":"<end>","is_final":true}]}"#.into());
        let result = SonioxStt::handle_server_message(msg, &tx);

        assert!(matches!(result, Ok(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_error_message() {
        let (tx, _rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(r#"{"error_code":401,"error_message":"Unauthorized"}"#.into());
        let result = SonioxStt::handle_server_message(msg, &tx);

        assert!(result.is_err());
        match result {
            Err(SttError::ServiceError { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("Expected ServiceError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_supersedes_tokens() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(
            r#"{"tokens":[{"text":"ignored","is_final":true}],"error_code":500,"error_message":"boom"}"#
                .into(),
        );
        let result = SonioxStt::handle_server_message(msg, &tx);

        assert!(result.is_err());
        assert!(rx.try_recv().is_err(), "no batch should be delivered");
    }

    #[tokio::test]
    async fn test_handle_finished_message() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text(
            r#"{"tokens":[],"finished":true,"final_audio_proc_ms":420,"total_audio_proc_ms":900}"#
                .into(),
        );
        let result = SonioxStt::handle_server_message(msg, &tx);

        // Finished stops the loop without an error.
        assert!(matches!(result, Ok(false)));
        match rx.try_recv().unwrap() {
            SttEvent::Finished {
                final_audio_proc_ms,
                total_audio_proc_ms,
            } => {
                assert_eq!(final_audio_proc_ms, Some(420));
                assert_eq!(total_audio_proc_ms, Some(900));
            }
            other => panic!("Expected Finished event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_close_frame() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let result = SonioxStt::handle_server_message(Message::Close(None), &tx);
        assert!(matches!(result, Ok(false)));
        assert!(matches!(rx.try_recv().unwrap(), SttEvent::Closed));
    }

    #[tokio::test]
    async fn test_handle_malformed_payload_is_skipped() {
        let (tx, mut rx) = mpsc::channel::<SttEvent>(256);

        let msg = Message::Text("this is not json".into());
        let result = SonioxStt::handle_server_message(msg, &tx);

        // Parse failures are non-fatal: the message is skipped.
        assert!(matches!(result, Ok(true)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_ping_pong() {
        let (tx, _rx) = mpsc::channel::<SttEvent>(256);

        assert!(matches!(
            SonioxStt::handle_server_message(Message::Ping(Bytes::new()), &tx),
            Ok(true)
        ));
        assert!(matches!(
            SonioxStt::handle_server_message(Message::Pong(Bytes::new()), &tx),
            Ok(true)
        ));
    }
}
