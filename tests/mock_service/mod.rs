//! In-process mock of the Soniox WebSocket service.
//!
//! Accepts real WebSocket connections, records the start request of each
//! session, and replays a scripted set of responses so sessions can be
//! driven end-to-end without the network.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the mock service does after the start request.
#[derive(Clone)]
pub enum Script {
    /// Reply to each binary audio frame with the next scripted response.
    /// After the zero-length sentinel, flush the remaining responses, send
    /// the finished notice, and close.
    PerChunk(Vec<Value>),
    /// Send an error payload immediately, then a follow-up frame that a
    /// correct client must ignore.
    ErrorAfterStart(Value, Value),
}

#[derive(Default)]
pub struct MockStats {
    pub connections: AtomicUsize,
    pub start_requests: Mutex<Vec<Value>>,
}

impl MockStats {
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn first_start_request(&self) -> Option<Value> {
        self.start_requests.lock().unwrap().first().cloned()
    }
}

/// Start the mock service on an ephemeral port. Returns the endpoint URL
/// and the shared stats.
pub async fn spawn(script: Script) -> (String, Arc<MockStats>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stats = Arc::new(MockStats::default());

    let server_stats = stats.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let script = script.clone();
            let stats = server_stats.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, script, stats).await;
            });
        }
    });

    (format!("ws://{addr}/transcribe-websocket"), stats)
}

async fn handle_connection(
    stream: TcpStream,
    script: Script,
    stats: Arc<MockStats>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    stats.connections.fetch_add(1, Ordering::SeqCst);
    let (mut write, mut read) = ws_stream.split();

    // The first frame must be the JSON start request.
    let first = read.next().await.ok_or("connection closed before start request")??;
    let start_request: Value = match first {
        Message::Text(text) => serde_json::from_str(&text)?,
        other => return Err(format!("expected text start request, got {other:?}").into()),
    };
    stats.start_requests.lock().unwrap().push(start_request);

    match script {
        Script::PerChunk(responses) => {
            let mut responses = responses.into_iter();
            while let Some(msg) = read.next().await {
                match msg? {
                    Message::Binary(data) if data.is_empty() => {
                        // End-of-audio sentinel: flush what is left, then
                        // confirm completion.
                        for response in responses.by_ref() {
                            write
                                .send(Message::Text(response.to_string().into()))
                                .await?;
                        }
                        let finished = json!({
                            "tokens": [],
                            "finished": true,
                            "final_audio_proc_ms": 1000,
                            "total_audio_proc_ms": 1000,
                        });
                        write
                            .send(Message::Text(finished.to_string().into()))
                            .await?;
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    Message::Binary(_) => {
                        if let Some(response) = responses.next() {
                            write
                                .send(Message::Text(response.to_string().into()))
                                .await?;
                        }
                    }
                    // Control messages (finalize) need no reply.
                    Message::Text(_) => {}
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        Script::ErrorAfterStart(error, followup) => {
            write.send(Message::Text(error.to_string().into())).await?;
            write
                .send(Message::Text(followup.to_string().into()))
                .await?;
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = write.send(Message::Close(None)).await;
        }
    }

    Ok(())
}
