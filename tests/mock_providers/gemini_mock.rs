//! WebSocket mock of the Gemini Live `BidiGenerateContent` endpoint
//!
//! Answers the setup with `setupComplete` (as a binary frame, the way the real
//! service does), then reacts to each client message:
//! - `clientContent` -> a `toolCall` for `update_draft_booking`
//! - `toolResponse` -> a finished turn
//! - `realtimeInput` (first one only) -> a speech chunk plus its transcription

use std::net::SocketAddr;
use std::sync::Arc;

use base64::prelude::*;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Samples in the speech chunk sent back for microphone audio (20ms at 24kHz).
pub const MOCK_SPEECH_SAMPLES: usize = 480;

#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Complete setup and answer every message
    Normal,
    /// Close with a policy violation right after receiving the setup
    RejectSetup(String),
}

#[derive(Default)]
pub struct MockRecord {
    /// Request URI of each accepted connection
    pub uris: Vec<String>,
    /// Every JSON message received, in order
    pub received: Vec<Value>,
}

pub struct GeminiMockServer {
    pub addr: SocketAddr,
    pub record: Arc<Mutex<MockRecord>>,
    handle: JoinHandle<()>,
}

impl GeminiMockServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let record = Arc::new(Mutex::new(MockRecord::default()));

        let server_record = record.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let record = server_record.clone();
                let behavior = behavior.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, record, behavior).await {
                        eprintln!("Mock connection error: {}", e);
                    }
                });
            }
        });

        Self {
            addr,
            record,
            handle,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/ws/live", self.addr)
    }

    pub fn received(&self) -> Vec<Value> {
        self.record.lock().received.clone()
    }

    pub fn uris(&self) -> Vec<String> {
        self.record.lock().uris.clone()
    }

    /// Received messages of one kind (`setup`, `realtimeInput`, ...).
    pub fn received_of(&self, kind: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter_map(|m| m.get(kind).cloned())
            .collect()
    }
}

impl Drop for GeminiMockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn speech_chunk() -> String {
    let pcm: Vec<u8> = (0..MOCK_SPEECH_SAMPLES)
        .flat_map(|i| (((i % 48) as i16 - 24) * 256).to_le_bytes())
        .collect();
    BASE64_STANDARD.encode(pcm)
}

async fn handle_connection(
    stream: TcpStream,
    record: Arc<Mutex<MockRecord>>,
    behavior: MockBehavior,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let uri_record = record.clone();
    let ws_stream = accept_hdr_async(
        stream,
        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri_record.lock().uris.push(req.uri().to_string());
            Ok(resp)
        },
    )
    .await?;
    let (mut write, mut read) = ws_stream.split();

    let mut answered_audio = false;

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => String::from_utf8(data.to_vec())?,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                eprintln!("Mock WebSocket error: {}", e);
                break;
            }
        };
        let message: Value = serde_json::from_str(&text)?;
        record.lock().received.push(message.clone());

        if message.get("setup").is_some() {
            match &behavior {
                MockBehavior::Normal => {
                    let complete = json!({ "setupComplete": {} }).to_string();
                    write
                        .send(Message::Binary(complete.into_bytes().into()))
                        .await?;
                }
                MockBehavior::RejectSetup(reason) => {
                    write
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Policy,
                            reason: reason.clone().into(),
                        })))
                        .await?;
                    break;
                }
            }
        } else if message.get("clientContent").is_some() {
            let call = json!({
                "toolCall": {
                    "functionCalls": [{
                        "id": "call-1",
                        "name": "update_draft_booking",
                        "args": { "customerName": "Ada", "serviceType": "Haircut" }
                    }]
                }
            });
            write.send(Message::Text(call.to_string().into())).await?;
        } else if message.get("toolResponse").is_some() {
            let done = json!({ "serverContent": { "turnComplete": true } });
            write.send(Message::Text(done.to_string().into())).await?;
        } else if message.get("realtimeInput").is_some() && !answered_audio {
            answered_audio = true;
            let speech = json!({
                "serverContent": {
                    "modelTurn": {
                        "parts": [{
                            "inlineData": {
                                "mimeType": "audio/pcm;rate=24000",
                                "data": speech_chunk()
                            }
                        }]
                    },
                    "outputTranscription": { "text": "Hello there" }
                }
            });
            write.send(Message::Text(speech.to_string().into())).await?;
        }
    }

    Ok(())
}
