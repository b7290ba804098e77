//! Gemini Live API client implementation.
//!
//! # API Reference
//!
//! - Endpoint: `wss://generativelanguage.googleapis.com/ws/...BidiGenerateContent?key=<key>`
//! - Protocol: WebSocket with JSON messages (text or binary frames)
//! - Audio in: PCM 16-bit, 16kHz, mono, little-endian, base64 encoded
//! - Audio out: PCM 16-bit, 24kHz, mono, little-endian, base64 encoded
//!
//! The session is not usable until the server answers the setup message with
//! `setupComplete`. Outbound sends wait on a readiness gate until then.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::config::{GEMINI_LIVE_URL, GeminiVoice, model_resource, pcm_mime_type};
use super::messages::{
    AudioTranscriptionConfig, ClientMessage, Content, GenerationConfig, LiveServerMessage, Part,
    PrebuiltVoiceConfig, Setup, SpeechConfig, Tool, VoiceConfig,
};
use crate::core::realtime::base::{
    ConnectionState, RealtimeConnector, RealtimeError, RealtimeResult, RealtimeSession,
    ReadinessGate, SessionSetup, TransportEvent, TransportEventCallback,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Connector
// =============================================================================

/// Opens Gemini Live sessions against a configurable endpoint.
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    endpoint: String,
}

impl Default for GeminiLiveConnector {
    fn default() -> Self {
        Self::new(GEMINI_LIVE_URL)
    }
}

impl GeminiLiveConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the WebSocket URL with the key parameter.
    fn build_ws_url(&self, api_key: &str) -> RealtimeResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| RealtimeError::InvalidConfiguration(format!("endpoint: {}", e)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RealtimeError::InvalidConfiguration(format!(
                    "endpoint scheme must be ws or wss, got {}",
                    other
                )));
            }
        }
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }
}

/// Build the setup message for a session.
pub fn build_setup(setup: &SessionSetup) -> Setup {
    let voice = GeminiVoice::parse(&setup.voice).unwrap_or_else(|| {
        tracing::warn!(
            "Unknown voice '{}', using {}",
            setup.voice,
            GeminiVoice::default()
        );
        GeminiVoice::default()
    });

    Setup {
        model: model_resource(&setup.model),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice.as_str().to_string(),
                    },
                },
            }),
        },
        system_instruction: (!setup.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(setup.system_instruction.clone())],
        }),
        tools: if setup.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: setup.tools.clone(),
            }]
        },
        input_audio_transcription: Some(AudioTranscriptionConfig::default()),
        output_audio_transcription: Some(AudioTranscriptionConfig::default()),
    }
}

fn map_connect_error(err: tungstenite::Error) -> RealtimeError {
    match err {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            RealtimeError::AuthenticationFailed(format!("HTTP {}", response.status()))
        }
        other => RealtimeError::ConnectionFailed(other.to_string()),
    }
}

#[async_trait]
impl RealtimeConnector for GeminiLiveConnector {
    async fn connect(
        &self,
        setup: SessionSetup,
        events: TransportEventCallback,
    ) -> RealtimeResult<Arc<dyn RealtimeSession>> {
        if setup.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let url = self.build_ws_url(&setup.api_key)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        request.headers_mut().insert(
            http::header::USER_AGENT,
            http::HeaderValue::from_static(concat!("booking-agent/", env!("CARGO_PKG_VERSION"))),
        );

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;

        tracing::info!("Connected to Gemini Live API (model {})", setup.model);

        let client = GeminiLiveClient::start(
            ws_stream,
            ClientMessage::Setup(build_setup(&setup)),
            setup.input_sample_rate,
            events,
        );
        Ok(client)
    }
}

// =============================================================================
// Gemini Live Client
// =============================================================================

/// One open Gemini Live session.
///
/// A spawned task owns the socket. Outbound messages reach it through a
/// bounded channel, inbound messages are parsed there and forwarded to the
/// event callback in arrival order.
pub struct GeminiLiveClient {
    /// Sender for outbound messages, dropped on close
    ws_sender: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    /// Opened by `setupComplete`, cancelled by close
    gate: Arc<ReadinessGate>,
    /// Socket up flag shared with the connection task
    connected: Arc<AtomicBool>,
    /// Set by a local close so the task does not report it as remote
    closed: Arc<AtomicBool>,
    /// Connection task handle
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    input_mime_type: String,
}

impl GeminiLiveClient {
    fn start<S>(
        ws_stream: tokio_tungstenite::WebSocketStream<S>,
        setup: ClientMessage,
        input_sample_rate: u32,
        events: TransportEventCallback,
    ) -> Arc<Self>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(WS_CHANNEL_CAPACITY);

        let gate = Arc::new(ReadinessGate::new());
        let connected = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));

        let task_gate = gate.clone();
        let task_connected = connected.clone();
        let task_closed = closed.clone();

        let handle = tokio::spawn(async move {
            let mut outcome = match serde_json::to_string(&setup) {
                Ok(json) => match ws_sink.send(Message::Text(json.into())).await {
                    Ok(()) => None,
                    Err(e) => Some(TransportEvent::Error(RealtimeError::WebSocketError(
                        e.to_string(),
                    ))),
                },
                Err(e) => Some(TransportEvent::Error(RealtimeError::SerializationError(
                    e.to_string(),
                ))),
            };

            while outcome.is_none() {
                tokio::select! {
                    // Handle outgoing messages
                    Some(message) = rx.recv() => {
                        let kind = message.kind();
                        let json = match serde_json::to_string(&message) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize {}: {}", kind, e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send WebSocket message: {}", e);
                            outcome = Some(TransportEvent::Error(RealtimeError::WebSocketError(
                                e.to_string(),
                            )));
                        }
                    }

                    // Handle incoming messages
                    Some(msg) = ws_stream.next() => {
                        let payload = match msg {
                            Ok(Message::Text(text)) => Some(text.as_bytes().to_vec()),
                            Ok(Message::Binary(data)) => Some(data.to_vec()),
                            Ok(Message::Close(frame)) => {
                                let reason = frame
                                    .map(|f| f.reason.as_str().to_string())
                                    .filter(|r| !r.is_empty());
                                tracing::info!("WebSocket closed by server: {:?}", reason);
                                outcome = Some(TransportEvent::Closed(reason));
                                None
                            }
                            Ok(Message::Ping(data)) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                                None
                            }
                            Err(e) => {
                                tracing::error!("WebSocket error: {}", e);
                                outcome = Some(TransportEvent::Error(
                                    RealtimeError::WebSocketError(e.to_string()),
                                ));
                                None
                            }
                            _ => None,
                        };

                        let Some(payload) = payload else { continue };
                        match serde_json::from_slice::<LiveServerMessage>(&payload) {
                            Ok(message) => {
                                if message.is_setup_complete() {
                                    tracing::info!("Gemini Live setup complete");
                                    task_gate.open();
                                    events(TransportEvent::Open).await;
                                }
                                let message = message.into_server_message();
                                if !message.is_empty() {
                                    events(TransportEvent::Message(message)).await;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Failed to parse server message: {}", e);
                            }
                        }
                    }

                    else => {
                        outcome = Some(TransportEvent::Closed(None));
                    }
                }
            }

            task_connected.store(false, Ordering::SeqCst);
            task_gate.cancel();

            if !task_closed.load(Ordering::SeqCst)
                && let Some(event) = outcome
            {
                events(event).await;
            }
            tracing::info!("Gemini Live connection task ended");
        });

        Arc::new(Self {
            ws_sender: Mutex::new(Some(tx)),
            gate,
            connected,
            closed,
            connection_handle: Mutex::new(Some(handle)),
            input_mime_type: pcm_mime_type(input_sample_rate),
        })
    }

    /// Wait for readiness, then queue a message for the socket.
    async fn send_message(&self, message: ClientMessage) -> RealtimeResult<()> {
        self.gate.wait().await?;

        let sender = self.ws_sender.lock().clone();
        let Some(sender) = sender else {
            return Err(if self.closed.load(Ordering::SeqCst) {
                RealtimeError::Cancelled
            } else {
                RealtimeError::NotConnected
            });
        };

        sender
            .send(message)
            .await
            .map_err(|e| RealtimeError::WebSocketError(e.to_string()))
    }
}

#[async_trait]
impl RealtimeSession for GeminiLiveClient {
    async fn send_realtime_input(&self, pcm: Bytes) -> RealtimeResult<()> {
        self.send_message(ClientMessage::audio(&pcm, &self.input_mime_type))
            .await
    }

    async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        self.send_message(ClientMessage::user_text(text)).await
    }

    async fn send_tool_response(
        &self,
        call_id: &str,
        name: &str,
        response: serde_json::Value,
    ) -> RealtimeResult<()> {
        tracing::debug!("Tool response for {} ({})", name, call_id);
        self.send_message(ClientMessage::tool_response(call_id, name, response))
            .await
    }

    fn is_ready(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.gate.is_open()
    }

    fn connection_state(&self) -> ConnectionState {
        if !self.connected.load(Ordering::SeqCst) {
            ConnectionState::Disconnected
        } else if self.gate.is_open() {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.gate.cancel();
        self.ws_sender.lock().take();
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from Gemini Live API");
    }
}

impl Drop for GeminiLiveClient {
    fn drop(&mut self) {
        self.close();
    }
}
