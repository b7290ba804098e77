//! Base traits and types for realtime conversational transports.
//!
//! A transport session carries microphone audio up to a remote model and
//! delivers the model's speech, transcriptions and tool calls back down. The
//! session engine only sees the provider-neutral types in this module; the
//! wire format lives with each provider.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Provider-specific error
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// The session was closed before the operation could run
    #[error("Session closed")]
    Cancelled,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Session Setup
// =============================================================================

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    /// Function name
    pub name: String,
    /// Function description shown to the model
    pub description: String,
    /// JSON schema for parameters
    pub parameters: serde_json::Value,
}

/// Everything a transport needs to open a session.
#[derive(Clone, Default)]
pub struct SessionSetup {
    /// Credential for the remote API, wiped on drop
    pub api_key: Zeroizing<String>,
    /// Model identifier
    pub model: String,
    /// Prebuilt voice name for synthesized speech
    pub voice: String,
    /// System instruction for the conversation
    pub system_instruction: String,
    /// Tools the model may call
    pub tools: Vec<FunctionDeclaration>,
    /// Sample rate of outbound PCM
    pub input_sample_rate: u32,
}

impl fmt::Debug for SessionSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSetup")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("tools", &self.tools.len())
            .field("input_sample_rate", &self.input_sample_rate)
            .finish()
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Socket is up, waiting for the provider to accept the setup
    Connecting,
    /// Setup accepted, ready for traffic
    Connected,
    /// Connection failed
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// A compact audio payload as it arrived on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudio {
    /// Mime type, e.g. `audio/pcm;rate=24000`
    pub mime_type: String,
    /// Base64-encoded PCM
    pub data: String,
}

/// A function invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Call ID to echo in the response
    pub id: String,
    /// Function name
    pub name: String,
    /// Untyped JSON arguments
    pub args: serde_json::Value,
}

/// One inbound message. The shapes are independent and may co-occur.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub audio: Vec<InboundAudio>,
    pub interrupted: bool,
    pub turn_complete: bool,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub tool_calls: Vec<FunctionCall>,
    pub cancelled_tool_calls: Vec<String>,
    /// Server announced it will close the session soon
    pub go_away: Option<String>,
}

impl ServerMessage {
    /// Whether the message carries anything the session acts on.
    pub fn is_empty(&self) -> bool {
        self.audio.is_empty()
            && !self.interrupted
            && !self.turn_complete
            && self.input_transcription.is_none()
            && self.output_transcription.is_none()
            && self.tool_calls.is_empty()
            && self.cancelled_tool_calls.is_empty()
            && self.go_away.is_none()
    }
}

/// Lifecycle and message events emitted by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The provider accepted the setup
    Open,
    /// An inbound message
    Message(ServerMessage),
    /// The connection closed, with the close reason when one was given
    Closed(Option<String>),
    /// The connection failed
    Error(RealtimeError),
}

/// Callback type for transport events.
pub type TransportEventCallback =
    Arc<dyn Fn(TransportEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

// =============================================================================
// Readiness Gate
// =============================================================================

/// Outbound operations wait here until the session is ready.
///
/// Once cancelled the gate never opens again and every waiter resolves to
/// [`RealtimeError::Cancelled`].
#[derive(Debug)]
pub struct ReadinessGate {
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ready,
            cancel: CancellationToken::new(),
        }
    }

    /// Release all current and future waiters.
    pub fn open(&self) {
        if !self.cancel.is_cancelled() {
            self.ready.send_replace(true);
        }
    }

    /// Fail all current and future waiters.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_open(&self) -> bool {
        *self.ready.borrow() && !self.cancel.is_cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait until the gate opens.
    pub async fn wait(&self) -> RealtimeResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RealtimeError::Cancelled);
        }
        let mut rx = self.ready.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RealtimeError::Cancelled),
            res = rx.wait_for(|ready| *ready) => res.map(|_| ()).map_err(|_| RealtimeError::Cancelled),
        }
    }
}

// =============================================================================
// Transport Traits
// =============================================================================

/// An open transport session.
///
/// Send operations wait for readiness. After [`close`](Self::close) they
/// return [`RealtimeError::Cancelled`] without touching the wire.
#[async_trait]
pub trait RealtimeSession: Send + Sync {
    /// Send one encoded PCM frame.
    async fn send_realtime_input(&self, pcm: Bytes) -> RealtimeResult<()>;

    /// Send a complete user text turn.
    async fn send_text(&self, text: &str) -> RealtimeResult<()>;

    /// Answer a tool call.
    async fn send_tool_response(
        &self,
        call_id: &str,
        name: &str,
        response: serde_json::Value,
    ) -> RealtimeResult<()>;

    /// Whether the session is ready for traffic.
    fn is_ready(&self) -> bool;

    /// Get the current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Close the session. Synchronous and idempotent.
    fn close(&self);
}

/// Opens transport sessions.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Connect and send the setup. Resolves once the socket is up; readiness
    /// is signalled later through [`TransportEvent::Open`].
    async fn connect(
        &self,
        setup: SessionSetup,
        events: TransportEventCallback,
    ) -> RealtimeResult<Arc<dyn RealtimeSession>>;
}

/// Boxed connector.
pub type BoxedConnector = Arc<dyn RealtimeConnector>;
