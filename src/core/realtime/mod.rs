//! Realtime conversational transport module.
//!
//! # Architecture
//!
//! - `RealtimeConnector` opens sessions, `RealtimeSession` is one open session
//! - Inbound traffic arrives through a single `TransportEventCallback`
//! - Outbound sends wait on a `ReadinessGate` until the provider accepts setup
//!
//! # Supported Providers
//!
//! - **Gemini Live** - native-audio models over `BidiGenerateContent`

mod base;
pub mod gemini;

pub use base::{
    BoxedConnector, ConnectionState, FunctionCall, FunctionDeclaration, InboundAudio,
    ReadinessGate, RealtimeConnector, RealtimeError, RealtimeResult, RealtimeSession,
    ServerMessage, SessionSetup, TransportEvent, TransportEventCallback,
};
pub use gemini::{
    GEMINI_LIVE_DEFAULT_MODEL, GEMINI_LIVE_INPUT_SAMPLE_RATE, GEMINI_LIVE_OUTPUT_SAMPLE_RATE,
    GEMINI_LIVE_URL, GeminiLiveClient, GeminiLiveConnector, GeminiVoice,
};
