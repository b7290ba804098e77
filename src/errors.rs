//! Session-level error types
//!
//! Only acquisition and transport failures reach the caller of the session
//! controller. Decode errors are skipped in the playback path and tool
//! argument problems are answered on the wire, so neither appears here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::core::audio::AudioError;
use crate::core::realtime::RealtimeError;

/// Result type for session operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors surfaced by the session controller
#[derive(Error, Debug)]
pub enum AgentError {
    // ─────────────────────────────────────────────────────────────────────────────
    // Acquisition Errors
    // ─────────────────────────────────────────────────────────────────────────────

    /// Microphone or output device could not be acquired
    #[error("Audio device unavailable: {0}")]
    Acquisition(#[from] AudioError),

    /// No API key configured
    #[error("Missing API key: set GEMINI_API_KEY or gemini.api_key")]
    MissingCredential,

    // ─────────────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────────────

    /// Connection to the model failed or dropped
    #[error("Transport error: {0}")]
    Transport(#[from] RealtimeError),

    // ─────────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────────

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl AgentError {
    /// Whether this error happened before a session could be established.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            AgentError::Acquisition(_) | AgentError::MissingCredential
        )
    }
}
