//! Events and commands consumed by the session loop.

use std::fmt;

use tokio::sync::mpsc;

use crate::core::audio::SourceId;
use crate::core::realtime::TransportEvent;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionState {
    /// Whether audio resources may exist in this state.
    pub fn holds_resources(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
            SessionState::Error => write!(f, "Error"),
        }
    }
}

/// Something that happened on behalf of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Lifecycle or message event from the transport
    Transport(TransportEvent),
    /// A playback source finished on its own
    SourceEnded(SourceId),
    /// The settle delay after open has elapsed
    GreetingDue,
    /// The confirmation latency for a tool call has elapsed
    AckDue { call_id: String },
}

/// A session event tagged with the epoch of the session that produced it.
///
/// The controller bumps its epoch on every teardown, so anything produced
/// by an earlier session is recognisably stale.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub epoch: u64,
    pub event: SessionEvent,
}

pub type EventSender = mpsc::UnboundedSender<EventEnvelope>;
pub type EventReceiver = mpsc::UnboundedReceiver<EventEnvelope>;

/// User-triggered actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Disconnect,
    /// Send a typed user turn
    SendText(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_resources() {
        assert!(SessionState::Connecting.holds_resources());
        assert!(SessionState::Connected.holds_resources());
        assert!(!SessionState::Disconnected.holds_resources());
        assert!(!SessionState::Error.holds_resources());
        assert_eq!(SessionState::default(), SessionState::Disconnected);
        assert_eq!(SessionState::Error.to_string(), "Error");
    }
}
