//! Scripted transport
//!
//! [`FakeConnector`] hands out [`FakeSession`]s that record every outbound
//! call. Tests drive the inbound side by emitting [`TransportEvent`]s through
//! the callback captured at connect time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use booking_agent::core::realtime::{
    ConnectionState, RealtimeConnector, RealtimeError, RealtimeResult, RealtimeSession,
    SessionSetup, TransportEvent, TransportEventCallback,
};

/// One outbound call recorded by a [`FakeSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Audio(Bytes),
    Text(String),
    ToolResponse {
        id: String,
        name: String,
        response: Value,
    },
}

#[derive(Default)]
pub struct FakeSession {
    pub sent: Mutex<Vec<Sent>>,
    pub closed: AtomicBool,
}

impl FakeSession {
    fn record(&self, sent: Sent) -> RealtimeResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RealtimeError::Cancelled);
        }
        self.sent.lock().push(sent);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn tool_responses(&self) -> Vec<(String, String, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ToolResponse { id, name, response } => Some((id, name, response)),
                _ => None,
            })
            .collect()
    }

    pub fn audio_frames(&self) -> Vec<Bytes> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Audio(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl RealtimeSession for FakeSession {
    async fn send_realtime_input(&self, pcm: Bytes) -> RealtimeResult<()> {
        self.record(Sent::Audio(pcm))
    }

    async fn send_text(&self, text: &str) -> RealtimeResult<()> {
        self.record(Sent::Text(text.to_string()))
    }

    async fn send_tool_response(
        &self,
        call_id: &str,
        name: &str,
        response: Value,
    ) -> RealtimeResult<()> {
        self.record(Sent::ToolResponse {
            id: call_id.to_string(),
            name: name.to_string(),
            response,
        })
    }

    fn is_ready(&self) -> bool {
        !self.is_closed()
    }

    fn connection_state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Connected
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub fail: Mutex<Option<RealtimeError>>,
    /// Keep the handshake pending forever after registering the callback.
    pub hang: AtomicBool,
    pub setups: Mutex<Vec<SessionSetup>>,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    callbacks: Mutex<Vec<TransportEventCallback>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: RealtimeError) -> Arc<Self> {
        let connector = Self::default();
        *connector.fail.lock() = Some(err);
        Arc::new(connector)
    }

    pub fn hanging() -> Arc<Self> {
        let connector = Self::default();
        connector.hang.store(true, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().last().cloned()
    }

    pub fn connects(&self) -> usize {
        self.setups.lock().len()
    }

    /// Deliver an event through the most recent session's callback.
    pub async fn emit(&self, event: TransportEvent) {
        let callback = self.callbacks.lock().last().cloned();
        if let Some(callback) = callback {
            callback(event).await;
        }
    }

    /// Deliver an event through the callback of the `index`-th session.
    pub async fn emit_to(&self, index: usize, event: TransportEvent) {
        let callback = self.callbacks.lock().get(index).cloned();
        if let Some(callback) = callback {
            callback(event).await;
        }
    }
}

#[async_trait]
impl RealtimeConnector for FakeConnector {
    async fn connect(
        &self,
        setup: SessionSetup,
        events: TransportEventCallback,
    ) -> RealtimeResult<Arc<dyn RealtimeSession>> {
        self.setups.lock().push(setup);
        if self.hang.load(Ordering::SeqCst) {
            self.callbacks.lock().push(events);
            return std::future::pending().await;
        }
        if let Some(err) = self.fail.lock().clone() {
            return Err(err);
        }
        let session = Arc::new(FakeSession::default());
        self.sessions.lock().push(session.clone());
        self.callbacks.lock().push(events);
        Ok(session)
    }
}
