//! Session controller.
//!
//! Owns the transport session, the capture graph, the playback scheduler and
//! the booking state for one live conversation at a time. All mutation runs
//! on a single consumer: transport callbacks, playback completions and timers
//! only post [`EventEnvelope`]s into the controller's channel.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --Open--> Connected --Closed--> Disconnected
//!                               |                    |
//!                               +------Error---------+--> Error
//! ```
//!
//! Every teardown bumps the session epoch. Events tagged with an older epoch
//! are dropped, and every timer or outbound send spawned for a session races
//! its cancellation token, so nothing issued before a disconnect acts after it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use super::events::{Command, EventEnvelope, EventReceiver, EventSender, SessionEvent, SessionState};
use super::log::{LogEntry, LogRing, LogRole};
use super::snapshot::SessionSnapshot;
use crate::config::AgentConfig;
use crate::core::audio::{
    BoxedMicrophoneProvider, BoxedOutputProvider, CaptureGraph, FrameSender,
    MicrophoneConstraints, MicrophoneTrack, PlaybackScheduler, SourceEndedCallback, SourceId,
    codec,
};
use crate::core::booking::{
    BOOK_APPOINTMENT, BookOutcome, BookingState, UPDATE_DRAFT_BOOKING, UpdateOutcome,
    tool_declarations,
};
use crate::core::realtime::{
    BoxedConnector, FunctionCall, InboundAudio, RealtimeError, RealtimeResult, RealtimeSession,
    ServerMessage, SessionSetup, TransportEvent, TransportEventCallback,
};
use crate::errors::{AgentError, AgentResult};

/// A tool acknowledgement held back until its confirmation latency elapses.
struct PendingAck {
    name: String,
    response: Value,
    timer: JoinHandle<()>,
}

/// Drives one booking conversation at a time.
pub struct SessionController {
    config: AgentConfig,
    connector: BoxedConnector,
    microphones: BoxedMicrophoneProvider,
    outputs: BoxedOutputProvider,

    state: SessionState,
    epoch: u64,
    events_tx: EventSender,
    events_rx: EventReceiver,

    /// Cleared last during teardown; checked by capture and outbound sends
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,

    session: Option<Arc<dyn RealtimeSession>>,
    microphone: Option<Arc<dyn MicrophoneTrack>>,
    capture: CaptureGraph,
    playback: Option<PlaybackScheduler>,
    greeting: Option<JoinHandle<()>>,
    pending_acks: HashMap<String, PendingAck>,

    booking: BookingState,
    logs: LogRing,
    user_transcript: String,
    model_transcript: String,
    last_error: Option<String>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        config: AgentConfig,
        connector: BoxedConnector,
        microphones: BoxedMicrophoneProvider,
        outputs: BoxedOutputProvider,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let capture = CaptureGraph::new(config.audio.capture_frame_size);
        let logs = LogRing::new(config.session.log_capacity);

        Self {
            config,
            connector,
            microphones,
            outputs,
            state: SessionState::Disconnected,
            epoch: 0,
            events_tx,
            events_rx,
            connected: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            session: None,
            microphone: None,
            capture,
            playback: None,
            greeting: None,
            pending_acks: HashMap::new(),
            booking: BookingState::new(),
            logs,
            user_transcript: String::new(),
            model_transcript: String::new(),
            last_error: None,
            snapshot,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn booking(&self) -> &BookingState {
        &self.booking
    }

    pub fn logs(&self) -> &LogRing {
        &self.logs
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mic_active(&self) -> bool {
        self.capture.is_active() && self.capture.has_live_track()
    }

    /// Scheduler of the current session, if one is open.
    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        self.playback.as_ref()
    }

    /// Number of tool acknowledgements still waiting on their delay.
    pub fn pending_acks(&self) -> usize {
        self.pending_acks.len()
    }

    /// Watch the visible state.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Sender for posting events into the session loop.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    // =========================================================================
    // Connect / Disconnect
    // =========================================================================

    /// Open a fresh session, tearing down any previous one first.
    ///
    /// Resolves once the transport socket is up. The session becomes
    /// `Connected` when the transport reports `Open`.
    pub async fn connect(&mut self) -> AgentResult<()> {
        self.teardown();
        self.booking.reset();
        self.user_transcript.clear();
        self.model_transcript.clear();
        self.last_error = None;

        let api_key = self
            .config
            .gemini
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(|key| Zeroizing::new(key.to_string()));
        let Some(api_key) = api_key else {
            return Err(self.fail(AgentError::MissingCredential));
        };

        self.connected = Arc::new(AtomicBool::new(false));
        self.cancel = CancellationToken::new();
        self.set_state(SessionState::Connecting);
        self.push_log(LogRole::System, "Connecting");
        let epoch = self.epoch;

        let constraints = MicrophoneConstraints {
            sample_rate: self.config.audio.capture_sample_rate,
            ..Default::default()
        };
        match self.microphones.acquire(&constraints).await {
            Ok(track) => self.microphone = Some(track),
            Err(e) => return Err(self.fail(e.into())),
        }

        let on_ended = self.source_ended_callback(epoch);
        match self
            .outputs
            .open(self.config.audio.playback_sample_rate, on_ended)
            .await
        {
            Ok(device) => self.playback = Some(PlaybackScheduler::new(device)),
            Err(e) => return Err(self.fail(e.into())),
        }

        let setup = SessionSetup {
            api_key,
            model: self.config.gemini.model.clone(),
            voice: self.config.gemini.voice.clone(),
            system_instruction: self.config.session.system_instruction.clone(),
            tools: tool_declarations(),
            input_sample_rate: self.config.audio.capture_sample_rate,
        };
        let events = self.transport_callback(epoch);
        match self.connector.connect(setup, events).await {
            Ok(session) => {
                info!("Transport connected, waiting for setup to complete");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Tear everything down and return to `Disconnected`. Safe from any state.
    pub fn disconnect(&mut self) {
        let was = self.state;
        self.teardown();
        self.user_transcript.clear();
        self.model_transcript.clear();
        self.set_state(SessionState::Disconnected);
        if was != SessionState::Disconnected {
            info!("Session disconnected");
            self.push_log(LogRole::System, "Disconnected");
        }
    }

    /// Release every session resource in dependency order.
    fn teardown(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.cancel.cancel();

        if let Some(greeting) = self.greeting.take() {
            greeting.abort();
        }
        for (_, ack) in self.pending_acks.drain() {
            ack.timer.abort();
        }

        // Marks capture inactive, detaches the callback, then stops the track
        self.capture.stop();
        if let Some(track) = self.microphone.take() {
            track.detach();
            track.stop();
        }

        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
        if let Some(session) = self.session.take() {
            session.close();
        }

        self.connected.store(false, Ordering::SeqCst);
    }

    /// Record an error, tear down and move to `Error`.
    fn fail(&mut self, err: AgentError) -> AgentError {
        error!("Session failed: {}", err);
        self.teardown();
        self.last_error = Some(err.to_string());
        self.set_state(SessionState::Error);
        self.push_log(LogRole::System, format!("Error: {err}"));
        err
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Run the single-consumer loop until the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        enum Next {
            Command(Command),
            Event(EventEnvelope),
        }

        loop {
            let next = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Next::Command(cmd),
                    None => break,
                },
                Some(envelope) = self.events_rx.recv() => Next::Event(envelope),
            };

            match next {
                Next::Command(Command::Connect) => {
                    if !self.connect_interruptible(&mut commands).await {
                        break;
                    }
                }
                Next::Command(cmd) => self.handle_command(cmd).await,
                Next::Event(envelope) => self.handle_event(envelope),
            }
        }

        self.disconnect();
        info!("Session loop stopped");
    }

    /// Connect while still listening for commands.
    ///
    /// A `Disconnect` received while the microphone or the transport is
    /// still pending abandons the attempt and tears down whatever was
    /// acquired so far. A second `Connect` starts over. Returns `false` once
    /// the command channel is closed.
    async fn connect_interruptible(&mut self, commands: &mut mpsc::Receiver<Command>) -> bool {
        loop {
            let interrupted = {
                let connect = self.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => {
                            if let Err(e) = result {
                                warn!("Connect failed: {}", e);
                            }
                            break None;
                        }
                        cmd = commands.recv() => match cmd {
                            Some(Command::SendText(_)) => {
                                warn!("Cannot send text while connecting");
                            }
                            other => break Some(other),
                        },
                    }
                }
            };

            match interrupted {
                None => return true,
                Some(Some(Command::Connect)) => {
                    info!("Connect requested again, restarting");
                }
                Some(Some(_)) => {
                    info!("Connect abandoned");
                    self.disconnect();
                    return true;
                }
                Some(None) => return false,
            }
        }
    }

    pub async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if let Err(e) = self.connect().await {
                    warn!("Connect failed: {}", e);
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::SendText(text) => self.send_text(text),
        }
    }

    /// Wait for the next posted event.
    pub async fn next_event(&mut self) -> Option<EventEnvelope> {
        self.events_rx.recv().await
    }

    /// Wait for the next event and handle it.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(envelope) => {
                self.handle_event(envelope);
                true
            }
            None => false,
        }
    }

    /// Apply one event. Events from a torn-down session are ignored.
    pub fn handle_event(&mut self, envelope: EventEnvelope) {
        if envelope.epoch != self.epoch || !self.state.holds_resources() {
            debug!(
                "Ignoring stale event from epoch {} (current {})",
                envelope.epoch, self.epoch
            );
            return;
        }

        match envelope.event {
            SessionEvent::Transport(TransportEvent::Open) => self.on_open(),
            SessionEvent::Transport(TransportEvent::Message(message)) => self.on_message(message),
            SessionEvent::Transport(TransportEvent::Closed(reason)) => self.on_closed(reason),
            SessionEvent::Transport(TransportEvent::Error(e)) => {
                self.fail(AgentError::Transport(e));
            }
            SessionEvent::SourceEnded(id) => {
                if let Some(playback) = self.playback.as_mut() {
                    playback.complete(id);
                }
            }
            SessionEvent::GreetingDue => self.on_greeting_due(),
            SessionEvent::AckDue { call_id } => self.on_ack_due(&call_id),
        }
    }

    // =========================================================================
    // Transport Events
    // =========================================================================

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };

        self.connected.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Connected);
        info!("Session open");

        if let Some(track) = self.microphone.take() {
            let sender = frame_sender(session);
            self.capture.start(track, self.connected.clone(), sender);
        }
        if let Some(playback) = self.playback.as_ref() {
            if let Err(e) = playback.resume() {
                warn!("Failed to resume output device: {}", e);
            }
        }

        self.push_log(LogRole::System, "Connected");
        self.schedule_greeting();
    }

    fn on_closed(&mut self, reason: Option<String>) {
        info!("Transport closed: {}", reason.as_deref().unwrap_or("no reason"));
        self.teardown();
        self.set_state(SessionState::Disconnected);
        let text = match reason {
            Some(reason) if !reason.is_empty() => format!("Connection closed: {reason}"),
            _ => "Connection closed".to_string(),
        };
        self.push_log(LogRole::System, text);
    }

    fn on_message(&mut self, message: ServerMessage) {
        if self.state != SessionState::Connected {
            debug!("Dropping message received before open");
            return;
        }

        for id in &message.cancelled_tool_calls {
            self.cancel_ack(id);
        }
        for call in message.tool_calls {
            self.handle_tool_call(call);
        }

        // Audio in the same message belongs to the turn after the barge-in
        if message.interrupted {
            self.on_interrupted();
        }
        for audio in &message.audio {
            self.play_audio(audio);
        }

        if let Some(text) = message.input_transcription {
            self.user_transcript.push_str(&text);
        }
        if let Some(text) = message.output_transcription {
            self.flush_transcript(LogRole::User);
            self.model_transcript.push_str(&text);
        }
        if message.turn_complete {
            self.flush_transcript(LogRole::User);
            self.flush_transcript(LogRole::Model);
        }

        if let Some(time_left) = message.go_away {
            warn!("Server will close the session in {}", time_left);
            self.push_log(
                LogRole::System,
                format!("Server closing session in {time_left}"),
            );
        }
    }

    fn on_interrupted(&mut self) {
        let stopped = self
            .playback
            .as_mut()
            .map(|playback| playback.interrupt())
            .unwrap_or(0);
        debug!("Barge-in, stopped {} sources", stopped);
        self.flush_transcript(LogRole::Model);
    }

    fn play_audio(&mut self, audio: &InboundAudio) {
        let Some(playback) = self.playback.as_mut() else {
            return;
        };
        let rate = codec::pcm_rate_from_mime(&audio.mime_type)
            .unwrap_or(self.config.audio.playback_sample_rate);

        let buffer = match codec::decode_base64(&audio.data, rate, 1) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Skipping undecodable audio chunk: {}", e);
                return;
            }
        };
        if let Err(e) = playback.schedule(buffer) {
            warn!("Failed to schedule audio chunk: {}", e);
        }
    }

    fn flush_transcript(&mut self, role: LogRole) {
        let buffer = match role {
            LogRole::User => &mut self.user_transcript,
            LogRole::Model => &mut self.model_transcript,
            LogRole::System => return,
        };
        let text = std::mem::take(buffer);
        let text = text.trim();
        if !text.is_empty() {
            self.push_log(role, text);
        }
    }

    // =========================================================================
    // Tool Calls
    // =========================================================================

    fn handle_tool_call(&mut self, call: FunctionCall) {
        let FunctionCall { id, name, args } = call;
        debug!("Tool call {} ({})", name, id);

        let (response, delayed) = match name.as_str() {
            UPDATE_DRAFT_BOOKING => {
                let outcome = self.booking.apply_update(&args);
                match &outcome {
                    UpdateOutcome::Merged(fields) if !fields.is_empty() => {
                        let keys: Vec<_> = fields.iter().map(|f| f.key()).collect();
                        self.push_log(
                            LogRole::System,
                            format!("Draft updated: {}", keys.join(", ")),
                        );
                    }
                    UpdateOutcome::Merged(_) => {}
                    UpdateOutcome::Finalized => {
                        debug!("Ignoring draft update after confirmation");
                    }
                }
                (outcome.response(), false)
            }
            BOOK_APPOINTMENT => {
                let outcome = self.booking.book(&args);
                match &outcome {
                    BookOutcome::Confirmed(booking) => {
                        info!("Booking confirmed: {}", booking.confirmation_id);
                        self.push_log(
                            LogRole::System,
                            format!(
                                "Booking confirmed: {} on {} at {}",
                                booking.service_type, booking.date, booking.time
                            ),
                        );
                    }
                    BookOutcome::Rejected { missing } => {
                        let keys: Vec<_> = missing.iter().map(|f| f.key()).collect();
                        warn!("Rejected incomplete booking, missing {}", keys.join(", "));
                        self.push_log(
                            LogRole::System,
                            format!("Booking incomplete, missing {}", keys.join(", ")),
                        );
                    }
                    BookOutcome::AlreadyConfirmed(_) => {
                        debug!("Booking already confirmed");
                    }
                }
                let delayed = matches!(outcome, BookOutcome::Confirmed(_));
                (outcome.response(), delayed)
            }
            other => {
                warn!("Unknown tool '{}', acknowledging as no-op", other);
                (json!({ "result": "ok" }), false)
            }
        };

        if delayed {
            self.respond_later(id, name, response);
        } else {
            self.respond(id, name, response);
        }
        self.publish();
    }

    /// Acknowledge a tool call now.
    fn respond(&self, call_id: String, name: String, response: Value) {
        let Some(session) = self.session.clone() else {
            return;
        };
        self.spawn_send("tool response", async move {
            session.send_tool_response(&call_id, &name, response).await
        });
    }

    /// Acknowledge a tool call after the confirmation delay.
    fn respond_later(&mut self, call_id: String, name: String, response: Value) {
        let delay = self.config.session.confirmation_delay();
        let cancel = self.cancel.clone();
        let events = self.events_tx.clone();
        let envelope = EventEnvelope {
            epoch: self.epoch,
            event: SessionEvent::AckDue {
                call_id: call_id.clone(),
            },
        };

        let timer = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(envelope);
                }
            }
        });

        if let Some(previous) = self.pending_acks.insert(
            call_id,
            PendingAck {
                name,
                response,
                timer,
            },
        ) {
            previous.timer.abort();
        }
    }

    fn on_ack_due(&mut self, call_id: &str) {
        if let Some(ack) = self.pending_acks.remove(call_id) {
            self.respond(call_id.to_string(), ack.name, ack.response);
        }
    }

    fn cancel_ack(&mut self, call_id: &str) {
        if let Some(ack) = self.pending_acks.remove(call_id) {
            ack.timer.abort();
            debug!("Dropped acknowledgement for cancelled call {}", call_id);
        }
    }

    // =========================================================================
    // Greeting / Text
    // =========================================================================

    fn schedule_greeting(&mut self) {
        let delay = self.config.session.greeting_delay();
        let cancel = self.cancel.clone();
        let events = self.events_tx.clone();
        let envelope = EventEnvelope {
            epoch: self.epoch,
            event: SessionEvent::GreetingDue,
        };

        self.greeting = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(envelope);
                }
            }
        }));
    }

    fn on_greeting_due(&mut self) {
        self.greeting = None;
        if self.state != SessionState::Connected {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        let prompt = self.config.session.greeting_prompt.clone();
        debug!("Sending greeting trigger");
        self.spawn_send("greeting", async move { session.send_text(&prompt).await });
    }

    fn send_text(&mut self, text: String) {
        if self.state != SessionState::Connected {
            warn!("Cannot send text while {}", self.state);
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        self.push_log(LogRole::User, text.clone());
        self.spawn_send("text turn", async move { session.send_text(&text).await });
    }

    /// Run an outbound send unless the session is torn down first.
    fn spawn_send<F>(&self, what: &'static str, send: F)
    where
        F: Future<Output = RealtimeResult<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            if !connected.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => debug!("Dropped {}: session closed", what),
                result = send => match result {
                    Ok(()) => {}
                    Err(RealtimeError::Cancelled) => debug!("Dropped {}: session closed", what),
                    Err(e) => warn!("Failed to send {}: {}", what, e),
                },
            }
        });
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    fn transport_callback(&self, epoch: u64) -> TransportEventCallback {
        let events = self.events_tx.clone();
        Arc::new(move |event: TransportEvent| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(EventEnvelope {
                    epoch,
                    event: SessionEvent::Transport(event),
                });
            })
        })
    }

    fn source_ended_callback(&self, epoch: u64) -> SourceEndedCallback {
        let events = self.events_tx.clone();
        Arc::new(move |id: SourceId| {
            let _ = events.send(EventEnvelope {
                epoch,
                event: SessionEvent::SourceEnded(id),
            });
        })
    }

    // =========================================================================
    // Visible State
    // =========================================================================

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {} -> {}", self.state, state);
            self.state = state;
        }
        self.publish();
    }

    fn push_log(&mut self, role: LogRole, text: impl Into<String>) {
        let entry = LogEntry::new(role, text);
        info!("[{}] {}", entry.role, entry.text);
        self.logs.push(entry);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            draft: self.booking.draft().clone(),
            booking: self.booking.booking().cloned(),
            confirmed: self.booking.is_confirmed(),
            logs: self.logs.to_vec(),
            mic_active: self.mic_active(),
            last_error: self.last_error.clone(),
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Route encoded capture frames to the transport.
fn frame_sender(session: Arc<dyn RealtimeSession>) -> FrameSender {
    Arc::new(move |frame: Bytes| {
        let session = session.clone();
        Box::pin(async move {
            match session.send_realtime_input(frame).await {
                Ok(()) | Err(RealtimeError::Cancelled) => {}
                Err(e) => warn!("Failed to send audio frame: {}", e),
            }
        })
    })
}
