//! Real-time session engine.
//!
//! # Architecture
//!
//! - `SessionController` owns every per-session resource and is the only
//!   place they are mutated
//! - Transport callbacks, playback completions and timers post
//!   epoch-tagged `EventEnvelope`s into one channel
//! - User actions arrive as `Command`s on the loop driven by `run`
//! - Visible state is published as a `SessionSnapshot` on a watch channel

mod controller;
mod events;
mod log;
mod snapshot;

pub use controller::SessionController;
pub use events::{
    Command, EventEnvelope, EventReceiver, EventSender, SessionEvent, SessionState,
};
pub use log::{LogEntry, LogRing, LogRole};
pub use snapshot::SessionSnapshot;
