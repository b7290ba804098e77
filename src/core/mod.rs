pub mod audio;
pub mod booking;
pub mod realtime;
pub mod session;

// Re-export commonly used types for convenience
pub use audio::{AudioBuffer, AudioError, CaptureGraph, PlaybackScheduler};

pub use booking::{BookingDraft, BookingState, ConfirmedBooking};

pub use realtime::{
    BoxedConnector, GeminiLiveConnector, RealtimeConnector, RealtimeError, RealtimeResult,
    RealtimeSession,
};

pub use session::{Command, SessionController, SessionSnapshot, SessionState};
