//! Visible session state published to observers.

use serde::Serialize;

use super::events::SessionState;
use super::log::LogEntry;
use crate::core::booking::{BookingDraft, ConfirmedBooking};

/// Everything a front end needs to render the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(serialize_with = "serialize_state")]
    pub state: SessionState,
    pub draft: BookingDraft,
    pub booking: Option<ConfirmedBooking>,
    pub confirmed: bool,
    pub logs: Vec<LogEntry>,
    pub mic_active: bool,
    pub last_error: Option<String>,
}

fn serialize_state<S: serde::Serializer>(state: &SessionState, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(state)
}
