//! Booking form driven by model tool calls.
//!
//! The model fills the form through two functions. `update_draft_booking`
//! merges whatever fields it has heard so far, `book_appointment` finalizes
//! the booking once all five fields are known. Arguments arrive as untyped
//! JSON and are coerced into strings at this boundary.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::core::realtime::FunctionDeclaration;

/// Merges partial booking fields.
pub const UPDATE_DRAFT_BOOKING: &str = "update_draft_booking";

/// Finalizes the booking.
pub const BOOK_APPOINTMENT: &str = "book_appointment";

// =============================================================================
// Fields
// =============================================================================

/// One field of the booking form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingField {
    CustomerName,
    ServiceType,
    Date,
    Time,
    Email,
}

impl BookingField {
    pub const ALL: [BookingField; 5] = [
        BookingField::CustomerName,
        BookingField::ServiceType,
        BookingField::Date,
        BookingField::Time,
        BookingField::Email,
    ];

    /// Argument name used in tool calls.
    pub fn key(&self) -> &'static str {
        match self {
            BookingField::CustomerName => "customerName",
            BookingField::ServiceType => "serviceType",
            BookingField::Date => "date",
            BookingField::Time => "time",
            BookingField::Email => "email",
        }
    }

    fn alias(&self) -> Option<&'static str> {
        match self {
            BookingField::CustomerName => Some("customer_name"),
            BookingField::ServiceType => Some("service_type"),
            _ => None,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            BookingField::CustomerName => "Full name of the customer",
            BookingField::ServiceType => "Service being booked, e.g. haircut or consultation",
            BookingField::Date => "Appointment date, e.g. 2025-03-14",
            BookingField::Time => "Appointment time, e.g. 14:30",
            BookingField::Email => "Email address for the confirmation",
        }
    }
}

impl fmt::Display for BookingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Coerce an untyped argument into a field value.
///
/// Strings are trimmed, numbers and booleans are rendered, everything else
/// (null, arrays, objects) and blank strings count as absent.
pub fn coerce_arg(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

// =============================================================================
// Draft
// =============================================================================

/// The incrementally assembled booking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub customer_name: Option<String>,
    pub service_type: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub email: Option<String>,
}

impl BookingDraft {
    /// Read the fields a tool call carries. Unknown keys are ignored.
    pub fn from_args(args: &Value) -> Self {
        let mut draft = Self::default();
        let Some(map) = args.as_object() else {
            return draft;
        };
        for field in BookingField::ALL {
            let value = map
                .get(field.key())
                .or_else(|| field.alias().and_then(|a| map.get(a)))
                .and_then(coerce_arg);
            draft.set(field, value);
        }
        draft
    }

    pub fn get(&self, field: BookingField) -> Option<&str> {
        match field {
            BookingField::CustomerName => self.customer_name.as_deref(),
            BookingField::ServiceType => self.service_type.as_deref(),
            BookingField::Date => self.date.as_deref(),
            BookingField::Time => self.time.as_deref(),
            BookingField::Email => self.email.as_deref(),
        }
    }

    fn slot(&mut self, field: BookingField) -> &mut Option<String> {
        match field {
            BookingField::CustomerName => &mut self.customer_name,
            BookingField::ServiceType => &mut self.service_type,
            BookingField::Date => &mut self.date,
            BookingField::Time => &mut self.time,
            BookingField::Email => &mut self.email,
        }
    }

    pub fn set(&mut self, field: BookingField, value: Option<String>) {
        *self.slot(field) = value;
    }

    /// Merge known fields from `update`. Empty values never erase.
    ///
    /// Returns the fields whose value changed.
    pub fn merge(&mut self, update: &BookingDraft) -> Vec<BookingField> {
        let mut changed = Vec::new();
        for field in BookingField::ALL {
            let Some(value) = update.get(field).map(str::trim).filter(|v| !v.is_empty()) else {
                continue;
            };
            let slot = self.slot(field);
            if slot.as_deref() != Some(value) {
                *slot = Some(value.to_string());
                changed.push(field);
            }
        }
        changed
    }

    /// Fields still unknown.
    pub fn missing(&self) -> Vec<BookingField> {
        BookingField::ALL
            .into_iter()
            .filter(|f| self.get(*f).is_none_or(|v| v.trim().is_empty()))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        BookingField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

// =============================================================================
// Confirmed Booking
// =============================================================================

/// A finalized booking. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedBooking {
    pub confirmation_id: String,
    pub customer_name: String,
    pub service_type: String,
    pub date: String,
    pub time: String,
    pub email: String,
    #[serde(skip)]
    pub confirmed_at: SystemTime,
}

impl ConfirmedBooking {
    /// Promote a complete draft. Returns the missing fields otherwise.
    pub fn from_draft(draft: &BookingDraft) -> Result<Self, Vec<BookingField>> {
        let missing = draft.missing();
        if !missing.is_empty() {
            return Err(missing);
        }
        let field = |f: BookingField| draft.get(f).unwrap_or_default().trim().to_string();
        Ok(Self {
            confirmation_id: Uuid::new_v4().to_string(),
            customer_name: field(BookingField::CustomerName),
            service_type: field(BookingField::ServiceType),
            date: field(BookingField::Date),
            time: field(BookingField::Time),
            email: field(BookingField::Email),
            confirmed_at: SystemTime::now(),
        })
    }
}

// =============================================================================
// Booking State
// =============================================================================

/// Result of an `update_draft_booking` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Fields merged into the draft (possibly none)
    Merged(Vec<BookingField>),
    /// The booking is already final; nothing changed
    Finalized,
}

impl UpdateOutcome {
    pub fn response(&self) -> Value {
        match self {
            UpdateOutcome::Merged(_) => json!({ "result": "ok" }),
            UpdateOutcome::Finalized => json!({
                "result": "ok",
                "note": "booking already confirmed"
            }),
        }
    }
}

/// Result of a `book_appointment` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookOutcome {
    Confirmed(ConfirmedBooking),
    /// Required fields were missing; present ones were merged into the draft
    Rejected { missing: Vec<BookingField> },
    AlreadyConfirmed(ConfirmedBooking),
}

impl BookOutcome {
    pub fn response(&self) -> Value {
        match self {
            BookOutcome::Confirmed(booking) | BookOutcome::AlreadyConfirmed(booking) => json!({
                "result": "success",
                "confirmationId": booking.confirmation_id,
            }),
            BookOutcome::Rejected { missing } => json!({
                "result": "error",
                "missing": missing.iter().map(|f| f.key()).collect::<Vec<_>>(),
            }),
        }
    }
}

/// Draft and finalized booking for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingState {
    draft: BookingDraft,
    booking: Option<ConfirmedBooking>,
}

impl BookingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &BookingDraft {
        &self.draft
    }

    pub fn booking(&self) -> Option<&ConfirmedBooking> {
        self.booking.as_ref()
    }

    pub fn is_confirmed(&self) -> bool {
        self.booking.is_some()
    }

    /// Forget everything. Called at the start of each session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Apply `update_draft_booking` arguments.
    pub fn apply_update(&mut self, args: &Value) -> UpdateOutcome {
        if self.booking.is_some() {
            return UpdateOutcome::Finalized;
        }
        UpdateOutcome::Merged(self.draft.merge(&BookingDraft::from_args(args)))
    }

    /// Apply `book_appointment` arguments.
    ///
    /// A complete call replaces the draft wholesale and finalizes it. An
    /// incomplete call is rejected and only merges what it carried.
    pub fn book(&mut self, args: &Value) -> BookOutcome {
        if let Some(booking) = &self.booking {
            return BookOutcome::AlreadyConfirmed(booking.clone());
        }

        let incoming = BookingDraft::from_args(args);
        match ConfirmedBooking::from_draft(&incoming) {
            Ok(booking) => {
                self.draft = incoming;
                self.booking = Some(booking.clone());
                BookOutcome::Confirmed(booking)
            }
            Err(missing) => {
                self.draft.merge(&incoming);
                BookOutcome::Rejected { missing }
            }
        }
    }
}

// =============================================================================
// Tool Declarations
// =============================================================================

fn field_properties() -> Value {
    let mut properties = serde_json::Map::new();
    for field in BookingField::ALL {
        properties.insert(
            field.key().to_string(),
            json!({ "type": "STRING", "description": field.description() }),
        );
    }
    Value::Object(properties)
}

/// The two functions declared to the model.
pub fn tool_declarations() -> Vec<FunctionDeclaration> {
    let required: Vec<&str> = BookingField::ALL.iter().map(|f| f.key()).collect();
    vec![
        FunctionDeclaration {
            name: UPDATE_DRAFT_BOOKING.to_string(),
            description: "Record booking details as soon as the customer mentions them. \
                          Call with only the fields you have learned."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": field_properties(),
            }),
        },
        FunctionDeclaration {
            name: BOOK_APPOINTMENT.to_string(),
            description: "Finalize the appointment once every detail is known and the \
                          customer has agreed."
                .to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": field_properties(),
                "required": required,
            }),
        },
    ]
}
