//! Booking Model
//!
//! A booking is one cleaning job for one customer contact. It is created
//! once (dashboard action or quote conversion) and only patched afterwards.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Booking lifecycle status
///
/// Happy path: `pending_card → card_saved → scheduled → in_progress →
/// completed → charged`. Side branches are `payment_failed` and `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    PendingCard,
    CardSaved,
    Scheduled,
    InProgress,
    Completed,
    Charged,
    PaymentFailed,
    Cancelled,
    /// Legacy alias of `PaymentFailed`. Still readable, never written.
    Failed,
}

impl BookingStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingCard => "pending_card",
            Self::CardSaved => "card_saved",
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Charged => "charged",
            Self::PaymentFailed => "payment_failed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Human label for dashboards
    pub const fn label(&self) -> &'static str {
        match self {
            Self::PendingCard => "Awaiting card",
            Self::CardSaved => "Card saved",
            Self::Scheduled => "Scheduled",
            Self::InProgress => "In progress",
            Self::Completed => "Completed",
            Self::Charged => "Charged",
            Self::PaymentFailed | Self::Failed => "Payment failed",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Folds the legacy `failed` value into `payment_failed`.
    pub const fn normalized(self) -> Self {
        match self {
            Self::Failed => Self::PaymentFailed,
            other => other,
        }
    }

    /// Charged and cancelled bookings never change status again
    /// (except through an admin override).
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Charged | Self::Cancelled)
    }

    /// Position along the happy path, `None` for side branches.
    const fn progress(&self) -> Option<u8> {
        match self.normalized() {
            Self::PendingCard => Some(0),
            Self::CardSaved => Some(1),
            Self::Scheduled => Some(2),
            Self::InProgress => Some(3),
            Self::Completed => Some(4),
            Self::Charged => Some(5),
            _ => None,
        }
    }

    /// Whether the booking is already at or past `target` on the happy path.
    ///
    /// Used by webhook reconciliation: a `card_saved` confirmation that
    /// arrives after the booking was scheduled is a no-op, not an error.
    pub fn has_reached(&self, target: BookingStatus) -> bool {
        let (current, target_norm) = (self.normalized(), target.normalized());
        if current == target_norm {
            return true;
        }
        match (current.progress(), target_norm.progress()) {
            (Some(a), Some(b)) => a >= b,
            _ => false,
        }
    }

    /// Transition table. Anything not listed here is rejected.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        let (from, to) = (self.normalized(), next.normalized());
        if from.is_terminal() {
            return false;
        }
        matches!(
            (from, to),
            (_, Cancelled)
                | (PendingCard, CardSaved)
                | (CardSaved, Scheduled)
                | (Scheduled, InProgress)
                | (Scheduled, Completed)
                | (InProgress, Completed)
                | (Completed, Charged)
                | (PendingCard, PaymentFailed)
                | (Completed, PaymentFailed)
                | (PaymentFailed, Completed)
                | (PaymentFailed, PendingCard)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub organization_id: String,
    /// Contact email (required)
    pub email: String,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub status: BookingStatus,
    pub service_type: Option<String>,
    /// Calendar date, no time zone conversion
    pub service_date: Option<NaiveDate>,
    /// Minor currency units (cents)
    pub amount: Option<i64>,
    pub notes: Option<String>,
    /// Intake provider response id (dedupe key for conversions)
    pub external_response_id: Option<String>,
    pub quote_id: Option<i64>,

    // Processor identifiers
    pub checkout_session_id: Option<String>,
    pub customer_id: Option<String>,
    pub setup_intent_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub payment_intent_id: Option<String>,
    /// Last processor error, cleared on a successful charge
    pub last_payment_error: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Booking {
    /// Booking has everything needed to charge it off-session
    pub fn has_saved_card(&self) -> bool {
        self.customer_id.is_some() && self.payment_method_id.is_some()
    }
}

/// Create booking payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingCreate {
    pub email: String,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub service_type: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub amount: Option<i64>,
    pub notes: Option<String>,
    pub external_response_id: Option<String>,
    #[serde(default)]
    pub quote_id: Option<i64>,
}

/// Booking list filter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub service_date: Option<NaiveDate>,
}
