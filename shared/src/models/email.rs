//! Outbound email send records and the suppression list

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplate {
    QuoteReceived,
    CardSaved,
    BookingScheduled,
    Receipt,
    PaymentFailed,
    PaymentActionRequired,
}

impl EmailTemplate {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::QuoteReceived => "quote_received",
            Self::CardSaved => "card_saved",
            Self::BookingScheduled => "booking_scheduled",
            Self::Receipt => "receipt",
            Self::PaymentFailed => "payment_failed",
            Self::PaymentActionRequired => "payment_action_required",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailSendStatus {
    Queued,
    Sent,
    Delivered,
    DeliveryDelayed,
    Failed,
    Skipped,
}

impl EmailSendStatus {
    /// Whether a provider event may move a send from `self` to `next`.
    ///
    /// Events arrive out of order; a late "delayed" must not undo
    /// "delivered", and nothing moves a skipped send.
    pub fn can_advance_to(&self, next: EmailSendStatus) -> bool {
        use EmailSendStatus::*;
        match (self, next) {
            (Skipped, _) => false,
            (Delivered, _) | (Failed, _) => false,
            (Queued | Sent, Delivered | DeliveryDelayed | Failed) => true,
            (DeliveryDelayed, Delivered | Failed) => true,
            (Queued, Sent) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSend {
    pub id: i64,
    pub organization_id: Option<String>,
    /// Globally unique
    pub idempotency_key: String,
    /// Normalized recipient
    pub recipient: String,
    pub template: EmailTemplate,
    /// Provider name ("ses")
    pub provider: String,
    pub status: EmailSendStatus,
    /// Template variables
    pub payload: serde_json::Value,
    pub booking_id: Option<i64>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub attempts: u32,
    pub sent_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    HardBounce,
    Complaint,
}

/// One row per normalized email address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSuppression {
    pub email: String,
    pub reason: SuppressionReason,
    pub source_event_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
