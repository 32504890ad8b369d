//! Payment attempt records
//!
//! One row per processor attempt. A booking may have many (retries), but at
//! most one active attempt per purpose.

use serde::{Deserialize, Serialize};

/// What the attempt is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    /// Collect and save a card, no charge
    Setup,
    /// Off-session charge of the saved card
    Charge,
}

/// Processor object the attempt tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptSource {
    CheckoutSession,
    SetupIntent,
    PaymentIntent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Session handed to the customer, not finished yet
    Open,
    /// Request sent to the processor, no final answer yet
    Processing,
    /// Customer must authenticate (3DS)
    RequiresAction,
    Succeeded,
    Failed,
    /// Replaced by a newer attempt for the same purpose
    Superseded,
    /// Session expired before completion
    Expired,
}

impl AttemptStatus {
    /// Active attempts block a new attempt of the same purpose
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Processing | Self::RequiresAction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub id: i64,
    pub booking_id: i64,
    pub purpose: PaymentPurpose,
    pub source: AttemptSource,
    /// Processor object id (cs_..., seti_..., pi_...); unset while reserving
    pub processor_ref: Option<String>,
    /// Hosted page for checkout attempts
    pub redirect_url: Option<String>,
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
    /// Charge amount (minor units), `None` for setup attempts
    pub amount: Option<i64>,
    pub status: AttemptStatus,
    pub error_message: Option<String>,
    /// Processor error code / decline code
    pub error_kind: Option<String>,
    /// Sent as the processor's Idempotency-Key header
    pub idempotency_key: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of opening (or reusing) a card collection session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutLink {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub session_id: String,
    pub url: String,
    /// An already-open session was returned instead of a new one
    pub reused: bool,
}

/// Result of creating a bare setup intent (embedded card form)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupIntentLink {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub setup_intent_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    /// Booking moved to `charged`
    Charged,
    /// Processor accepted but has not settled; a webhook will finish it
    Processing,
}

/// Successful (or pending) charge result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub payment_intent_id: String,
    pub amount: i64,
    pub state: ChargeState,
}

/// Charge request payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChargeJob {
    /// Must match the booking amount if both are present
    pub amount: Option<i64>,
    pub description: Option<String>,
}
