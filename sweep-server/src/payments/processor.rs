//! Card processor abstraction
//!
//! The orchestrator only talks to this trait. Production uses the Stripe
//! REST client; tests use an in-process mock.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct CustomerRequest {
    pub booking_id: i64,
    pub email: String,
    pub name: Option<String>,
    pub idempotency_key: String,
}

/// Hosted "collect card, do not charge" session
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub customer_id: String,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct SetupIntentRequest {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub customer_id: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetupIntent {
    pub id: String,
    pub client_secret: String,
}

/// Off-session charge of a saved payment method
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub booking_id: i64,
    pub attempt_id: i64,
    pub customer_id: String,
    pub payment_method_id: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
}

/// Non-error charge outcomes
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeResult {
    Succeeded {
        payment_intent_id: String,
    },
    /// Strong customer authentication needed; not a failure
    RequiresAction {
        payment_intent_id: String,
        client_secret: Option<String>,
    },
    /// Accepted, final answer comes by webhook
    Processing {
        payment_intent_id: String,
    },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessorError {
    /// Network failure, timeout, rate limit or 5xx. Safe to retry with the
    /// same idempotency key.
    #[error("processor unavailable: {0}")]
    Unavailable(String),

    #[error("card declined: {message}")]
    CardDeclined {
        message: String,
        decline_code: Option<String>,
        payment_intent_id: Option<String>,
    },

    /// Request was understood and refused (bad parameters, missing method)
    #[error("processor rejected request: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
        payment_intent_id: Option<String>,
    },
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create the processor-side customer that will own the saved card
    async fn create_customer(&self, req: &CustomerRequest) -> Result<String, ProcessorError>;

    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError>;

    /// Invalidate a session that is being superseded
    async fn expire_checkout_session(&self, session_id: &str) -> Result<(), ProcessorError>;

    async fn create_setup_intent(
        &self,
        req: &SetupIntentRequest,
    ) -> Result<SetupIntent, ProcessorError>;

    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeResult, ProcessorError>;
}
