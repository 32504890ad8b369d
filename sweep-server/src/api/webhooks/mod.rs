//! Inbound webhooks (no JWT; each source authenticates its own way)
//!
//! | Path | Source | Authentication |
//! |------|--------|----------------|
//! | /webhooks/stripe | Stripe | `Stripe-Signature` HMAC |
//! | /webhooks/intake | Form provider | `Tally-Signature` HMAC |
//! | /webhooks/email/{route_token} | SES via SNS | secret route token |
//!
//! Requests rejected before reaching a handler, and signed bodies that cannot
//! be parsed, are written to the webhook failure log. Bodies that verify but
//! cannot be acted on are acknowledged, so the sender stops retrying;
//! transient failures answer 503.

mod email;
mod intake;
mod stripe;

use axum::{Json, Router, http::StatusCode, response::IntoResponse, response::Response, routing::post};
use serde_json::json;

use crate::error::SweepError;
use crate::ingest::EventOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/stripe", post(stripe::handle))
        .route("/webhooks/intake", post(intake::handle))
        .route("/webhooks/email/{route_token}", post(email::handle))
}

fn accepted(outcome: EventOutcome) -> Response {
    (StatusCode::OK, Json(json!({ "received": true, "outcome": outcome }))).into_response()
}

/// A verified event failed inside its handler
fn handler_failed(provider: &str, event_id: &str, err: SweepError) -> Response {
    if err.is_transient() {
        tracing::warn!(provider, event_id, error = %err, "Webhook handling failed, asking for retry");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    tracing::error!(provider, event_id, error = %err, "Webhook handling failed, acknowledging");
    (StatusCode::OK, Json(json!({ "received": true, "error": err.to_string() }))).into_response()
}
