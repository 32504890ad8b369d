//! POST /webhooks/stripe

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::ingest::EventOutcome;
use crate::ingest::webhook_log::{WebhookSource, log_webhook_failure};
use crate::payments::{parse_event, stripe::verify_webhook_signature};
use crate::state::AppState;

const SOURCE: WebhookSource<'static> = WebhookSource {
    provider: "stripe",
    endpoint: "/webhooks/stripe",
    route_token: None,
};

/// Raw body is required for signature verification
pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        log_webhook_failure(&state.storage, SOURCE, 400, "Missing Stripe-Signature header");
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Err(reason) =
        verify_webhook_signature(&body, signature, &state.secrets.stripe_webhook_secret)
    {
        log_webhook_failure(&state.storage, SOURCE, 400, reason);
        return StatusCode::BAD_REQUEST.into_response();
    }

    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(reason) => {
            // Signed by Stripe: a redelivery would be just as unreadable
            log_webhook_failure(&state.storage, SOURCE, 200, &reason);
            return super::accepted(EventOutcome::Ignored);
        }
    };
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Received Stripe webhook");

    match state.payments.handle_event(&event).await {
        Ok(outcome) => super::accepted(outcome),
        Err(e) => super::handler_failed("stripe", &event.id, e),
    }
}
