//! POST /webhooks/email/{route_token}
//!
//! SNS HTTP(S) subscription carrying SES event publishing notifications.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::ingest::EventOutcome;
use crate::ingest::email_events::{confirm_subscription, parse_envelope, parse_ses_event};
use crate::ingest::webhook_log::{WebhookSource, log_webhook_failure};
use crate::state::AppState;

const ENDPOINT: &str = "/webhooks/email";

pub async fn handle(
    State(state): State<AppState>,
    Path(route_token): Path<String>,
    body: Bytes,
) -> Response {
    let source = WebhookSource {
        provider: "ses",
        endpoint: ENDPOINT,
        route_token: Some(&route_token),
    };
    if route_token != state.secrets.email_webhook_token {
        log_webhook_failure(&state.storage, source, 404, "Unknown route token");
        return StatusCode::NOT_FOUND.into_response();
    }

    let envelope = match parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(reason) => {
            log_webhook_failure(&state.storage, source, 400, &reason);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match envelope.message_type.as_str() {
        "SubscriptionConfirmation" => {
            let Some(url) = envelope.subscribe_url.as_deref() else {
                log_webhook_failure(&state.storage, source, 400, "SubscriptionConfirmation without SubscribeURL");
                return StatusCode::BAD_REQUEST.into_response();
            };
            match confirm_subscription(&state.http, url).await {
                Ok(()) => {
                    tracing::info!(topic_arn = ?envelope.topic_arn, "SNS subscription confirmed");
                    StatusCode::OK.into_response()
                }
                Err(reason) => {
                    log_webhook_failure(&state.storage, source, 400, &reason);
                    StatusCode::BAD_REQUEST.into_response()
                }
            }
        }
        "UnsubscribeConfirmation" => {
            tracing::warn!(topic_arn = ?envelope.topic_arn, "SNS subscription removed");
            StatusCode::OK.into_response()
        }
        "Notification" => {
            let event = match parse_ses_event(&envelope.message_id, &envelope.message) {
                Ok(event) => event,
                Err(reason) => {
                    // Acknowledged: SNS would redeliver the same bad payload
                    tracing::warn!(message_id = %envelope.message_id, %reason, "Unreadable SES event");
                    return super::accepted(EventOutcome::Ignored);
                }
            };
            match state.email.ingest_event(&event) {
                Ok(outcome) => super::accepted(outcome),
                Err(e) => super::handler_failed("ses", &envelope.message_id, e),
            }
        }
        other => {
            log_webhook_failure(&state.storage, source, 400, &format!("Unknown SNS message type {other}"));
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}
