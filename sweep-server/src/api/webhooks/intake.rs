//! POST /webhooks/intake

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::SweepError;
use crate::ingest::intake::{SIGNATURE_HEADER, verify_signature};
use crate::ingest::webhook_log::{WebhookSource, log_webhook_failure};
use crate::state::AppState;

const SOURCE: WebhookSource<'static> = WebhookSource {
    provider: "intake",
    endpoint: "/webhooks/intake",
    route_token: None,
};

pub async fn handle(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        log_webhook_failure(&state.storage, SOURCE, 401, "Missing signature header");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if let Err(reason) = verify_signature(&body, signature, &state.secrets.intake_webhook_secret) {
        log_webhook_failure(&state.storage, SOURCE, 401, reason);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.intake.ingest(&body).await {
        Ok((quote, outcome)) => (
            StatusCode::OK,
            Json(json!({
                "received": true,
                "outcome": outcome,
                "quote_id": quote.id,
                "quote_number": quote.quote_number,
            })),
        )
            .into_response(),
        Err(SweepError::Validation(reason)) => {
            log_webhook_failure(&state.storage, SOURCE, 400, &reason);
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(e) => super::handler_failed("intake", "-", e),
    }
}
