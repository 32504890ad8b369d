//! Outbound email API Handlers

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use shared::error::AppResult;
use shared::models::{EmailSend, EmailSuppression};

use crate::api::auth::Auth;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SendsQuery {
    pub booking_id: Option<i64>,
}

/// List email sends, optionally for one booking
pub async fn list_sends(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<SendsQuery>,
) -> AppResult<Json<Vec<EmailSend>>> {
    Ok(Json(state.email.list_sends(&ctx, query.booking_id)?))
}

/// List suppressed addresses
pub async fn list_suppressions(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> AppResult<Json<Vec<EmailSuppression>>> {
    Ok(Json(state.email.list_suppressions(&ctx)?))
}
