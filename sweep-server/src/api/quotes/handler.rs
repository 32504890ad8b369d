//! Quote request API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use shared::error::AppResult;
use shared::models::{Booking, QuoteConversion, QuoteRequest};

use crate::api::auth::Auth;
use crate::state::AppState;

/// List quote requests
pub async fn list(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> AppResult<Json<Vec<QuoteRequest>>> {
    Ok(Json(state.intake.list_quotes(&ctx)?))
}

/// Get quote request by id
pub async fn get_by_id(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<QuoteRequest>> {
    Ok(Json(state.intake.get_quote(&ctx, id)?))
}

/// Create the booking for a quote
pub async fn convert(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    payload: Option<Json<QuoteConversion>>,
) -> AppResult<Json<Booking>> {
    let Json(conversion) = payload.unwrap_or_default();
    Ok(Json(state.intake.convert_quote(&ctx, id, conversion)?))
}

/// Dismiss a quote request
pub async fn dismiss(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<QuoteRequest>> {
    Ok(Json(state.intake.dismiss_quote(&ctx, id)?))
}
