//! Booking API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use shared::error::AppResult;
use shared::models::{
    Booking, BookingCreate, BookingFilter, BookingStatus, ChargeJob, ChargeReceipt, CheckoutLink,
    PaymentAttempt, SetupIntentLink,
};

use crate::api::auth::Auth;
use crate::state::AppState;

/// List bookings, optionally by status or service date
pub async fn list(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(filter): Query<BookingFilter>,
) -> AppResult<Json<Vec<Booking>>> {
    Ok(Json(state.bookings.list(&ctx, &filter)?))
}

/// Create a booking in `pending_card`
pub async fn create(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(payload): Json<BookingCreate>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.create(&ctx, payload)?))
}

/// Get booking by id
pub async fn get_by_id(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.get(&ctx, id)?))
}

#[derive(Debug, Deserialize)]
pub struct AmountPayload {
    pub amount: i64,
}

/// Set the quoted amount
pub async fn set_amount(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<AmountPayload>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.set_amount(&ctx, id, payload.amount)?))
}

/// Start the job
pub async fn start(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.start(&ctx, id)?))
}

/// Mark the job completed
pub async fn complete(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.mark_completed(&ctx, id)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelPayload {
    pub reason: Option<String>,
}

/// Cancel a booking
pub async fn cancel(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    payload: Option<Json<CancelPayload>>,
) -> AppResult<Json<Booking>> {
    let reason = payload.and_then(|Json(p)| p.reason);
    Ok(Json(state.bookings.cancel(&ctx, id, reason)?))
}

#[derive(Debug, Deserialize)]
pub struct OverridePayload {
    pub status: BookingStatus,
    pub reason: String,
}

/// Admin escape hatch: write any status
pub async fn admin_override(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<OverridePayload>,
) -> AppResult<Json<Booking>> {
    Ok(Json(state.bookings.admin_override(
        &ctx,
        id,
        payload.status,
        &payload.reason,
    )?))
}

// ========== Payments ==========

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutPayload {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Open or reuse a card-collection checkout session
pub async fn create_checkout(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    payload: Option<Json<CheckoutPayload>>,
) -> AppResult<Json<CheckoutLink>> {
    let Json(payload) = payload.unwrap_or_default();
    let link = state
        .payments
        .create_checkout_session(&ctx, id, payload.success_url, payload.cancel_url)
        .await?;
    Ok(Json(link))
}

/// Create a setup intent for an embedded card form
pub async fn create_setup_intent(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<SetupIntentLink>> {
    Ok(Json(state.payments.create_setup_intent(&ctx, id).await?))
}

/// Charge the saved card for a completed job
pub async fn charge(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    payload: Option<Json<ChargeJob>>,
) -> AppResult<Json<ChargeReceipt>> {
    let Json(job) = payload.unwrap_or_default();
    Ok(Json(state.payments.charge_completed_job(&ctx, id, job).await?))
}

/// Retry a declined charge
pub async fn retry_charge(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    payload: Option<Json<ChargeJob>>,
) -> AppResult<Json<ChargeReceipt>> {
    let Json(job) = payload.unwrap_or_default();
    Ok(Json(state.payments.retry_failed_charge(&ctx, id, job).await?))
}

/// List processor attempts for a booking
pub async fn payment_attempts(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<PaymentAttempt>>> {
    Ok(Json(state.payments.list_attempts(&ctx, id)?))
}
