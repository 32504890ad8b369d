//! Scheduling API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::error::AppResult;
use shared::models::{
    Assignment, AssignmentAction, AssignmentCreate, AvailabilitySlot, AvailabilitySlotInput,
    AvailableCleaner, Cleaner, CleanerCreate, CleanerUpdate, TimeOffCreate, TimeOffDecision,
    TimeOffRequest,
};

use crate::api::auth::Auth;
use crate::state::AppState;

// ========== Cleaners ==========

/// List cleaners
pub async fn list_cleaners(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> AppResult<Json<Vec<Cleaner>>> {
    Ok(Json(state.scheduler.list_cleaners(&ctx)?))
}

/// Create a cleaner
pub async fn create_cleaner(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(payload): Json<CleanerCreate>,
) -> AppResult<Json<Cleaner>> {
    Ok(Json(state.scheduler.create_cleaner(&ctx, payload)?))
}

/// Get cleaner by id
pub async fn get_cleaner(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Cleaner>> {
    Ok(Json(state.scheduler.get_cleaner(&ctx, id)?))
}

/// Update a cleaner
pub async fn update_cleaner(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<CleanerUpdate>,
) -> AppResult<Json<Cleaner>> {
    Ok(Json(state.scheduler.update_cleaner(&ctx, id, payload)?))
}

// ========== Availability ==========

/// List a cleaner's weekly slots
pub async fn list_availability(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<AvailabilitySlot>>> {
    Ok(Json(state.scheduler.list_availability(&ctx, id)?))
}

/// Set the slot for one weekday
pub async fn set_availability(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<AvailabilitySlotInput>,
) -> AppResult<Json<AvailabilitySlot>> {
    Ok(Json(state.scheduler.set_availability(&ctx, id, payload)?))
}

/// Remove the slot for one weekday
pub async fn remove_availability(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path((id, day)): Path<(i64, u8)>,
) -> AppResult<Json<AvailabilitySlot>> {
    Ok(Json(state.scheduler.remove_availability(&ctx, id, day)?))
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: NaiveDate,
}

/// Cleaners free on a date, with their load
pub async fn available_for_date(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<DateQuery>,
) -> AppResult<Json<Vec<AvailableCleaner>>> {
    Ok(Json(
        state.scheduler.available_cleaners_for_date(&ctx, query.date)?,
    ))
}

// ========== Time off ==========

#[derive(Debug, Default, Deserialize)]
pub struct TimeOffQuery {
    pub cleaner_id: Option<i64>,
}

/// List time-off requests
pub async fn list_time_off(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<TimeOffQuery>,
) -> AppResult<Json<Vec<TimeOffRequest>>> {
    Ok(Json(state.scheduler.list_time_off(&ctx, query.cleaner_id)?))
}

/// Request time off
pub async fn request_time_off(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Json(payload): Json<TimeOffCreate>,
) -> AppResult<Json<TimeOffRequest>> {
    Ok(Json(state.scheduler.request_time_off(&ctx, payload)?))
}

#[derive(Debug, Deserialize)]
pub struct ReviewPayload {
    pub decision: TimeOffDecision,
}

/// Approve or deny a time-off request
pub async fn review_time_off(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewPayload>,
) -> AppResult<Json<TimeOffRequest>> {
    Ok(Json(
        state.scheduler.review_time_off(&ctx, id, payload.decision)?,
    ))
}

/// Cancel a time-off request
pub async fn cancel_time_off(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<TimeOffRequest>> {
    Ok(Json(state.scheduler.cancel_time_off(&ctx, id)?))
}

// ========== Assignments ==========

/// List assignments for a booking
pub async fn booking_assignments(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Assignment>>> {
    Ok(Json(state.scheduler.list_booking_assignments(&ctx, id)?))
}

/// Assign a cleaner to a booking
pub async fn assign(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<AssignmentCreate>,
) -> AppResult<Json<Assignment>> {
    Ok(Json(state.scheduler.assign_cleaner(&ctx, id, payload).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AssignmentQuery {
    pub cleaner_id: Option<i64>,
    pub date: Option<NaiveDate>,
}

/// List assignments by cleaner or date
pub async fn list_assignments(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<AssignmentQuery>,
) -> AppResult<Json<Vec<Assignment>>> {
    Ok(Json(state.scheduler.list_assignments(
        &ctx,
        query.cleaner_id,
        query.date,
    )?))
}

#[derive(Debug, Deserialize)]
pub struct ActionPayload {
    pub action: AssignmentAction,
}

/// Apply an assignment action
pub async fn update_assignment(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<ActionPayload>,
) -> AppResult<Json<Assignment>> {
    Ok(Json(
        state.scheduler.update_assignment(&ctx, id, payload.action)?,
    ))
}
