//! Audit log API
//!
//! GET /api/audit?action=&resource_id=&limit= (admin)

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use shared::error::{AppError, AppResult};
use shared::models::{AuditEntry, AuditQuery};

use crate::api::auth::Auth;
use crate::state::AppState;

const MAX_LIMIT: usize = 500;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/audit", get(list))
}

/// Newest first
pub async fn list(
    State(state): State<AppState>,
    Auth(ctx): Auth,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    ctx.require_admin()?;
    let entries = state
        .storage
        .list_audit(
            Some(&ctx.organization_id),
            query.action,
            query.resource_id.as_deref(),
            query.limit.min(MAX_LIMIT),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "Audit log query failed");
            AppError::database(e.to_string())
        })?;
    Ok(Json(entries))
}
