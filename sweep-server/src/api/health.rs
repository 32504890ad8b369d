//! Health check endpoint (public)

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    /// Database answered a read transaction
    database: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.storage.begin_read() {
        Ok(_) => "ok",
        Err(e) => {
            tracing::error!(error = %e, "Health check: database unavailable");
            "error"
        }
    };
    Json(HealthResponse {
        status: if database == "ok" { "ok" } else { "degraded" },
        service: "sweep-server",
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}
