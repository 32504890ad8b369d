//! Outbound email API
//!
//! | Path | Method | Role |
//! |------|--------|------|
//! | /api/email/sends?booking_id= | GET | dispatcher |
//! | /api/email/suppressions | GET | admin |

mod handler;

use axum::{Router, routing::get};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api/email",
        Router::new()
            .route("/sends", get(handler::list_sends))
            .route("/suppressions", get(handler::list_suppressions)),
    )
}
