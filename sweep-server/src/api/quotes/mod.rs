//! Quote request API
//!
//! | Path | Method | Role |
//! |------|--------|------|
//! | /api/quotes | GET | any |
//! | /api/quotes/{id} | GET | any |
//! | /api/quotes/{id}/convert | POST | dispatcher |
//! | /api/quotes/{id}/dismiss | POST | dispatcher |

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/api/quotes",
        Router::new()
            .route("/", get(handler::list))
            .route("/{id}", get(handler::get_by_id))
            .route("/{id}/convert", post(handler::convert))
            .route("/{id}/dismiss", post(handler::dismiss)),
    )
}
