//! Booking API
//!
//! | Path | Method | Role |
//! |------|--------|------|
//! | /api/bookings | GET, POST | any / dispatcher |
//! | /api/bookings/{id} | GET | any |
//! | /api/bookings/{id}/amount | PUT | dispatcher |
//! | /api/bookings/{id}/start, /complete, /cancel | POST | dispatcher |
//! | /api/bookings/{id}/override | POST | admin |
//! | /api/bookings/{id}/checkout, /setup-intent | POST | dispatcher |
//! | /api/bookings/{id}/charge, /retry-charge | POST | dispatcher |
//! | /api/bookings/{id}/payment-attempts | GET | dispatcher |

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().nest("/api/bookings", routes())
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list).post(handler::create))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/amount", put(handler::set_amount))
        .route("/{id}/start", post(handler::start))
        .route("/{id}/complete", post(handler::complete))
        .route("/{id}/cancel", post(handler::cancel))
        .route("/{id}/override", post(handler::admin_override))
        // Payments
        .route("/{id}/checkout", post(handler::create_checkout))
        .route("/{id}/setup-intent", post(handler::create_setup_intent))
        .route("/{id}/charge", post(handler::charge))
        .route("/{id}/retry-charge", post(handler::retry_charge))
        .route("/{id}/payment-attempts", get(handler::payment_attempts))
}
