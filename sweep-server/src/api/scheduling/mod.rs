//! Scheduling API
//!
//! | Path | Method | Role |
//! |------|--------|------|
//! | /api/cleaners | GET, POST | any / admin |
//! | /api/cleaners/{id} | GET, PATCH | any / admin |
//! | /api/cleaners/{id}/availability | GET, PUT | any / admin |
//! | /api/cleaners/{id}/availability/{day} | DELETE | admin |
//! | /api/availability?date= | GET | staff |
//! | /api/time-off | GET, POST | any / cleaner self or admin |
//! | /api/time-off/{id}/review | POST | admin |
//! | /api/time-off/{id}/cancel | POST | cleaner self or admin |
//! | /api/bookings/{id}/assignments | GET, POST | any / dispatcher |
//! | /api/assignments | GET | dispatcher, or cleaner for their own |
//! | /api/assignments/{id} | POST | see `AssignmentAction` |

mod handler;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/api/cleaners", cleaner_routes())
        .nest("/api/time-off", time_off_routes())
        .route("/api/availability", get(handler::available_for_date))
        .route(
            "/api/bookings/{id}/assignments",
            get(handler::booking_assignments).post(handler::assign),
        )
        .route("/api/assignments", get(handler::list_assignments))
        .route("/api/assignments/{id}", post(handler::update_assignment))
}

fn cleaner_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_cleaners).post(handler::create_cleaner))
        .route("/{id}", get(handler::get_cleaner).patch(handler::update_cleaner))
        .route(
            "/{id}/availability",
            get(handler::list_availability).put(handler::set_availability),
        )
        .route("/{id}/availability/{day}", delete(handler::remove_availability))
}

fn time_off_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::list_time_off).post(handler::request_time_off))
        .route("/{id}/review", post(handler::review_time_off))
        .route("/{id}/cancel", post(handler::cancel_time_off))
}
