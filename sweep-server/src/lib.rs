//! sweep-server: booking and payment backend for a home-cleaning business
//!
//! - `bookings` booking state machine
//! - `payments` deferred card collection and charging
//! - `scheduling` cleaners, availability and assignments
//! - `ingest` intake forms, outbound email and delivery events
//! - `api` HTTP surface

pub mod api;
pub mod bookings;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logger;
pub mod notify;
pub mod payments;
pub mod scheduling;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use state::AppState;
