//! Shared types for the Sweep booking service
//!
//! Error system, domain models, request context and small utilities used by
//! the server and by any client that talks to its API.

pub mod context;
pub mod error;
pub mod models;
pub mod util;

// Re-exports
pub use axum::Json;
pub use context::{RequestContext, Role};
pub use http;
pub use serde::{Deserialize, Serialize};
