//! Data models
//!
//! Shared between sweep-server and dashboard clients (via API).
//! All IDs are `i64` snowflakes, all timestamps Unix milliseconds.

pub mod assignment;
pub mod audit;
pub mod booking;
pub mod change;
pub mod cleaner;
pub mod email;
pub mod payment;
pub mod quote;

// Re-exports
pub use assignment::*;
pub use audit::*;
pub use booking::*;
pub use change::*;
pub use cleaner::*;
pub use email::*;
pub use payment::*;
pub use quote::*;
