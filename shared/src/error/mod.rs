//! Unified error system
//!
//! - [`ErrorCode`]: Standardized error codes for all error types
//! - [`ErrorCategory`]: Classification of errors by domain
//! - [`AppError`]: Error with code, message and details
//! - [`ErrorBody`]: JSON body of an error response
//!
//! # Error Code Ranges
//!
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Booking lifecycle errors
//! - 5xxx: Payment errors
//! - 6xxx: Scheduling errors
//! - 7xxx: Messaging and intake errors
//! - 9xxx: System errors
//!
//! # Example
//!
//! ```
//! use shared::error::{AppError, ErrorBody, ErrorCode};
//!
//! let err = AppError::new(ErrorCode::InvalidTransition)
//!     .with_detail("from", "pending_card");
//!
//! let body = ErrorBody::from(&err);
//! assert_eq!(body.code, 4002);
//! ```

mod category;
mod codes;
mod http;
mod types;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
pub use types::{AppError, AppResult, ErrorBody};
