//! `AppError` and its JSON body

use super::category::ErrorCategory;
use super::codes::ErrorCode;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Error returned by every HTTP handler
///
/// Clients switch on `code`; `message` is for humans. `details` carries
/// machine-readable context such as the booking's current status or the
/// client secret a customer needs to finish 3-D Secure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<HashMap<String, Value>>,
}

impl AppError {
    /// Error with the code's default message
    pub fn new(code: ErrorCode) -> Self {
        Self {
            message: code.message().to_string(),
            code,
            details: None,
        }
    }

    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::ValidationFailed, msg)
    }

    pub fn not_authenticated() -> Self {
        Self::new(ErrorCode::NotAuthenticated)
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::PermissionDenied, msg)
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::DatabaseError, msg)
    }

    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::TokenInvalid, msg)
    }

    pub fn token_expired() -> Self {
        Self::new(ErrorCode::TokenExpired)
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Wire form of an [`AppError`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Value>>,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code.code(),
            message: err.message.clone(),
            details: err.details.clone(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.http_status();
        if self.code.category() == ErrorCategory::System {
            tracing::error!(code = %self.code, message = %self.message, "System error");
        }
        (status, axum::Json(ErrorBody::from(&self))).into_response()
    }
}
