//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::BookingNotFound
            | Self::CleanerNotFound
            | Self::AssignmentNotFound
            | Self::AvailabilityNotFound
            | Self::TimeOffNotFound
            | Self::EmailSendNotFound
            | Self::QuoteNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::AlreadyExists
            | Self::InvalidTransition
            | Self::BookingClosed
            | Self::PaymentInProgress
            | Self::DuplicateAssignment
            | Self::InvalidAssignmentTransition
            | Self::QuoteAlreadyConverted => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            Self::PermissionDenied
            | Self::RoleRequired
            | Self::AdminRequired
            | Self::OrganizationRequired => StatusCode::FORBIDDEN,

            // 402 Payment Required
            Self::CardDeclined | Self::PaymentFailed | Self::PaymentRequiresAction => {
                StatusCode::PAYMENT_REQUIRED
            }

            // 422 Unprocessable (state is fine, data missing)
            Self::BookingAmountRequired | Self::NoSavedPaymentMethod => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 503 Service Unavailable (transient errors, client can retry)
            Self::ProcessorUnavailable
            | Self::NetworkError
            | Self::TimeoutError
            | Self::SystemBusy => StatusCode::SERVICE_UNAVAILABLE,

            // 502 upstream rejected
            Self::EmailDeliveryFailed => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            Self::InternalError
            | Self::DatabaseError
            | Self::ConfigError
            | Self::StorageFull
            | Self::OutOfMemory
            | Self::StorageCorrupted => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
