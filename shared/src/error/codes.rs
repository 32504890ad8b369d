//! Unified error codes for the Sweep service
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 4xxx: Booking lifecycle errors
//! - 5xxx: Payment errors
//! - 6xxx: Scheduling errors
//! - 7xxx: Messaging and intake errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so dashboards and webhook
/// consumers can switch on a stable number instead of a message string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Invalid format
    InvalidFormat = 6,
    /// Required field missing
    RequiredField = 7,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,
    /// Token carries no organization
    OrganizationRequired = 1005,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Specific role required
    RoleRequired = 2002,
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 4xxx: Booking ====================
    /// Booking not found
    BookingNotFound = 4001,
    /// Status change not permitted from the current status
    InvalidTransition = 4002,
    /// Booking has no amount yet
    BookingAmountRequired = 4003,
    /// Booking is charged or cancelled
    BookingClosed = 4004,

    // ==================== 5xxx: Payment ====================
    /// Payment processing failed
    PaymentFailed = 5001,
    /// Payment processor unavailable (retryable)
    ProcessorUnavailable = 5002,
    /// Card declined
    CardDeclined = 5003,
    /// Customer must complete an extra verification step
    PaymentRequiresAction = 5004,
    /// A charge for this booking is already in flight
    PaymentInProgress = 5005,
    /// Booking has no saved payment method
    NoSavedPaymentMethod = 5006,
    /// Webhook signature could not be verified
    WebhookSignatureInvalid = 5007,

    // ==================== 6xxx: Scheduling ====================
    /// Cleaner not found
    CleanerNotFound = 6001,
    /// Cleaner already actively assigned to the booking
    DuplicateAssignment = 6002,
    /// Assignment not found
    AssignmentNotFound = 6003,
    /// Availability slot not found
    AvailabilityNotFound = 6004,
    /// Time-off request not found
    TimeOffNotFound = 6005,
    /// Start is after end
    InvalidTimeRange = 6006,
    /// Assignment status change not permitted
    InvalidAssignmentTransition = 6007,

    // ==================== 7xxx: Messaging / Intake ====================
    /// Email send record not found
    EmailSendNotFound = 7001,
    /// Recipient is on the suppression list
    RecipientSuppressed = 7002,
    /// Email provider rejected the send
    EmailDeliveryFailed = 7003,
    /// Quote request not found
    QuoteNotFound = 7101,
    /// Quote request was already converted
    QuoteAlreadyConverted = 7102,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Operation timeout
    TimeoutError = 9004,
    /// Configuration error
    ConfigError = 9005,

    // ==================== 94xx: Storage ====================
    /// Storage full (disk space insufficient)
    StorageFull = 9401,
    /// Out of memory
    OutOfMemory = 9402,
    /// Storage corrupted (data file damaged)
    StorageCorrupted = 9403,
    /// System busy (IO error, retry later)
    SystemBusy = 9404,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Whether the caller may retry the same request later
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ProcessorUnavailable
                | ErrorCode::NetworkError
                | ErrorCode::TimeoutError
                | ErrorCode::SystemBusy
        )
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::RequiredField => "Required field is missing",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Auth
            ErrorCode::NotAuthenticated => "Authentication required",
            ErrorCode::TokenExpired => "Token has expired",
            ErrorCode::TokenInvalid => "Token is invalid",
            ErrorCode::OrganizationRequired => "An active organization is required",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::RoleRequired => "Required role is missing",
            ErrorCode::AdminRequired => "Administrator role is required",

            // Booking
            ErrorCode::BookingNotFound => "Booking not found",
            ErrorCode::InvalidTransition => "Action unavailable for the booking's current status",
            ErrorCode::BookingAmountRequired => "Booking amount is required",
            ErrorCode::BookingClosed => "Booking is already charged or cancelled",

            // Payment
            ErrorCode::PaymentFailed => "Payment processing failed",
            ErrorCode::ProcessorUnavailable => "Payment processor unavailable, please retry",
            ErrorCode::CardDeclined => "Card was declined",
            ErrorCode::PaymentRequiresAction => "Payment requires customer verification",
            ErrorCode::PaymentInProgress => "A payment for this booking is already in progress",
            ErrorCode::NoSavedPaymentMethod => "No saved payment method for this booking",
            ErrorCode::WebhookSignatureInvalid => "Webhook signature is invalid",

            // Scheduling
            ErrorCode::CleanerNotFound => "Cleaner not found",
            ErrorCode::DuplicateAssignment => "Cleaner is already assigned to this booking",
            ErrorCode::AssignmentNotFound => "Assignment not found",
            ErrorCode::AvailabilityNotFound => "Availability slot not found",
            ErrorCode::TimeOffNotFound => "Time-off request not found",
            ErrorCode::InvalidTimeRange => "Start must not be after end",
            ErrorCode::InvalidAssignmentTransition => "Action unavailable for the assignment's current status",

            // Messaging
            ErrorCode::EmailSendNotFound => "Email send not found",
            ErrorCode::RecipientSuppressed => "Recipient is suppressed",
            ErrorCode::EmailDeliveryFailed => "Email delivery failed",
            ErrorCode::QuoteNotFound => "Quote request not found",
            ErrorCode::QuoteAlreadyConverted => "Quote request was already converted",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",
            ErrorCode::ConfigError => "Configuration error",

            // Storage
            ErrorCode::StorageFull => "Storage full (disk space insufficient)",
            ErrorCode::OutOfMemory => "Out of memory",
            ErrorCode::StorageCorrupted => "Storage corrupted (data file damaged)",
            ErrorCode::SystemBusy => "System busy, please retry later",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::AlreadyExists),
            5 => Ok(ErrorCode::InvalidRequest),
            6 => Ok(ErrorCode::InvalidFormat),
            7 => Ok(ErrorCode::RequiredField),
            8 => Ok(ErrorCode::ValueOutOfRange),

            // Auth
            1001 => Ok(ErrorCode::NotAuthenticated),
            1003 => Ok(ErrorCode::TokenExpired),
            1004 => Ok(ErrorCode::TokenInvalid),
            1005 => Ok(ErrorCode::OrganizationRequired),

            // Permission
            2001 => Ok(ErrorCode::PermissionDenied),
            2002 => Ok(ErrorCode::RoleRequired),
            2003 => Ok(ErrorCode::AdminRequired),

            // Booking
            4001 => Ok(ErrorCode::BookingNotFound),
            4002 => Ok(ErrorCode::InvalidTransition),
            4003 => Ok(ErrorCode::BookingAmountRequired),
            4004 => Ok(ErrorCode::BookingClosed),

            // Payment
            5001 => Ok(ErrorCode::PaymentFailed),
            5002 => Ok(ErrorCode::ProcessorUnavailable),
            5003 => Ok(ErrorCode::CardDeclined),
            5004 => Ok(ErrorCode::PaymentRequiresAction),
            5005 => Ok(ErrorCode::PaymentInProgress),
            5006 => Ok(ErrorCode::NoSavedPaymentMethod),
            5007 => Ok(ErrorCode::WebhookSignatureInvalid),

            // Scheduling
            6001 => Ok(ErrorCode::CleanerNotFound),
            6002 => Ok(ErrorCode::DuplicateAssignment),
            6003 => Ok(ErrorCode::AssignmentNotFound),
            6004 => Ok(ErrorCode::AvailabilityNotFound),
            6005 => Ok(ErrorCode::TimeOffNotFound),
            6006 => Ok(ErrorCode::InvalidTimeRange),
            6007 => Ok(ErrorCode::InvalidAssignmentTransition),

            // Messaging
            7001 => Ok(ErrorCode::EmailSendNotFound),
            7002 => Ok(ErrorCode::RecipientSuppressed),
            7003 => Ok(ErrorCode::EmailDeliveryFailed),
            7101 => Ok(ErrorCode::QuoteNotFound),
            7102 => Ok(ErrorCode::QuoteAlreadyConverted),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),
            9005 => Ok(ErrorCode::ConfigError),

            // Storage
            9401 => Ok(ErrorCode::StorageFull),
            9402 => Ok(ErrorCode::OutOfMemory),
            9403 => Ok(ErrorCode::StorageCorrupted),
            9404 => Ok(ErrorCode::SystemBusy),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::ValidationFailed.code(), 2);
        assert_eq!(ErrorCode::BookingNotFound.code(), 4001);
        assert_eq!(ErrorCode::InvalidTransition.code(), 4002);
        assert_eq!(ErrorCode::CardDeclined.code(), 5003);
        assert_eq!(ErrorCode::DuplicateAssignment.code(), 6002);
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::Unknown.is_success());
        assert!(!ErrorCode::InternalError.is_success());
    }

    #[test]
    fn test_is_retryable() {
        assert!(ErrorCode::ProcessorUnavailable.is_retryable());
        assert!(ErrorCode::SystemBusy.is_retryable());
        assert!(!ErrorCode::CardDeclined.is_retryable());
        assert!(!ErrorCode::PaymentRequiresAction.is_retryable());
    }

    #[test]
    fn test_try_from_valid() {
        assert_eq!(ErrorCode::try_from(0), Ok(ErrorCode::Success));
        assert_eq!(ErrorCode::try_from(1001), Ok(ErrorCode::NotAuthenticated));
        assert_eq!(ErrorCode::try_from(4002), Ok(ErrorCode::InvalidTransition));
        assert_eq!(ErrorCode::try_from(5004), Ok(ErrorCode::PaymentRequiresAction));
        assert_eq!(ErrorCode::try_from(7102), Ok(ErrorCode::QuoteAlreadyConverted));
        assert_eq!(ErrorCode::try_from(9403), Ok(ErrorCode::StorageCorrupted));
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(999), Err(InvalidErrorCode(999)));
        assert_eq!(ErrorCode::try_from(3001), Err(InvalidErrorCode(3001)));
        assert_eq!(ErrorCode::try_from(10000), Err(InvalidErrorCode(10000)));
    }

    #[test]
    fn test_every_code_round_trips_through_u16() {
        let codes = [
            ErrorCode::Success,
            ErrorCode::OrganizationRequired,
            ErrorCode::AdminRequired,
            ErrorCode::BookingClosed,
            ErrorCode::WebhookSignatureInvalid,
            ErrorCode::InvalidAssignmentTransition,
            ErrorCode::EmailDeliveryFailed,
            ErrorCode::SystemBusy,
        ];
        for code in codes {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }

    #[test]
    fn test_serialize_as_number() {
        let json = serde_json::to_string(&ErrorCode::BookingNotFound).unwrap();
        assert_eq!(json, "4001");

        let code: ErrorCode = serde_json::from_str("5003").unwrap();
        assert_eq!(code, ErrorCode::CardDeclined);

        let result: Result<ErrorCode, _> = serde_json::from_str("999");
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ErrorCode::Success), "0");
        assert_eq!(format!("{}", ErrorCode::InvalidTransition), "4002");
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::NotFound.message(), "Resource not found");
        assert_eq!(ErrorCode::BookingNotFound.message(), "Booking not found");
        assert_eq!(
            ErrorCode::InvalidTransition.message(),
            "Action unavailable for the booking's current status"
        );
    }

    #[test]
    fn test_invalid_error_code_display() {
        let err = InvalidErrorCode(999);
        assert_eq!(format!("{}", err), "invalid error code: 999");
    }
}
