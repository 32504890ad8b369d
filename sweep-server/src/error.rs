//! Service-layer errors

use crate::storage::StorageError;
use shared::error::{AppError, ErrorCode};
use shared::models::{AssignmentStatus, BookingStatus};
use std::fmt;
use thiserror::Error;

/// Kind of row a lookup failed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Booking,
    Cleaner,
    Assignment,
    AvailabilitySlot,
    TimeOff,
    EmailSend,
    Quote,
    PaymentAttempt,
}

impl Resource {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Booking => ErrorCode::BookingNotFound,
            Self::Cleaner => ErrorCode::CleanerNotFound,
            Self::Assignment => ErrorCode::AssignmentNotFound,
            Self::AvailabilitySlot => ErrorCode::AvailabilityNotFound,
            Self::TimeOff => ErrorCode::TimeOffNotFound,
            Self::EmailSend => ErrorCode::EmailSendNotFound,
            Self::Quote => ErrorCode::QuoteNotFound,
            Self::PaymentAttempt => ErrorCode::NotFound,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Booking => "Booking",
            Self::Cleaner => "Cleaner",
            Self::Assignment => "Assignment",
            Self::AvailabilitySlot => "Availability slot",
            Self::TimeOff => "Time-off request",
            Self::EmailSend => "Email send",
            Self::Quote => "Quote request",
            Self::PaymentAttempt => "Payment attempt",
        };
        f.write_str(name)
    }
}

/// Errors returned by the booking, payment, scheduling and ingestion services
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Validation(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: Resource, id: String },

    #[error("Booking {booking_id} cannot move from {from} to {to}")]
    InvalidTransition {
        booking_id: i64,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking {0} has no amount")]
    AmountRequired(i64),

    #[error("Booking {0} has no saved payment method")]
    NoSavedPaymentMethod(i64),

    #[error("A charge for booking {0} is already in progress")]
    PaymentInProgress(i64),

    #[error("Payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    #[error("Card declined: {message}")]
    CardDeclined {
        booking_id: i64,
        message: String,
        decline_code: Option<String>,
    },

    #[error("Payment for booking {booking_id} requires customer action")]
    RequiresAction {
        booking_id: i64,
        payment_intent_id: String,
        client_secret: Option<String>,
    },

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Cleaner {cleaner_id} is already assigned to booking {booking_id}")]
    DuplicateAssignment { booking_id: i64, cleaner_id: i64 },

    #[error("Assignment {assignment_id} cannot move from {from:?} to {to:?}")]
    InvalidAssignmentTransition {
        assignment_id: i64,
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Booking {0} is charged or cancelled")]
    BookingClosed(i64),

    #[error("Quote {0} was already converted")]
    QuoteAlreadyConverted(i64),

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Email provider error: {0}")]
    Mailer(String),

    #[error("{0}")]
    Forbidden(#[from] AppError),
}

impl SweepError {
    pub fn not_found(resource: Resource, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Errors the caller may retry unchanged
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProcessorUnavailable(_) => true,
            Self::Storage(e) => classify_storage_error(e) == ErrorCode::SystemBusy,
            _ => false,
        }
    }
}

pub type SweepResult<T> = Result<T, SweepError>;

// Lets services use `?` directly on redb transaction calls
macro_rules! storage_error_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SweepError {
            fn from(err: $ty) -> Self {
                Self::Storage(StorageError::from(err))
            }
        })*
    };
}

storage_error_from!(
    redb::TransactionError,
    redb::CommitError,
    redb::TableError,
    redb::StorageError
);

/// Map a storage error onto a code (clients localize by code)
fn classify_storage_error(e: &StorageError) -> ErrorCode {
    if let StorageError::Serialization(_) = e {
        return ErrorCode::InternalError;
    }

    // redb errors are classified by message
    let err_str = e.to_string().to_lowercase();

    if err_str.contains("no space") || err_str.contains("disk full") || err_str.contains("enospc")
    {
        return ErrorCode::StorageFull;
    }

    if err_str.contains("out of memory") || err_str.contains("cannot allocate") {
        return ErrorCode::OutOfMemory;
    }

    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        return ErrorCode::StorageCorrupted;
    }

    ErrorCode::SystemBusy
}

impl From<SweepError> for AppError {
    fn from(err: SweepError) -> Self {
        match err {
            SweepError::Storage(e) => {
                let code = classify_storage_error(&e);
                tracing::error!(error = %e, error_code = ?code, "Storage error occurred");
                AppError::with_message(code, e.to_string())
            }
            SweepError::Validation(msg) => AppError::validation(msg),
            SweepError::NotFound { resource, id } => {
                AppError::with_message(resource.code(), format!("{resource} not found"))
                    .with_detail("id", id)
            }
            SweepError::InvalidTransition {
                booking_id,
                from,
                to,
            } => AppError::new(ErrorCode::InvalidTransition)
                .with_detail("booking_id", booking_id)
                .with_detail("from", from.as_str())
                .with_detail("to", to.as_str()),
            SweepError::AmountRequired(id) => {
                AppError::new(ErrorCode::BookingAmountRequired).with_detail("booking_id", id)
            }
            SweepError::NoSavedPaymentMethod(id) => {
                AppError::new(ErrorCode::NoSavedPaymentMethod).with_detail("booking_id", id)
            }
            SweepError::PaymentInProgress(id) => {
                AppError::new(ErrorCode::PaymentInProgress).with_detail("booking_id", id)
            }
            SweepError::ProcessorUnavailable(msg) => {
                tracing::warn!(error = %msg, "Payment processor unavailable");
                AppError::new(ErrorCode::ProcessorUnavailable)
            }
            SweepError::CardDeclined {
                booking_id,
                message,
                decline_code,
            } => {
                let mut err = AppError::with_message(ErrorCode::CardDeclined, message)
                    .with_detail("booking_id", booking_id);
                if let Some(code) = decline_code {
                    err = err.with_detail("decline_code", code);
                }
                err
            }
            SweepError::RequiresAction {
                booking_id,
                payment_intent_id,
                client_secret,
            } => {
                let mut err = AppError::new(ErrorCode::PaymentRequiresAction)
                    .with_detail("booking_id", booking_id)
                    .with_detail("payment_intent_id", payment_intent_id);
                if let Some(secret) = client_secret {
                    err = err.with_detail("client_secret", secret);
                }
                err
            }
            SweepError::PaymentFailed(msg) => AppError::with_message(ErrorCode::PaymentFailed, msg),
            SweepError::DuplicateAssignment {
                booking_id,
                cleaner_id,
            } => AppError::new(ErrorCode::DuplicateAssignment)
                .with_detail("booking_id", booking_id)
                .with_detail("cleaner_id", cleaner_id),
            SweepError::InvalidAssignmentTransition {
                assignment_id,
                from,
                to,
            } => AppError::new(ErrorCode::InvalidAssignmentTransition)
                .with_detail("assignment_id", assignment_id)
                .with_detail("from", format!("{from:?}"))
                .with_detail("to", format!("{to:?}")),
            SweepError::InvalidTimeRange(msg) => {
                AppError::with_message(ErrorCode::InvalidTimeRange, msg)
            }
            SweepError::BookingClosed(id) => {
                AppError::new(ErrorCode::BookingClosed).with_detail("booking_id", id)
            }
            SweepError::QuoteAlreadyConverted(id) => {
                AppError::new(ErrorCode::QuoteAlreadyConverted).with_detail("quote_id", id)
            }
            SweepError::InvalidSignature(msg) => {
                AppError::with_message(ErrorCode::WebhookSignatureInvalid, msg)
            }
            SweepError::Mailer(msg) => AppError::with_message(ErrorCode::EmailDeliveryFailed, msg),
            SweepError::Forbidden(err) => err,
        }
    }
}
