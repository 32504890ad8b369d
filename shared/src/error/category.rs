//! Error category classification

use super::codes::ErrorCode;
use serde::{Deserialize, Serialize};

/// Error category classification based on error code ranges
///
/// Categories are determined by the leading digit of the error code:
/// - 0xxx: General errors
/// - 1xxx: Authentication errors
/// - 2xxx: Permission errors
/// - 4xxx: Booking errors
/// - 5xxx: Payment errors
/// - 6xxx: Scheduling errors
/// - 7xxx: Messaging errors
/// - 9xxx: System errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// General errors (0xxx)
    General,
    /// Authentication errors (1xxx)
    Auth,
    /// Permission errors (2xxx)
    Permission,
    /// Booking errors (4xxx)
    Booking,
    /// Payment errors (5xxx)
    Payment,
    /// Scheduling errors (6xxx)
    Scheduling,
    /// Messaging and intake errors (7xxx)
    Messaging,
    /// System errors (9xxx)
    System,
}

impl ErrorCategory {
    /// Determine category from error code value
    ///
    /// Unassigned ranges (3xxx, 8xxx) fall back to `General`.
    pub fn from_code(code: u16) -> Self {
        match code {
            1000..2000 => Self::Auth,
            2000..3000 => Self::Permission,
            4000..5000 => Self::Booking,
            5000..6000 => Self::Payment,
            6000..7000 => Self::Scheduling,
            7000..8000 => Self::Messaging,
            9000.. => Self::System,
            _ => Self::General,
        }
    }

    /// Get the string name for this category
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Auth => "auth",
            Self::Permission => "permission",
            Self::Booking => "booking",
            Self::Payment => "payment",
            Self::Scheduling => "scheduling",
            Self::Messaging => "messaging",
            Self::System => "system",
        }
    }
}

impl ErrorCode {
    /// Get the category for this error code
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::from_code(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_code() {
        assert_eq!(ErrorCategory::from_code(0), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(999), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(1001), ErrorCategory::Auth);
        assert_eq!(ErrorCategory::from_code(2001), ErrorCategory::Permission);
        assert_eq!(ErrorCategory::from_code(3001), ErrorCategory::General);
        assert_eq!(ErrorCategory::from_code(4001), ErrorCategory::Booking);
        assert_eq!(ErrorCategory::from_code(5001), ErrorCategory::Payment);
        assert_eq!(ErrorCategory::from_code(6001), ErrorCategory::Scheduling);
        assert_eq!(ErrorCategory::from_code(7101), ErrorCategory::Messaging);
        assert_eq!(ErrorCategory::from_code(9001), ErrorCategory::System);
        assert_eq!(ErrorCategory::from_code(10000), ErrorCategory::System);
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::Success.category(), ErrorCategory::General);
        assert_eq!(ErrorCode::TokenExpired.category(), ErrorCategory::Auth);
        assert_eq!(
            ErrorCode::AdminRequired.category(),
            ErrorCategory::Permission
        );
        assert_eq!(
            ErrorCode::InvalidTransition.category(),
            ErrorCategory::Booking
        );
        assert_eq!(ErrorCode::CardDeclined.category(), ErrorCategory::Payment);
        assert_eq!(
            ErrorCode::DuplicateAssignment.category(),
            ErrorCategory::Scheduling
        );
        assert_eq!(
            ErrorCode::RecipientSuppressed.category(),
            ErrorCategory::Messaging
        );
        assert_eq!(ErrorCode::StorageFull.category(), ErrorCategory::System);
    }

    #[test]
    fn test_category_serialize() {
        let json = serde_json::to_string(&ErrorCategory::Scheduling).unwrap();
        assert_eq!(json, "\"scheduling\"");

        let category: ErrorCategory = serde_json::from_str("\"booking\"").unwrap();
        assert_eq!(category, ErrorCategory::Booking);
    }
}
