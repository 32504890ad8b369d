//! Quote requests created by the intake form webhook

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    New,
    Converted,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub id: i64,
    pub organization_id: String,
    /// Human-facing number, e.g. "Q-000123"
    pub quote_number: String,
    /// Intake provider response id (dedupe key)
    pub external_response_id: String,
    pub email: Option<String>,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub service_type: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// Every submitted field, label → value
    pub raw_fields: serde_json::Value,
    pub status: QuoteStatus,
    pub booking_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Extra data supplied when converting a quote into a booking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteConversion {
    pub amount: Option<i64>,
    pub service_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Format a sequence value as a quote number
pub fn format_quote_number(value: u64) -> String {
    format!("Q-{value:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_number_is_zero_padded() {
        assert_eq!(format_quote_number(1), "Q-000001");
        assert_eq!(format_quote_number(123), "Q-000123");
        assert_eq!(format_quote_number(1_234_567), "Q-1234567");
    }
}
