//! Audit log types
//!
//! Entries are append-only. Every admin override and every money-moving
//! lifecycle step leaves one.

use serde::{Deserialize, Serialize};

/// Audited operation (enum, not free text)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // ═══ Booking ═══
    BookingCreated,
    BookingCancelled,
    /// Status written outside the transition table
    BookingStatusOverride,
    BookingAmountChanged,

    // ═══ Payment ═══
    CardSaved,
    BookingCharged,
    ChargeFailed,
    ChargeRequiresAction,

    // ═══ Scheduling ═══
    CleanerAssigned,
    TimeOffReviewed,

    // ═══ Intake / email ═══
    QuoteConverted,
    RecipientSuppressed,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub organization_id: Option<String>,
    pub action: AuditAction,
    /// "booking", "assignment", "email", ...
    pub resource_type: String,
    pub resource_id: String,
    /// Subject id, or "system:<source>" for webhook-driven work
    pub actor_id: String,
    pub details: serde_json::Value,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub resource_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}
