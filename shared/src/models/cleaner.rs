//! Cleaner, weekly availability and time-off models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanerStatus {
    #[default]
    Active,
    Inactive,
}

/// Cleaner (staff member who can be assigned to bookings)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cleaner {
    pub id: i64,
    pub organization_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: CleanerStatus,
    /// Identity-provider subject, lets a cleaner act on their own assignments
    pub user_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanerCreate {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanerUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub status: Option<CleanerStatus>,
    pub user_id: Option<String>,
}

/// Weekly recurring availability window
///
/// `day_of_week` is 0 = Sunday .. 6 = Saturday. Times are local "HH:MM".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: i64,
    pub organization_id: String,
    pub cleaner_id: i64,
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySlotInput {
    pub day_of_week: u8,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeOffStatus {
    #[default]
    Pending,
    Approved,
    Denied,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeOffRequest {
    pub id: i64,
    pub organization_id: String,
    pub cleaner_id: i64,
    /// Inclusive
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub status: TimeOffStatus,
    pub reason: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TimeOffRequest {
    /// Inclusive range check
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Only approved time off removes a cleaner from matching
    pub fn blocks(&self, date: NaiveDate) -> bool {
        self.status == TimeOffStatus::Approved && self.covers(date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeOffCreate {
    pub cleaner_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
}

/// Time-off review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOffDecision {
    Approve,
    Deny,
}

/// One row of the "who can work on this date" answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableCleaner {
    pub cleaner: Cleaner,
    pub start_time: String,
    pub end_time: String,
    /// Active assignments already on this date (display only)
    pub assignment_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time_off(start: &str, end: &str, status: TimeOffStatus) -> TimeOffRequest {
        TimeOffRequest {
            id: 1,
            organization_id: "org".into(),
            cleaner_id: 1,
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
            status,
            reason: None,
            reviewed_by: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn covers_is_inclusive() {
        let t = time_off("2026-03-02", "2026-03-04", TimeOffStatus::Approved);
        assert!(t.covers("2026-03-02".parse().unwrap()));
        assert!(t.covers("2026-03-03".parse().unwrap()));
        assert!(t.covers("2026-03-04".parse().unwrap()));
        assert!(!t.covers("2026-03-01".parse().unwrap()));
        assert!(!t.covers("2026-03-05".parse().unwrap()));
    }

    #[test]
    fn only_approved_blocks() {
        let date = "2026-03-03".parse().unwrap();
        assert!(time_off("2026-03-03", "2026-03-03", TimeOffStatus::Approved).blocks(date));
        for status in [
            TimeOffStatus::Pending,
            TimeOffStatus::Denied,
            TimeOffStatus::Cancelled,
        ] {
            assert!(!time_off("2026-03-03", "2026-03-03", status).blocks(date));
        }
    }
}
