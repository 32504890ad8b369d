//! Booking assignment (cleaner ↔ booking)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentRole {
    #[default]
    Primary,
    Secondary,
    Trainee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Declined,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Declined and cancelled assignments no longer hold the slot
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Declined | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted | Declined | Confirmed | Cancelled)
                | (Accepted, Confirmed | Declined | InProgress | Cancelled)
                | (Confirmed, InProgress | Cancelled)
                | (InProgress, Completed | Cancelled)
        )
    }
}

/// Action a cleaner or dispatcher takes on an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentAction {
    Accept,
    Decline,
    Confirm,
    ClockIn,
    ClockOut,
    Cancel,
}

impl AssignmentAction {
    pub const fn target(&self) -> AssignmentStatus {
        match self {
            Self::Accept => AssignmentStatus::Accepted,
            Self::Decline => AssignmentStatus::Declined,
            Self::Confirm => AssignmentStatus::Confirmed,
            Self::ClockIn => AssignmentStatus::InProgress,
            Self::ClockOut => AssignmentStatus::Completed,
            Self::Cancel => AssignmentStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub organization_id: String,
    pub booking_id: i64,
    pub cleaner_id: i64,
    pub role: AssignmentRole,
    pub status: AssignmentStatus,
    /// Copied from the booking, drives per-date load counts
    pub service_date: Option<NaiveDate>,
    pub assigned_by: String,
    pub assigned_at: i64,
    pub clock_in_at: Option<i64>,
    pub clock_out_at: Option<i64>,
    pub actual_duration_minutes: Option<i64>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentCreate {
    pub cleaner_id: i64,
    #[serde(default)]
    pub role: AssignmentRole,
    /// Sets the booking's service date when it has none yet
    pub service_date: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use AssignmentStatus::*;

    #[test]
    fn active_excludes_declined_and_cancelled() {
        assert!(Pending.is_active());
        assert!(Confirmed.is_active());
        assert!(Completed.is_active());
        assert!(!Declined.is_active());
        assert!(!Cancelled.is_active());
    }

    #[test]
    fn clock_in_requires_acceptance() {
        assert!(!Pending.can_transition_to(InProgress));
        assert!(Accepted.can_transition_to(InProgress));
        assert!(Confirmed.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
    }

    #[test]
    fn closed_assignments_are_frozen() {
        for next in [Pending, Accepted, Confirmed, InProgress, Completed, Cancelled] {
            assert!(!Declined.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
            assert!(!Completed.can_transition_to(next));
        }
    }

    #[test]
    fn action_targets() {
        assert_eq!(AssignmentAction::ClockIn.target(), InProgress);
        assert_eq!(AssignmentAction::ClockOut.target(), Completed);
        assert_eq!(AssignmentAction::Decline.target(), Declined);
    }
}
