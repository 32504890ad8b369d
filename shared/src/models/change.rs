//! Change notifications published after a commit

use serde::{Deserialize, Serialize};

/// Something changed; subscribers re-query for the new snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Booking {
        organization_id: String,
        booking_id: i64,
        status: super::BookingStatus,
    },
    Assignment {
        organization_id: String,
        booking_id: i64,
        assignment_id: i64,
    },
    Cleaner {
        organization_id: String,
        cleaner_id: i64,
    },
    Quote {
        organization_id: String,
        quote_id: i64,
    },
    EmailSend {
        organization_id: Option<String>,
        send_id: i64,
    },
}

impl ChangeEvent {
    pub fn organization_id(&self) -> Option<&str> {
        match self {
            Self::Booking { organization_id, .. }
            | Self::Assignment { organization_id, .. }
            | Self::Cleaner { organization_id, .. }
            | Self::Quote { organization_id, .. } => Some(organization_id),
            Self::EmailSend { organization_id, .. } => organization_id.as_deref(),
        }
    }
}
