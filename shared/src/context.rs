//! Request-scoped identity
//!
//! Built from identity-provider claims (HTTP) or explicitly for
//! webhook-driven work, then passed into every service call.

use crate::error::{AppError, ErrorCode};
use serde::{Deserialize, Serialize};

/// Organization role from the identity provider's `org_role` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Admin,
    Dispatcher,
    Cleaner,
    Member,
}

impl Role {
    /// Parse a claim like `"org:admin"` or `"admin"`. Unknown roles get the
    /// least privilege.
    pub fn from_claim(claim: &str) -> Self {
        let name = claim.trim();
        let name = name.strip_prefix("org:").unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "owner" => Self::Owner,
            "admin" => Self::Admin,
            "dispatcher" => Self::Dispatcher,
            "cleaner" => Self::Cleaner,
            _ => Self::Member,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Opaque subject id, or `system:<source>`
    pub subject_id: String,
    pub organization_id: String,
    pub role: Role,
}

const SYSTEM_PREFIX: &str = "system:";

impl RequestContext {
    pub fn new(subject_id: impl Into<String>, organization_id: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            organization_id: organization_id.into(),
            role,
        }
    }

    /// Context for work triggered by an external system (webhooks).
    pub fn system(organization_id: impl Into<String>, source: &str) -> Self {
        Self::new(format!("{SYSTEM_PREFIX}{source}"), organization_id, Role::Owner)
    }

    pub fn is_system(&self) -> bool {
        self.subject_id.starts_with(SYSTEM_PREFIX)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Owner | Role::Admin)
    }

    pub fn is_dispatcher(&self) -> bool {
        self.is_admin() || self.role == Role::Dispatcher
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::new(ErrorCode::AdminRequired))
        }
    }

    pub fn require_dispatcher(&self) -> Result<(), AppError> {
        if self.is_dispatcher() {
            Ok(())
        } else {
            Err(AppError::with_message(
                ErrorCode::RoleRequired,
                "Dispatcher role is required",
            ))
        }
    }

    /// Field staff or anyone who dispatches them
    pub fn require_staff(&self) -> Result<(), AppError> {
        if self.is_dispatcher() || self.role == Role::Cleaner {
            Ok(())
        } else {
            Err(AppError::with_message(
                ErrorCode::RoleRequired,
                "Cleaner or dispatcher role is required",
            ))
        }
    }

    /// Rows from other organizations are invisible
    pub fn can_see(&self, organization_id: &str) -> bool {
        self.organization_id == organization_id
    }
}
