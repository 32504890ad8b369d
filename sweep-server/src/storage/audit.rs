//! Append-only audit log

use super::{AUDIT_LOG_TABLE, Storage, StorageResult};
use redb::WriteTransaction;
use shared::models::{AuditAction, AuditEntry};
use shared::util::{now_millis, snowflake_id};

impl Storage {
    /// Append an entry inside the caller's transaction, so the entry commits
    /// (or rolls back) together with the change it records.
    #[allow(clippy::too_many_arguments)]
    pub fn append_audit(
        &self,
        txn: &WriteTransaction,
        organization_id: Option<&str>,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        actor_id: &str,
        details: serde_json::Value,
    ) -> StorageResult<AuditEntry> {
        let entry = AuditEntry {
            id: snowflake_id(),
            organization_id: organization_id.map(String::from),
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            actor_id: actor_id.to_string(),
            details,
            created_at: now_millis(),
        };
        self.save(txn, AUDIT_LOG_TABLE, entry.id, &entry)?;
        Ok(entry)
    }

    /// Newest first
    pub fn list_audit(
        &self,
        organization_id: Option<&str>,
        action: Option<AuditAction>,
        resource_id: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .scan::<AuditEntry>(AUDIT_LOG_TABLE)?
            .into_iter()
            .filter(|e| organization_id.is_none_or(|org| e.organization_id.as_deref() == Some(org)))
            .filter(|e| action.is_none_or(|a| e.action == a))
            .filter(|e| resource_id.is_none_or(|id| e.resource_id == id))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }
}
