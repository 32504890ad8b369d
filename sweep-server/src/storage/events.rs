//! Processed external events, sequence counters and the webhook failure log

use super::{
    PROCESSED_EVENTS_TABLE, SEQUENCES_TABLE, Storage, StorageResult, WEBHOOK_FAILURES_TABLE,
};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use shared::util::now_millis;

/// Inbound webhook rejected before it reached any handler logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookFailure {
    pub id: i64,
    /// "stripe", "intake", "ses"
    pub provider: String,
    pub endpoint: String,
    pub route_token: Option<String>,
    pub status_code: u16,
    pub reason: String,
    pub created_at: i64,
}

fn event_key(source: &str, event_id: &str) -> String {
    format!("{source}:{event_id}")
}

impl Storage {
    // ========== Event idempotency ==========

    pub fn is_event_processed_txn(
        &self,
        txn: &WriteTransaction,
        source: &str,
        event_id: &str,
    ) -> StorageResult<bool> {
        let table = txn.open_table(PROCESSED_EVENTS_TABLE)?;
        Ok(table.get(event_key(source, event_id).as_str())?.is_some())
    }

    /// Record an event id in the same transaction as its effect
    pub fn mark_event_processed(
        &self,
        txn: &WriteTransaction,
        source: &str,
        event_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PROCESSED_EVENTS_TABLE)?;
        table.insert(event_key(source, event_id).as_str(), now_millis())?;
        Ok(())
    }

    // ========== Sequences ==========

    /// Increment and return the counter (first value is 1)
    pub fn next_sequence(&self, txn: &WriteTransaction, key: &str) -> StorageResult<u64> {
        let mut table = txn.open_table(SEQUENCES_TABLE)?;
        let current = table.get(key)?.map(|guard| guard.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(key, next)?;
        Ok(next)
    }

    // ========== Webhook failures ==========

    /// Own transaction: a failure row must not depend on any other write
    pub fn record_webhook_failure(&self, failure: &WebhookFailure) -> StorageResult<()> {
        let txn = self.begin_write()?;
        self.save(&txn, WEBHOOK_FAILURES_TABLE, failure.id, failure)?;
        txn.commit()?;
        Ok(())
    }

    /// Newest first
    pub fn list_webhook_failures(&self, limit: usize) -> StorageResult<Vec<WebhookFailure>> {
        let mut rows: Vec<WebhookFailure> = self.scan(WEBHOOK_FAILURES_TABLE)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }
}
