//! redb-based storage layer
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `bookings` | `booking_id` | `Booking` | Booking rows |
//! | `booking_refs` | `"cs:…"`, `"seti:…"`, `"pi:…"`, `"resp:…"` | `booking_id` | Processor / intake id index |
//! | `payment_attempts` | `attempt_id` | `PaymentAttempt` | One row per processor attempt |
//! | `attempts_by_booking` | `(booking_id, attempt_id)` | `()` | Attempt index |
//! | `cleaners` | `cleaner_id` | `Cleaner` | Staff |
//! | `availability` | `slot_id` | `AvailabilitySlot` | Weekly slots (history kept) |
//! | `active_slots` | `(cleaner_id, weekday)` | `slot_id` | At most one active slot per weekday |
//! | `time_off` | `request_id` | `TimeOffRequest` | Time-off requests |
//! | `assignments` | `assignment_id` | `Assignment` | Cleaner ↔ booking |
//! | `assignments_by_booking` | `(booking_id, assignment_id)` | `()` | Assignment index |
//! | `email_sends` | `send_id` | `EmailSend` | Outbound mail |
//! | `email_send_keys` | idempotency key | `send_id` | Unique idempotency keys |
//! | `email_send_messages` | provider message id | `send_id` | Provider event lookup |
//! | `suppressions` | normalized email | `EmailSuppression` | Never-email list |
//! | `quotes` | `quote_id` | `QuoteRequest` | Intake submissions |
//! | `quote_refs` | `"{org}:{response_id}"` | `quote_id` | Intake dedupe |
//! | `sequences` | key | `u64` | Human-facing counters |
//! | `audit_log` | `entry_id` | `AuditEntry` | Append-only audit |
//! | `processed_events` | `"{source}:{event_id}"` | processed at | Webhook dedupe |
//! | `webhook_failures` | `failure_id` | `WebhookFailure` | Rejected webhook log |
//!
//! Every mutation runs inside one write transaction. redb serializes
//! writers, so re-reading a row inside the transaction makes check-then-act
//! atomic without extra locking.

mod audit;
mod bookings;
mod email;
mod events;
mod payments;
mod quotes;
mod scheduling;

pub use bookings::BookingRef;
pub use events::WebhookFailure;
pub use scheduling::AvailabilitySnapshot;

use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

type JsonTable = TableDefinition<'static, i64, &'static [u8]>;

pub(crate) const BOOKINGS_TABLE: JsonTable = TableDefinition::new("bookings");
pub(crate) const BOOKING_REFS_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("booking_refs");
pub(crate) const PAYMENT_ATTEMPTS_TABLE: JsonTable = TableDefinition::new("payment_attempts");
pub(crate) const ATTEMPTS_BY_BOOKING_TABLE: TableDefinition<(i64, i64), ()> =
    TableDefinition::new("attempts_by_booking");
pub(crate) const CLEANERS_TABLE: JsonTable = TableDefinition::new("cleaners");
pub(crate) const AVAILABILITY_TABLE: JsonTable = TableDefinition::new("availability");
pub(crate) const ACTIVE_SLOTS_TABLE: TableDefinition<(i64, u8), i64> =
    TableDefinition::new("active_slots");
pub(crate) const TIME_OFF_TABLE: JsonTable = TableDefinition::new("time_off");
pub(crate) const ASSIGNMENTS_TABLE: JsonTable = TableDefinition::new("assignments");
pub(crate) const ASSIGNMENTS_BY_BOOKING_TABLE: TableDefinition<(i64, i64), ()> =
    TableDefinition::new("assignments_by_booking");
pub(crate) const EMAIL_SENDS_TABLE: JsonTable = TableDefinition::new("email_sends");
pub(crate) const EMAIL_SEND_KEYS_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("email_send_keys");
pub(crate) const EMAIL_SEND_MESSAGES_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("email_send_messages");
pub(crate) const SUPPRESSIONS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("suppressions");
pub(crate) const QUOTES_TABLE: JsonTable = TableDefinition::new("quotes");
pub(crate) const QUOTE_REFS_TABLE: TableDefinition<&str, i64> = TableDefinition::new("quote_refs");
pub(crate) const SEQUENCES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequences");
pub(crate) const AUDIT_LOG_TABLE: JsonTable = TableDefinition::new("audit_log");
pub(crate) const PROCESSED_EVENTS_TABLE: TableDefinition<&str, i64> =
    TableDefinition::new("processed_events");
pub(crate) const WEBHOOK_FAILURES_TABLE: JsonTable = TableDefinition::new("webhook_failures");

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Storage backed by redb
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create the database at the given path
    ///
    /// redb commits with `Durability::Immediate`: once `commit()` returns the
    /// write survives a crash.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BOOKINGS_TABLE)?;
            let _ = write_txn.open_table(BOOKING_REFS_TABLE)?;
            let _ = write_txn.open_table(PAYMENT_ATTEMPTS_TABLE)?;
            let _ = write_txn.open_table(ATTEMPTS_BY_BOOKING_TABLE)?;
            let _ = write_txn.open_table(CLEANERS_TABLE)?;
            let _ = write_txn.open_table(AVAILABILITY_TABLE)?;
            let _ = write_txn.open_table(ACTIVE_SLOTS_TABLE)?;
            let _ = write_txn.open_table(TIME_OFF_TABLE)?;
            let _ = write_txn.open_table(ASSIGNMENTS_TABLE)?;
            let _ = write_txn.open_table(ASSIGNMENTS_BY_BOOKING_TABLE)?;
            let _ = write_txn.open_table(EMAIL_SENDS_TABLE)?;
            let _ = write_txn.open_table(EMAIL_SEND_KEYS_TABLE)?;
            let _ = write_txn.open_table(EMAIL_SEND_MESSAGES_TABLE)?;
            let _ = write_txn.open_table(SUPPRESSIONS_TABLE)?;
            let _ = write_txn.open_table(QUOTES_TABLE)?;
            let _ = write_txn.open_table(QUOTE_REFS_TABLE)?;
            let _ = write_txn.open_table(SEQUENCES_TABLE)?;
            let _ = write_txn.open_table(AUDIT_LOG_TABLE)?;
            let _ = write_txn.open_table(PROCESSED_EVENTS_TABLE)?;
            let _ = write_txn.open_table(WEBHOOK_FAILURES_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Begin a read transaction (consistent snapshot)
    pub fn begin_read(&self) -> StorageResult<redb::ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    // ========== JSON row helpers ==========

    pub(crate) fn load<T: DeserializeOwned>(&self, def: JsonTable, id: i64) -> StorageResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(def)?;
        read_row(&table, id)
    }

    pub(crate) fn load_txn<T: DeserializeOwned>(
        &self,
        txn: &WriteTransaction,
        def: JsonTable,
        id: i64,
    ) -> StorageResult<Option<T>> {
        let table = txn.open_table(def)?;
        read_row(&table, id)
    }

    pub(crate) fn save<T: Serialize>(
        &self,
        txn: &WriteTransaction,
        def: JsonTable,
        id: i64,
        row: &T,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(def)?;
        let value = serde_json::to_vec(row)?;
        table.insert(id, value.as_slice())?;
        Ok(())
    }

    pub(crate) fn scan<T: DeserializeOwned>(&self, def: JsonTable) -> StorageResult<Vec<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(def)?;
        scan_rows(&table)
    }

    pub(crate) fn scan_txn<T: DeserializeOwned>(
        &self,
        txn: &WriteTransaction,
        def: JsonTable,
    ) -> StorageResult<Vec<T>> {
        let table = txn.open_table(def)?;
        scan_rows(&table)
    }
}

pub(crate) fn read_row<T: DeserializeOwned>(
    table: &impl ReadableTable<i64, &'static [u8]>,
    id: i64,
) -> StorageResult<Option<T>> {
    match table.get(id)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn scan_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<i64, &'static [u8]>,
) -> StorageResult<Vec<T>> {
    let mut rows = Vec::new();
    for result in table.iter()? {
        let (_key, value) = result?;
        rows.push(serde_json::from_slice(value.value())?);
    }
    Ok(rows)
}

/// Ids under one parent in a `(parent_id, child_id) → ()` index
pub(crate) fn child_ids(
    table: &impl ReadableTable<(i64, i64), ()>,
    parent_id: i64,
) -> StorageResult<Vec<i64>> {
    let mut ids = Vec::new();
    for result in table.range((parent_id, i64::MIN)..=(parent_id, i64::MAX))? {
        let (key, _value) = result?;
        ids.push(key.value().1);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::AuditAction;

    #[test]
    fn open_on_disk_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sweep.redb");

        {
            let storage = Storage::open(&path).unwrap();
            let txn = storage.begin_write().unwrap();
            storage
                .append_audit(
                    &txn,
                    Some("org_1"),
                    AuditAction::BookingCreated,
                    "booking",
                    "1",
                    "user_1",
                    serde_json::json!({}),
                )
                .unwrap();
            txn.commit().unwrap();
        }

        let storage = Storage::open(&path).unwrap();
        let entries = storage.list_audit(Some("org_1"), None, None, 10).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn uncommitted_write_is_invisible() {
        let storage = Storage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage
            .append_audit(
                &txn,
                None,
                AuditAction::BookingCreated,
                "booking",
                "1",
                "user_1",
                serde_json::json!({}),
            )
            .unwrap();
        drop(txn);

        assert!(storage.list_audit(None, None, None, 10).unwrap().is_empty());
    }
}
