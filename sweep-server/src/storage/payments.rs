//! Payment attempt rows

use super::{
    ATTEMPTS_BY_BOOKING_TABLE, PAYMENT_ATTEMPTS_TABLE, Storage, StorageResult, child_ids,
    read_row,
};
use redb::WriteTransaction;
use shared::models::PaymentAttempt;

impl Storage {
    pub fn get_attempt_txn(
        &self,
        txn: &WriteTransaction,
        id: i64,
    ) -> StorageResult<Option<PaymentAttempt>> {
        self.load_txn(txn, PAYMENT_ATTEMPTS_TABLE, id)
    }

    pub fn put_attempt(&self, txn: &WriteTransaction, attempt: &PaymentAttempt) -> StorageResult<()> {
        self.save(txn, PAYMENT_ATTEMPTS_TABLE, attempt.id, attempt)?;
        let mut index = txn.open_table(ATTEMPTS_BY_BOOKING_TABLE)?;
        index.insert((attempt.booking_id, attempt.id), ())?;
        Ok(())
    }

    /// Attempts of one booking, oldest first
    pub fn list_attempts(&self, booking_id: i64) -> StorageResult<Vec<PaymentAttempt>> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(ATTEMPTS_BY_BOOKING_TABLE)?;
        let table = read_txn.open_table(PAYMENT_ATTEMPTS_TABLE)?;
        let mut attempts = Vec::new();
        for id in child_ids(&index, booking_id)? {
            if let Some(attempt) = read_row::<PaymentAttempt>(&table, id)? {
                attempts.push(attempt);
            }
        }
        attempts.sort_by_key(|a| (a.created_at, a.id));
        Ok(attempts)
    }

    pub fn list_attempts_txn(
        &self,
        txn: &WriteTransaction,
        booking_id: i64,
    ) -> StorageResult<Vec<PaymentAttempt>> {
        let ids = {
            let index = txn.open_table(ATTEMPTS_BY_BOOKING_TABLE)?;
            child_ids(&index, booking_id)?
        };
        let table = txn.open_table(PAYMENT_ATTEMPTS_TABLE)?;
        let mut attempts = Vec::new();
        for id in ids {
            if let Some(attempt) = read_row::<PaymentAttempt>(&table, id)? {
                attempts.push(attempt);
            }
        }
        attempts.sort_by_key(|a| (a.created_at, a.id));
        Ok(attempts)
    }

    /// Attempt of a booking that tracks the given processor object
    pub fn find_attempt_by_ref_txn(
        &self,
        txn: &WriteTransaction,
        booking_id: i64,
        processor_ref: &str,
    ) -> StorageResult<Option<PaymentAttempt>> {
        Ok(self
            .list_attempts_txn(txn, booking_id)?
            .into_iter()
            .find(|a| a.processor_ref.as_deref() == Some(processor_ref)))
    }
}
