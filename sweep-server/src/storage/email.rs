//! Email send records and the suppression list

use super::{
    EMAIL_SEND_KEYS_TABLE, EMAIL_SEND_MESSAGES_TABLE, EMAIL_SENDS_TABLE, SUPPRESSIONS_TABLE,
    Storage, StorageResult,
};
use redb::{ReadableTable, WriteTransaction};
use shared::models::{EmailSend, EmailSuppression};

impl Storage {
    pub fn get_email_send(&self, id: i64) -> StorageResult<Option<EmailSend>> {
        self.load(EMAIL_SENDS_TABLE, id)
    }

    pub fn get_email_send_txn(
        &self,
        txn: &WriteTransaction,
        id: i64,
    ) -> StorageResult<Option<EmailSend>> {
        self.load_txn(txn, EMAIL_SENDS_TABLE, id)
    }

    /// Write a send row and index its idempotency key and provider message id
    pub fn put_email_send(&self, txn: &WriteTransaction, send: &EmailSend) -> StorageResult<()> {
        self.save(txn, EMAIL_SENDS_TABLE, send.id, send)?;
        {
            let mut keys = txn.open_table(EMAIL_SEND_KEYS_TABLE)?;
            keys.insert(send.idempotency_key.as_str(), send.id)?;
        }
        if let Some(message_id) = send.provider_message_id.as_deref() {
            let mut messages = txn.open_table(EMAIL_SEND_MESSAGES_TABLE)?;
            messages.insert(message_id, send.id)?;
        }
        Ok(())
    }

    pub fn find_email_send_by_key_txn(
        &self,
        txn: &WriteTransaction,
        idempotency_key: &str,
    ) -> StorageResult<Option<EmailSend>> {
        let id = {
            let keys = txn.open_table(EMAIL_SEND_KEYS_TABLE)?;
            keys.get(idempotency_key)?.map(|g| g.value())
        };
        match id {
            Some(id) => self.get_email_send_txn(txn, id),
            None => Ok(None),
        }
    }

    pub fn find_email_send_by_message_txn(
        &self,
        txn: &WriteTransaction,
        provider_message_id: &str,
    ) -> StorageResult<Option<EmailSend>> {
        let id = {
            let messages = txn.open_table(EMAIL_SEND_MESSAGES_TABLE)?;
            messages.get(provider_message_id)?.map(|g| g.value())
        };
        match id {
            Some(id) => self.get_email_send_txn(txn, id),
            None => Ok(None),
        }
    }

    /// Newest first
    pub fn list_email_sends(
        &self,
        organization_id: &str,
        booking_id: Option<i64>,
    ) -> StorageResult<Vec<EmailSend>> {
        let mut sends: Vec<EmailSend> = self
            .scan::<EmailSend>(EMAIL_SENDS_TABLE)?
            .into_iter()
            .filter(|s| s.organization_id.as_deref() == Some(organization_id))
            .filter(|s| booking_id.is_none_or(|id| s.booking_id == Some(id)))
            .collect();
        sends.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sends)
    }

    // ========== Suppressions ==========

    /// `email` must already be normalized
    pub fn get_suppression_txn(
        &self,
        txn: &WriteTransaction,
        email: &str,
    ) -> StorageResult<Option<EmailSuppression>> {
        let table = txn.open_table(SUPPRESSIONS_TABLE)?;
        match table.get(email)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_suppression(
        &self,
        txn: &WriteTransaction,
        suppression: &EmailSuppression,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(SUPPRESSIONS_TABLE)?;
        let value = serde_json::to_vec(suppression)?;
        table.insert(suppression.email.as_str(), value.as_slice())?;
        Ok(())
    }

    pub fn list_suppressions(&self) -> StorageResult<Vec<EmailSuppression>> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SUPPRESSIONS_TABLE)?;
        let mut rows = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }
}
