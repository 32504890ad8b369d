//! Quote request rows

use super::{QUOTE_REFS_TABLE, QUOTES_TABLE, Storage, StorageResult};
use redb::{ReadableTable, WriteTransaction};
use shared::models::QuoteRequest;

fn quote_ref_key(organization_id: &str, response_id: &str) -> String {
    format!("{organization_id}:{response_id}")
}

impl Storage {
    pub fn get_quote(&self, id: i64) -> StorageResult<Option<QuoteRequest>> {
        self.load(QUOTES_TABLE, id)
    }

    pub fn get_quote_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<QuoteRequest>> {
        self.load_txn(txn, QUOTES_TABLE, id)
    }

    pub fn put_quote(&self, txn: &WriteTransaction, quote: &QuoteRequest) -> StorageResult<()> {
        self.save(txn, QUOTES_TABLE, quote.id, quote)?;
        let mut refs = txn.open_table(QUOTE_REFS_TABLE)?;
        let key = quote_ref_key(&quote.organization_id, &quote.external_response_id);
        refs.insert(key.as_str(), quote.id)?;
        Ok(())
    }

    pub fn find_quote_by_response_txn(
        &self,
        txn: &WriteTransaction,
        organization_id: &str,
        response_id: &str,
    ) -> StorageResult<Option<QuoteRequest>> {
        let id = {
            let refs = txn.open_table(QUOTE_REFS_TABLE)?;
            let key = quote_ref_key(organization_id, response_id);
            refs.get(key.as_str())?.map(|g| g.value())
        };
        match id {
            Some(id) => self.get_quote_txn(txn, id),
            None => Ok(None),
        }
    }

    /// Newest first
    pub fn list_quotes(&self, organization_id: &str) -> StorageResult<Vec<QuoteRequest>> {
        let mut quotes: Vec<QuoteRequest> = self
            .scan::<QuoteRequest>(QUOTES_TABLE)?
            .into_iter()
            .filter(|q| q.organization_id == organization_id)
            .collect();
        quotes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quotes)
    }
}
