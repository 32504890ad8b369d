//! Booking rows and the processor/intake id index

use super::{
    BOOKINGS_TABLE, BOOKING_REFS_TABLE, Storage, StorageResult,
};
use redb::{ReadableTable, WriteTransaction};
use shared::models::{Booking, BookingFilter};

/// External identifier that resolves to exactly one booking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingRef<'a> {
    CheckoutSession(&'a str),
    SetupIntent(&'a str),
    PaymentIntent(&'a str),
    IntakeResponse {
        organization_id: &'a str,
        response_id: &'a str,
    },
}

impl BookingRef<'_> {
    fn key(&self) -> String {
        match self {
            Self::CheckoutSession(id) => format!("cs:{id}"),
            Self::SetupIntent(id) => format!("seti:{id}"),
            Self::PaymentIntent(id) => format!("pi:{id}"),
            Self::IntakeResponse {
                organization_id,
                response_id,
            } => format!("resp:{organization_id}:{response_id}"),
        }
    }
}

impl Storage {
    pub fn get_booking(&self, id: i64) -> StorageResult<Option<Booking>> {
        self.load(BOOKINGS_TABLE, id)
    }

    pub fn get_booking_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Booking>> {
        self.load_txn(txn, BOOKINGS_TABLE, id)
    }

    /// Write the row and index every identifier it carries.
    ///
    /// Index entries are never removed: a replaced payment intent id keeps
    /// pointing at its booking so late webhooks still resolve.
    pub fn put_booking(&self, txn: &WriteTransaction, booking: &Booking) -> StorageResult<()> {
        self.save(txn, BOOKINGS_TABLE, booking.id, booking)?;

        let mut refs = Vec::new();
        if let Some(id) = booking.checkout_session_id.as_deref() {
            refs.push(BookingRef::CheckoutSession(id));
        }
        if let Some(id) = booking.setup_intent_id.as_deref() {
            refs.push(BookingRef::SetupIntent(id));
        }
        if let Some(id) = booking.payment_intent_id.as_deref() {
            refs.push(BookingRef::PaymentIntent(id));
        }
        if let Some(id) = booking.external_response_id.as_deref() {
            refs.push(BookingRef::IntakeResponse {
                organization_id: &booking.organization_id,
                response_id: id,
            });
        }

        let mut table = txn.open_table(BOOKING_REFS_TABLE)?;
        for r in refs {
            table.insert(r.key().as_str(), booking.id)?;
        }
        Ok(())
    }

    /// Index an identifier that is not (or no longer) stored on the row
    pub fn index_booking_ref(
        &self,
        txn: &WriteTransaction,
        booking_ref: BookingRef<'_>,
        booking_id: i64,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(BOOKING_REFS_TABLE)?;
        table.insert(booking_ref.key().as_str(), booking_id)?;
        Ok(())
    }

    pub fn find_booking_id_txn(
        &self,
        txn: &WriteTransaction,
        booking_ref: BookingRef<'_>,
    ) -> StorageResult<Option<i64>> {
        let table = txn.open_table(BOOKING_REFS_TABLE)?;
        Ok(table.get(booking_ref.key().as_str())?.map(|g| g.value()))
    }

    /// Bookings of one organization, soonest service date first
    pub fn list_bookings(
        &self,
        organization_id: &str,
        filter: &BookingFilter,
    ) -> StorageResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .scan::<Booking>(BOOKINGS_TABLE)?
            .into_iter()
            .filter(|b| b.organization_id == organization_id)
            .filter(|b| {
                filter
                    .status
                    .is_none_or(|s| b.status.normalized() == s.normalized())
            })
            .filter(|b| filter.service_date.is_none_or(|d| b.service_date == Some(d)))
            .collect();

        bookings.sort_by(|a, b| {
            a.service_date
                .is_none()
                .cmp(&b.service_date.is_none())
                .then(a.service_date.cmp(&b.service_date))
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(bookings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::booking_row as booking;
    use shared::models::BookingStatus;

    #[test]
    fn processor_ids_are_indexed_on_write() {
        let storage = Storage::open_in_memory().unwrap();
        let mut b = booking(1, "org_1");
        b.checkout_session_id = Some("cs_1".into());
        b.payment_intent_id = Some("pi_1".into());

        let txn = storage.begin_write().unwrap();
        storage.put_booking(&txn, &b).unwrap();
        assert_eq!(
            storage
                .find_booking_id_txn(&txn, BookingRef::CheckoutSession("cs_1"))
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            storage
                .find_booking_id_txn(&txn, BookingRef::PaymentIntent("pi_1"))
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            storage
                .find_booking_id_txn(&txn, BookingRef::SetupIntent("pi_1"))
                .unwrap(),
            None
        );
        txn.commit().unwrap();
    }

    #[test]
    fn replaced_payment_intent_still_resolves() {
        let storage = Storage::open_in_memory().unwrap();
        let mut b = booking(1, "org_1");
        b.payment_intent_id = Some("pi_old".into());
        let txn = storage.begin_write().unwrap();
        storage.put_booking(&txn, &b).unwrap();
        b.payment_intent_id = Some("pi_new".into());
        storage.put_booking(&txn, &b).unwrap();

        for pi in ["pi_old", "pi_new"] {
            assert_eq!(
                storage
                    .find_booking_id_txn(&txn, BookingRef::PaymentIntent(pi))
                    .unwrap(),
                Some(1)
            );
        }
        txn.commit().unwrap();
    }

    #[test]
    fn list_is_scoped_and_filtered() {
        let storage = Storage::open_in_memory().unwrap();
        let mut a = booking(1, "org_1");
        a.service_date = Some("2026-05-02".parse().unwrap());
        let mut b = booking(2, "org_1");
        b.service_date = Some("2026-05-01".parse().unwrap());
        b.status = BookingStatus::Failed;
        let c = booking(3, "org_2");

        let txn = storage.begin_write().unwrap();
        for row in [&a, &b, &c] {
            storage.put_booking(&txn, row).unwrap();
        }
        txn.commit().unwrap();

        let all = storage
            .list_bookings("org_1", &BookingFilter::default())
            .unwrap();
        assert_eq!(all.iter().map(|b| b.id).collect::<Vec<_>>(), vec![2, 1]);

        let failed = storage
            .list_bookings(
                "org_1",
                &BookingFilter {
                    status: Some(BookingStatus::PaymentFailed),
                    service_date: None,
                },
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, 2);
    }
}
