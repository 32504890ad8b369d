//! Cleaners, weekly availability, time off and assignments

use super::{
    ACTIVE_SLOTS_TABLE, ASSIGNMENTS_BY_BOOKING_TABLE, ASSIGNMENTS_TABLE, AVAILABILITY_TABLE,
    CLEANERS_TABLE, Storage, StorageResult, TIME_OFF_TABLE, child_ids, read_row, scan_rows,
};
use chrono::NaiveDate;
use redb::{ReadableTable, WriteTransaction};
use shared::models::{
    Assignment, AvailabilitySlot, Cleaner, CleanerStatus, TimeOffRequest, TimeOffStatus,
};
use std::collections::HashMap;

/// Everything the matcher needs for one date, read from one snapshot
#[derive(Debug, Default)]
pub struct AvailabilitySnapshot {
    pub active_cleaners: Vec<Cleaner>,
    /// Active slot per cleaner for the date's weekday
    pub slots: HashMap<i64, AvailabilitySlot>,
    /// Approved time off covering the date
    pub approved_time_off: Vec<TimeOffRequest>,
    /// Active assignments already on the date
    pub assignments: Vec<Assignment>,
}

impl Storage {
    // ========== Cleaners ==========

    pub fn get_cleaner(&self, id: i64) -> StorageResult<Option<Cleaner>> {
        self.load(CLEANERS_TABLE, id)
    }

    pub fn get_cleaner_txn(&self, txn: &WriteTransaction, id: i64) -> StorageResult<Option<Cleaner>> {
        self.load_txn(txn, CLEANERS_TABLE, id)
    }

    pub fn put_cleaner(&self, txn: &WriteTransaction, cleaner: &Cleaner) -> StorageResult<()> {
        self.save(txn, CLEANERS_TABLE, cleaner.id, cleaner)
    }

    pub fn list_cleaners(&self, organization_id: &str) -> StorageResult<Vec<Cleaner>> {
        let mut cleaners: Vec<Cleaner> = self
            .scan::<Cleaner>(CLEANERS_TABLE)?
            .into_iter()
            .filter(|c| c.organization_id == organization_id)
            .collect();
        cleaners.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cleaners)
    }

    // ========== Availability ==========

    pub fn get_slot_txn(
        &self,
        txn: &WriteTransaction,
        id: i64,
    ) -> StorageResult<Option<AvailabilitySlot>> {
        self.load_txn(txn, AVAILABILITY_TABLE, id)
    }

    /// Write a slot and keep the `(cleaner, weekday)` active pointer in step
    pub fn put_slot(&self, txn: &WriteTransaction, slot: &AvailabilitySlot) -> StorageResult<()> {
        self.save(txn, AVAILABILITY_TABLE, slot.id, slot)?;

        let key = (slot.cleaner_id, slot.day_of_week);
        let mut active = txn.open_table(ACTIVE_SLOTS_TABLE)?;
        if slot.is_active {
            active.insert(key, slot.id)?;
        } else {
            let points_here = active.get(key)?.map(|g| g.value()) == Some(slot.id);
            if points_here {
                active.remove(key)?;
            }
        }
        Ok(())
    }

    pub fn active_slot_id_txn(
        &self,
        txn: &WriteTransaction,
        cleaner_id: i64,
        day_of_week: u8,
    ) -> StorageResult<Option<i64>> {
        let active = txn.open_table(ACTIVE_SLOTS_TABLE)?;
        Ok(active.get((cleaner_id, day_of_week))?.map(|g| g.value()))
    }

    /// Active slots of one cleaner, Sunday first
    pub fn list_active_slots(&self, cleaner_id: i64) -> StorageResult<Vec<AvailabilitySlot>> {
        let read_txn = self.begin_read()?;
        let active = read_txn.open_table(ACTIVE_SLOTS_TABLE)?;
        let table = read_txn.open_table(AVAILABILITY_TABLE)?;
        let mut slots = Vec::new();
        for result in active.range((cleaner_id, u8::MIN)..=(cleaner_id, u8::MAX))? {
            let (_key, slot_id) = result?;
            if let Some(slot) = read_row::<AvailabilitySlot>(&table, slot_id.value())? {
                slots.push(slot);
            }
        }
        Ok(slots)
    }

    // ========== Time off ==========

    pub fn get_time_off_txn(
        &self,
        txn: &WriteTransaction,
        id: i64,
    ) -> StorageResult<Option<TimeOffRequest>> {
        self.load_txn(txn, TIME_OFF_TABLE, id)
    }

    pub fn put_time_off(&self, txn: &WriteTransaction, request: &TimeOffRequest) -> StorageResult<()> {
        self.save(txn, TIME_OFF_TABLE, request.id, request)
    }

    pub fn list_time_off(
        &self,
        organization_id: &str,
        cleaner_id: Option<i64>,
    ) -> StorageResult<Vec<TimeOffRequest>> {
        let mut requests: Vec<TimeOffRequest> = self
            .scan::<TimeOffRequest>(TIME_OFF_TABLE)?
            .into_iter()
            .filter(|r| r.organization_id == organization_id)
            .filter(|r| cleaner_id.is_none_or(|id| r.cleaner_id == id))
            .collect();
        requests.sort_by_key(|r| (r.start_date, r.id));
        Ok(requests)
    }

    // ========== Assignments ==========

    pub fn get_assignment(&self, id: i64) -> StorageResult<Option<Assignment>> {
        self.load(ASSIGNMENTS_TABLE, id)
    }

    pub fn get_assignment_txn(
        &self,
        txn: &WriteTransaction,
        id: i64,
    ) -> StorageResult<Option<Assignment>> {
        self.load_txn(txn, ASSIGNMENTS_TABLE, id)
    }

    pub fn put_assignment(&self, txn: &WriteTransaction, assignment: &Assignment) -> StorageResult<()> {
        self.save(txn, ASSIGNMENTS_TABLE, assignment.id, assignment)?;
        let mut index = txn.open_table(ASSIGNMENTS_BY_BOOKING_TABLE)?;
        index.insert((assignment.booking_id, assignment.id), ())?;
        Ok(())
    }

    pub fn assignments_for_booking(&self, booking_id: i64) -> StorageResult<Vec<Assignment>> {
        let read_txn = self.begin_read()?;
        let index = read_txn.open_table(ASSIGNMENTS_BY_BOOKING_TABLE)?;
        let table = read_txn.open_table(ASSIGNMENTS_TABLE)?;
        let mut assignments = Vec::new();
        for id in child_ids(&index, booking_id)? {
            if let Some(a) = read_row::<Assignment>(&table, id)? {
                assignments.push(a);
            }
        }
        assignments.sort_by_key(|a| (a.assigned_at, a.id));
        Ok(assignments)
    }

    /// Assignments of one organization, optionally for one cleaner and/or date
    pub fn list_assignments(
        &self,
        organization_id: &str,
        cleaner_id: Option<i64>,
        date: Option<NaiveDate>,
    ) -> StorageResult<Vec<Assignment>> {
        let mut assignments: Vec<Assignment> = self
            .scan::<Assignment>(ASSIGNMENTS_TABLE)?
            .into_iter()
            .filter(|a| a.organization_id == organization_id)
            .filter(|a| cleaner_id.is_none_or(|id| a.cleaner_id == id))
            .filter(|a| date.is_none_or(|d| a.service_date == Some(d)))
            .collect();
        assignments.sort_by_key(|a| (a.service_date, a.assigned_at, a.id));
        Ok(assignments)
    }

    pub fn assignments_for_booking_txn(
        &self,
        txn: &WriteTransaction,
        booking_id: i64,
    ) -> StorageResult<Vec<Assignment>> {
        let ids = {
            let index = txn.open_table(ASSIGNMENTS_BY_BOOKING_TABLE)?;
            child_ids(&index, booking_id)?
        };
        let table = txn.open_table(ASSIGNMENTS_TABLE)?;
        let mut assignments = Vec::new();
        for id in ids {
            if let Some(a) = read_row::<Assignment>(&table, id)? {
                assignments.push(a);
            }
        }
        Ok(assignments)
    }

    /// Matcher input for one organization and date, one read transaction
    pub fn availability_snapshot(
        &self,
        organization_id: &str,
        date: NaiveDate,
        weekday: u8,
    ) -> StorageResult<AvailabilitySnapshot> {
        let read_txn = self.begin_read()?;

        let cleaners: Vec<Cleaner> = scan_rows(&read_txn.open_table(CLEANERS_TABLE)?)?;
        let active_cleaners: Vec<Cleaner> = cleaners
            .into_iter()
            .filter(|c| c.organization_id == organization_id && c.status == CleanerStatus::Active)
            .collect();

        let active = read_txn.open_table(ACTIVE_SLOTS_TABLE)?;
        let availability = read_txn.open_table(AVAILABILITY_TABLE)?;
        let mut slots = HashMap::new();
        for cleaner in &active_cleaners {
            if let Some(slot_id) = active.get((cleaner.id, weekday))?.map(|g| g.value())
                && let Some(slot) = read_row::<AvailabilitySlot>(&availability, slot_id)?
                && slot.is_active
            {
                slots.insert(cleaner.id, slot);
            }
        }

        let time_off: Vec<TimeOffRequest> = scan_rows(&read_txn.open_table(TIME_OFF_TABLE)?)?;
        let approved_time_off = time_off
            .into_iter()
            .filter(|r| {
                r.organization_id == organization_id
                    && r.status == TimeOffStatus::Approved
                    && r.covers(date)
            })
            .collect();

        let assignments: Vec<Assignment> = scan_rows(&read_txn.open_table(ASSIGNMENTS_TABLE)?)?;
        let assignments = assignments
            .into_iter()
            .filter(|a| {
                a.organization_id == organization_id
                    && a.service_date == Some(date)
                    && a.status.is_active()
            })
            .collect();

        Ok(AvailabilitySnapshot {
            active_cleaners,
            slots,
            approved_time_off,
            assignments,
        })
    }
}
