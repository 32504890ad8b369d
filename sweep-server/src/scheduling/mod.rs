//! Cleaners, availability, time off and assignment matching
//!
//! Availability answers "who could work on this date": active cleaners with
//! an active slot for the weekday and no approved time off covering the
//! date. Existing assignments on the date are reported as load only.

use crate::bookings::{apply_transition, booking_email, load_booking, publish_booking};
use crate::error::{Resource, SweepError, SweepResult};
use crate::ingest::{EmailPipeline, QueueSend};
use crate::notify::ChangeBus;
use crate::storage::Storage;
use chrono::{Datelike, NaiveDate, NaiveTime};
use redb::WriteTransaction;
use serde_json::json;
use shared::RequestContext;
use shared::error::AppError;
use shared::models::{
    Assignment, AssignmentAction, AssignmentCreate, AssignmentStatus, AuditAction,
    AvailabilitySlot, AvailabilitySlotInput, AvailableCleaner, BookingStatus, ChangeEvent,
    Cleaner, CleanerCreate, CleanerStatus, CleanerUpdate, EmailTemplate, TimeOffCreate,
    TimeOffDecision, TimeOffRequest, TimeOffStatus,
};
use shared::util::{normalize_email, now_millis, snowflake_id};

/// Sunday = 0 .. Saturday = 6
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn parse_time(value: &str) -> SweepResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| SweepError::validation(format!("time must be HH:MM, got {value:?}")))
}

fn validate_slot(input: &AvailabilitySlotInput) -> SweepResult<(String, String)> {
    if input.day_of_week > 6 {
        return Err(SweepError::validation("day_of_week must be between 0 and 6"));
    }
    let start = parse_time(&input.start_time)?;
    let end = parse_time(&input.end_time)?;
    if start >= end {
        return Err(SweepError::InvalidTimeRange(format!(
            "{} is not before {}",
            input.start_time, input.end_time
        )));
    }
    Ok((start.format("%H:%M").to_string(), end.format("%H:%M").to_string()))
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct Scheduler {
    storage: Storage,
    bus: ChangeBus,
    email: EmailPipeline,
    currency: String,
}

impl Scheduler {
    pub fn new(
        storage: Storage,
        bus: ChangeBus,
        email: EmailPipeline,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bus,
            email,
            currency: currency.into(),
        }
    }

    fn load_cleaner(
        &self,
        txn: &WriteTransaction,
        ctx: &RequestContext,
        cleaner_id: i64,
    ) -> SweepResult<Cleaner> {
        self.storage
            .get_cleaner_txn(txn, cleaner_id)?
            .filter(|c| ctx.can_see(&c.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Cleaner, cleaner_id))
    }

    fn publish_cleaner(&self, cleaner: &Cleaner) {
        self.bus.publish(ChangeEvent::Cleaner {
            organization_id: cleaner.organization_id.clone(),
            cleaner_id: cleaner.id,
        });
    }

    fn publish_assignment(&self, assignment: &Assignment) {
        self.bus.publish(ChangeEvent::Assignment {
            organization_id: assignment.organization_id.clone(),
            booking_id: assignment.booking_id,
            assignment_id: assignment.id,
        });
    }

    /// Admins manage anyone; a cleaner only their own record
    fn require_self_or_admin(ctx: &RequestContext, cleaner: &Cleaner) -> SweepResult<()> {
        if ctx.is_admin() || cleaner.user_id.as_deref() == Some(ctx.subject_id.as_str()) {
            Ok(())
        } else {
            Err(AppError::permission_denied("Only the cleaner or an admin may do this").into())
        }
    }

    // ========== Cleaners ==========

    pub fn create_cleaner(&self, ctx: &RequestContext, input: CleanerCreate) -> SweepResult<Cleaner> {
        ctx.require_admin()?;
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(SweepError::validation("name is required"));
        }

        let now = now_millis();
        let cleaner = Cleaner {
            id: snowflake_id(),
            organization_id: ctx.organization_id.clone(),
            name,
            email: optional(input.email).map(|e| normalize_email(&e)),
            phone: optional(input.phone),
            status: CleanerStatus::Active,
            user_id: optional(input.user_id),
            created_at: now,
            updated_at: now,
        };
        let txn = self.storage.begin_write()?;
        self.storage.put_cleaner(&txn, &cleaner)?;
        txn.commit()?;

        tracing::info!(cleaner_id = cleaner.id, "Cleaner created");
        self.publish_cleaner(&cleaner);
        Ok(cleaner)
    }

    pub fn update_cleaner(
        &self,
        ctx: &RequestContext,
        cleaner_id: i64,
        update: CleanerUpdate,
    ) -> SweepResult<Cleaner> {
        ctx.require_admin()?;
        let txn = self.storage.begin_write()?;
        let mut cleaner = self.load_cleaner(&txn, ctx, cleaner_id)?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(SweepError::validation("name must not be empty"));
            }
            cleaner.name = name;
        }
        if let Some(email) = update.email {
            cleaner.email = optional(Some(email)).map(|e| normalize_email(&e));
        }
        if let Some(phone) = update.phone {
            cleaner.phone = optional(Some(phone));
        }
        if let Some(user_id) = update.user_id {
            cleaner.user_id = optional(Some(user_id));
        }
        if let Some(status) = update.status {
            cleaner.status = status;
        }
        cleaner.updated_at = now_millis();
        self.storage.put_cleaner(&txn, &cleaner)?;
        txn.commit()?;

        self.publish_cleaner(&cleaner);
        Ok(cleaner)
    }

    pub fn get_cleaner(&self, ctx: &RequestContext, cleaner_id: i64) -> SweepResult<Cleaner> {
        self.storage
            .get_cleaner(cleaner_id)?
            .filter(|c| ctx.can_see(&c.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Cleaner, cleaner_id))
    }

    pub fn list_cleaners(&self, ctx: &RequestContext) -> SweepResult<Vec<Cleaner>> {
        Ok(self.storage.list_cleaners(&ctx.organization_id)?)
    }

    // ========== Availability ==========

    /// Set the weekly window for one weekday, superseding the active one
    pub fn set_availability(
        &self,
        ctx: &RequestContext,
        cleaner_id: i64,
        input: AvailabilitySlotInput,
    ) -> SweepResult<AvailabilitySlot> {
        ctx.require_admin()?;
        let (start_time, end_time) = validate_slot(&input)?;

        let txn = self.storage.begin_write()?;
        let cleaner = self.load_cleaner(&txn, ctx, cleaner_id)?;
        let now = now_millis();

        if let Some(previous_id) = self
            .storage
            .active_slot_id_txn(&txn, cleaner_id, input.day_of_week)?
            && let Some(mut previous) = self.storage.get_slot_txn(&txn, previous_id)?
        {
            previous.is_active = false;
            previous.updated_at = now;
            self.storage.put_slot(&txn, &previous)?;
        }

        let slot = AvailabilitySlot {
            id: snowflake_id(),
            organization_id: cleaner.organization_id.clone(),
            cleaner_id,
            day_of_week: input.day_of_week,
            start_time,
            end_time,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_slot(&txn, &slot)?;
        txn.commit()?;

        tracing::info!(cleaner_id, day_of_week = slot.day_of_week, "Availability set");
        self.publish_cleaner(&cleaner);
        Ok(slot)
    }

    pub fn remove_availability(
        &self,
        ctx: &RequestContext,
        cleaner_id: i64,
        day_of_week: u8,
    ) -> SweepResult<AvailabilitySlot> {
        ctx.require_admin()?;
        let txn = self.storage.begin_write()?;
        let cleaner = self.load_cleaner(&txn, ctx, cleaner_id)?;
        let mut slot = self
            .storage
            .active_slot_id_txn(&txn, cleaner_id, day_of_week)?
            .map(|id| self.storage.get_slot_txn(&txn, id))
            .transpose()?
            .flatten()
            .ok_or_else(|| {
                SweepError::not_found(Resource::AvailabilitySlot, format!("{cleaner_id}/{day_of_week}"))
            })?;
        slot.is_active = false;
        slot.updated_at = now_millis();
        self.storage.put_slot(&txn, &slot)?;
        txn.commit()?;

        self.publish_cleaner(&cleaner);
        Ok(slot)
    }

    pub fn list_availability(
        &self,
        ctx: &RequestContext,
        cleaner_id: i64,
    ) -> SweepResult<Vec<AvailabilitySlot>> {
        self.get_cleaner(ctx, cleaner_id)?;
        Ok(self.storage.list_active_slots(cleaner_id)?)
    }

    // ========== Time off ==========

    pub fn request_time_off(
        &self,
        ctx: &RequestContext,
        input: TimeOffCreate,
    ) -> SweepResult<TimeOffRequest> {
        if input.start_date > input.end_date {
            return Err(SweepError::InvalidTimeRange(format!(
                "{} is after {}",
                input.start_date, input.end_date
            )));
        }
        let txn = self.storage.begin_write()?;
        let cleaner = self.load_cleaner(&txn, ctx, input.cleaner_id)?;
        Self::require_self_or_admin(ctx, &cleaner)?;

        let now = now_millis();
        let request = TimeOffRequest {
            id: snowflake_id(),
            organization_id: cleaner.organization_id.clone(),
            cleaner_id: cleaner.id,
            start_date: input.start_date,
            end_date: input.end_date,
            status: TimeOffStatus::Pending,
            reason: optional(input.reason),
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_time_off(&txn, &request)?;
        txn.commit()?;

        tracing::info!(cleaner_id = cleaner.id, time_off_id = request.id, "Time off requested");
        self.publish_cleaner(&cleaner);
        Ok(request)
    }

    fn load_time_off(
        &self,
        txn: &WriteTransaction,
        ctx: &RequestContext,
        time_off_id: i64,
    ) -> SweepResult<TimeOffRequest> {
        self.storage
            .get_time_off_txn(txn, time_off_id)?
            .filter(|r| ctx.can_see(&r.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::TimeOff, time_off_id))
    }

    /// Approve or deny a pending request
    pub fn review_time_off(
        &self,
        ctx: &RequestContext,
        time_off_id: i64,
        decision: TimeOffDecision,
    ) -> SweepResult<TimeOffRequest> {
        ctx.require_admin()?;
        let txn = self.storage.begin_write()?;
        let mut request = self.load_time_off(&txn, ctx, time_off_id)?;
        if request.status != TimeOffStatus::Pending {
            return Err(SweepError::validation(format!(
                "time off is already {:?}",
                request.status
            )));
        }
        request.status = match decision {
            TimeOffDecision::Approve => TimeOffStatus::Approved,
            TimeOffDecision::Deny => TimeOffStatus::Denied,
        };
        request.reviewed_by = Some(ctx.subject_id.clone());
        request.updated_at = now_millis();
        self.storage.put_time_off(&txn, &request)?;
        self.storage.append_audit(
            &txn,
            Some(&request.organization_id),
            AuditAction::TimeOffReviewed,
            "time_off",
            &time_off_id.to_string(),
            &ctx.subject_id,
            json!({ "decision": decision, "cleaner_id": request.cleaner_id }),
        )?;
        txn.commit()?;

        self.bus.publish(ChangeEvent::Cleaner {
            organization_id: request.organization_id.clone(),
            cleaner_id: request.cleaner_id,
        });
        Ok(request)
    }

    /// Withdraw a pending or approved request
    pub fn cancel_time_off(
        &self,
        ctx: &RequestContext,
        time_off_id: i64,
    ) -> SweepResult<TimeOffRequest> {
        let txn = self.storage.begin_write()?;
        let mut request = self.load_time_off(&txn, ctx, time_off_id)?;
        let cleaner = self.load_cleaner(&txn, ctx, request.cleaner_id)?;
        Self::require_self_or_admin(ctx, &cleaner)?;
        if !matches!(request.status, TimeOffStatus::Pending | TimeOffStatus::Approved) {
            return Err(SweepError::validation(format!(
                "time off is already {:?}",
                request.status
            )));
        }
        request.status = TimeOffStatus::Cancelled;
        request.updated_at = now_millis();
        self.storage.put_time_off(&txn, &request)?;
        txn.commit()?;

        self.publish_cleaner(&cleaner);
        Ok(request)
    }

    pub fn list_time_off(
        &self,
        ctx: &RequestContext,
        cleaner_id: Option<i64>,
    ) -> SweepResult<Vec<TimeOffRequest>> {
        Ok(self.storage.list_time_off(&ctx.organization_id, cleaner_id)?)
    }

    // ========== Matching ==========

    /// Cleaners who could take a job on `date`, by name
    pub fn available_cleaners_for_date(
        &self,
        ctx: &RequestContext,
        date: NaiveDate,
    ) -> SweepResult<Vec<AvailableCleaner>> {
        ctx.require_staff()?;
        let snapshot =
            self.storage
                .availability_snapshot(&ctx.organization_id, date, weekday_index(date))?;

        let mut available: Vec<AvailableCleaner> = snapshot
            .active_cleaners
            .into_iter()
            .filter(|c| !snapshot.approved_time_off.iter().any(|t| t.cleaner_id == c.id))
            .filter_map(|cleaner| {
                let slot = snapshot.slots.get(&cleaner.id)?;
                let assignment_count = snapshot
                    .assignments
                    .iter()
                    .filter(|a| a.cleaner_id == cleaner.id)
                    .count() as u32;
                Some(AvailableCleaner {
                    start_time: slot.start_time.clone(),
                    end_time: slot.end_time.clone(),
                    assignment_count,
                    cleaner,
                })
            })
            .collect();
        available.sort_by(|a, b| a.cleaner.name.cmp(&b.cleaner.name));

        tracing::debug!(%date, count = available.len(), "Availability computed");
        Ok(available)
    }

    // ========== Assignments ==========

    /// Assign a cleaner to a booking.
    ///
    /// The first assignment of a `card_saved` booking schedules it, with or
    /// without a service date. A dateless assignment adds no load to any day.
    /// The same cleaner can hold assignments on other bookings that day.
    pub async fn assign_cleaner(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        input: AssignmentCreate,
    ) -> SweepResult<Assignment> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        if booking.status.is_terminal() {
            return Err(SweepError::BookingClosed(booking_id));
        }
        let cleaner = self.load_cleaner(&txn, ctx, input.cleaner_id)?;
        if cleaner.status != CleanerStatus::Active {
            return Err(SweepError::validation(format!(
                "cleaner {} is inactive",
                cleaner.id
            )));
        }

        let existing = self.storage.assignments_for_booking_txn(&txn, booking_id)?;
        if existing
            .iter()
            .any(|a| a.cleaner_id == cleaner.id && a.status.is_active())
        {
            return Err(SweepError::DuplicateAssignment {
                booking_id,
                cleaner_id: cleaner.id,
            });
        }

        let now = now_millis();
        if booking.service_date.is_none()
            && let Some(date) = input.service_date
        {
            booking.service_date = Some(date);
            booking.updated_at = now;
            self.storage.put_booking(&txn, &booking)?;
        }
        let assignment = Assignment {
            id: snowflake_id(),
            organization_id: booking.organization_id.clone(),
            booking_id,
            cleaner_id: cleaner.id,
            role: input.role,
            status: AssignmentStatus::Pending,
            service_date: booking.service_date,
            assigned_by: ctx.subject_id.clone(),
            assigned_at: now,
            clock_in_at: None,
            clock_out_at: None,
            actual_duration_minutes: None,
            updated_at: now,
        };
        self.storage.put_assignment(&txn, &assignment)?;

        let mut notification: Option<QueueSend> = None;
        if booking.status.normalized() == BookingStatus::CardSaved {
            apply_transition(&self.storage, &txn, &mut booking, BookingStatus::Scheduled)?;
            notification = Some(booking_email(
                &booking,
                EmailTemplate::BookingScheduled,
                format!("booking_scheduled:{booking_id}"),
                &self.currency,
                json!({ "cleaner_name": cleaner.name }),
            ));
        }
        self.storage.append_audit(
            &txn,
            Some(&booking.organization_id),
            AuditAction::CleanerAssigned,
            "booking",
            &booking_id.to_string(),
            &ctx.subject_id,
            json!({ "assignment_id": assignment.id, "cleaner_id": cleaner.id, "role": assignment.role }),
        )?;
        txn.commit()?;

        tracing::info!(booking_id, cleaner_id = cleaner.id, assignment_id = assignment.id, "Cleaner assigned");
        self.publish_assignment(&assignment);
        publish_booking(&self.bus, &booking);
        if let Some(req) = notification {
            self.email.notify(req).await;
        }
        Ok(assignment)
    }

    /// Move an assignment along its lifecycle.
    ///
    /// Accept, decline and clocking are for the assigned cleaner (or a
    /// dispatcher); confirm and cancel are dispatcher actions.
    pub fn update_assignment(
        &self,
        ctx: &RequestContext,
        assignment_id: i64,
        action: AssignmentAction,
    ) -> SweepResult<Assignment> {
        let txn = self.storage.begin_write()?;
        let mut assignment = self
            .storage
            .get_assignment_txn(&txn, assignment_id)?
            .filter(|a| ctx.can_see(&a.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Assignment, assignment_id))?;

        match action {
            AssignmentAction::Confirm | AssignmentAction::Cancel => ctx.require_dispatcher()?,
            _ if ctx.is_dispatcher() => {}
            _ => {
                let cleaner = self.load_cleaner(&txn, ctx, assignment.cleaner_id)?;
                if cleaner.user_id.as_deref() != Some(ctx.subject_id.as_str()) {
                    return Err(AppError::permission_denied(
                        "Only the assigned cleaner may do this",
                    )
                    .into());
                }
            }
        }

        let to = action.target();
        if !assignment.status.can_transition_to(to) {
            return Err(SweepError::InvalidAssignmentTransition {
                assignment_id,
                from: assignment.status,
                to,
            });
        }

        let now = now_millis();
        let mut booking_changed = None;
        match action {
            AssignmentAction::ClockIn => {
                assignment.clock_in_at = Some(now);
                let mut booking = self
                    .storage
                    .get_booking_txn(&txn, assignment.booking_id)?
                    .ok_or_else(|| SweepError::not_found(Resource::Booking, assignment.booking_id))?;
                if booking.status.normalized() == BookingStatus::Scheduled {
                    apply_transition(&self.storage, &txn, &mut booking, BookingStatus::InProgress)?;
                    booking_changed = Some(booking);
                }
            }
            AssignmentAction::ClockOut => {
                assignment.clock_out_at = Some(now);
                assignment.actual_duration_minutes =
                    assignment.clock_in_at.map(|start| (now - start).max(0) / 60_000);
            }
            _ => {}
        }
        assignment.status = to;
        assignment.updated_at = now;
        self.storage.put_assignment(&txn, &assignment)?;
        txn.commit()?;

        tracing::info!(assignment_id, ?action, status = ?assignment.status, "Assignment updated");
        self.publish_assignment(&assignment);
        if let Some(booking) = booking_changed {
            publish_booking(&self.bus, &booking);
        }
        Ok(assignment)
    }

    pub fn list_booking_assignments(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
    ) -> SweepResult<Vec<Assignment>> {
        self.storage
            .get_booking(booking_id)?
            .filter(|b| ctx.can_see(&b.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))?;
        Ok(self.storage.assignments_for_booking(booking_id)?)
    }

    /// Assignments by cleaner and/or date. Cleaners only see their own.
    pub fn list_assignments(
        &self,
        ctx: &RequestContext,
        cleaner_id: Option<i64>,
        date: Option<NaiveDate>,
    ) -> SweepResult<Vec<Assignment>> {
        if ctx.is_dispatcher() {
            return Ok(self
                .storage
                .list_assignments(&ctx.organization_id, cleaner_id, date)?);
        }
        let own = self
            .storage
            .list_cleaners(&ctx.organization_id)?
            .into_iter()
            .find(|c| c.user_id.as_deref() == Some(ctx.subject_id.as_str()));
        match own {
            Some(cleaner) if cleaner_id.is_none_or(|id| id == cleaner.id) => Ok(self
                .storage
                .list_assignments(&ctx.organization_id, Some(cleaner.id), date)?),
            _ => Err(AppError::permission_denied("Cleaners only see their own assignments").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, ORG, admin, booking_row, cleaner_user, dispatcher};
    use shared::models::AssignmentRole;

    // 2026-03-02 is a Monday
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn cleaner(harness: &Harness, name: &str, user_id: Option<&str>) -> Cleaner {
        harness
            .scheduler
            .create_cleaner(
                &admin(),
                CleanerCreate {
                    name: name.into(),
                    user_id: user_id.map(String::from),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    fn monday_slot(harness: &Harness, cleaner_id: i64, start: &str, end: &str) {
        harness
            .scheduler
            .set_availability(
                &admin(),
                cleaner_id,
                AvailabilitySlotInput {
                    day_of_week: 1,
                    start_time: start.into(),
                    end_time: end.into(),
                },
            )
            .unwrap();
    }

    fn card_saved_booking(harness: &Harness, id: i64) {
        let mut booking = booking_row(id, ORG);
        booking.status = BookingStatus::CardSaved;
        booking.service_date = Some(monday());
        harness.put_booking(&booking);
    }

    async fn assign(harness: &Harness, booking_id: i64, cleaner_id: i64) -> SweepResult<Assignment> {
        harness
            .scheduler
            .assign_cleaner(
                &dispatcher(),
                booking_id,
                AssignmentCreate {
                    cleaner_id,
                    role: AssignmentRole::Primary,
                    service_date: None,
                },
            )
            .await
    }

    #[test]
    fn weekday_index_starts_on_sunday() {
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()), 0);
        assert_eq!(weekday_index(monday()), 1);
        assert_eq!(weekday_index(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap()), 6);
    }

    #[test]
    fn slot_validation() {
        let harness = Harness::new();
        let c = cleaner(&harness, "Ana", None);
        let set = |day, start: &str, end: &str| {
            harness.scheduler.set_availability(
                &admin(),
                c.id,
                AvailabilitySlotInput {
                    day_of_week: day,
                    start_time: start.into(),
                    end_time: end.into(),
                },
            )
        };
        assert!(matches!(set(7, "09:00", "17:00"), Err(SweepError::Validation(_))));
        assert!(matches!(set(1, "9am", "17:00"), Err(SweepError::Validation(_))));
        assert!(matches!(
            set(1, "17:00", "09:00"),
            Err(SweepError::InvalidTimeRange(_))
        ));
        assert!(set(1, "09:00", "17:00").is_ok());
    }

    #[test]
    fn set_availability_supersedes_previous_slot() {
        let harness = Harness::new();
        let c = cleaner(&harness, "Ana", None);
        monday_slot(&harness, c.id, "09:00", "12:00");
        monday_slot(&harness, c.id, "13:00", "17:00");

        let slots = harness.scheduler.list_availability(&admin(), c.id).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start_time, "13:00");

        harness.scheduler.remove_availability(&admin(), c.id, 1).unwrap();
        assert!(harness.scheduler.list_availability(&admin(), c.id).unwrap().is_empty());
        assert!(matches!(
            harness.scheduler.remove_availability(&admin(), c.id, 1),
            Err(SweepError::NotFound { .. })
        ));
    }

    #[test]
    fn availability_excludes_time_off_and_missing_slot() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        let ben = cleaner(&harness, "Ben", None);
        let cy = cleaner(&harness, "Cy", None);
        monday_slot(&harness, ana.id, "09:00", "17:00");
        monday_slot(&harness, ben.id, "08:00", "12:00");
        // Cy has no Monday slot

        let request = harness
            .scheduler
            .request_time_off(
                &admin(),
                TimeOffCreate {
                    cleaner_id: ben.id,
                    start_date: monday(),
                    end_date: monday(),
                    reason: None,
                },
            )
            .unwrap();

        // Pending time off does not block
        let names: Vec<String> = harness
            .scheduler
            .available_cleaners_for_date(&dispatcher(), monday())
            .unwrap()
            .into_iter()
            .map(|a| a.cleaner.name)
            .collect();
        assert_eq!(names, vec!["Ana", "Ben"]);

        harness
            .scheduler
            .review_time_off(&admin(), request.id, TimeOffDecision::Approve)
            .unwrap();
        let available = harness
            .scheduler
            .available_cleaners_for_date(&dispatcher(), monday())
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].cleaner.id, ana.id);
        assert_eq!(available[0].start_time, "09:00");
        assert!(!available.iter().any(|a| a.cleaner.id == cy.id));
    }

    #[test]
    fn inactive_cleaners_are_not_available() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        monday_slot(&harness, ana.id, "09:00", "17:00");
        harness
            .scheduler
            .update_cleaner(
                &admin(),
                ana.id,
                CleanerUpdate {
                    status: Some(CleanerStatus::Inactive),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(
            harness
                .scheduler
                .available_cleaners_for_date(&dispatcher(), monday())
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn existing_assignments_are_load_not_exclusion() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        monday_slot(&harness, ana.id, "09:00", "17:00");
        card_saved_booking(&harness, 1);
        card_saved_booking(&harness, 2);

        assign(&harness, 1, ana.id).await.unwrap();
        // Same cleaner, same day, another booking
        assign(&harness, 2, ana.id).await.unwrap();

        let available = harness
            .scheduler
            .available_cleaners_for_date(&dispatcher(), monday())
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].assignment_count, 2);
    }

    #[tokio::test]
    async fn first_assignment_schedules_and_duplicates_are_rejected() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        card_saved_booking(&harness, 1);

        let assignment = assign(&harness, 1, ana.id).await.unwrap();
        assert_eq!(assignment.status, AssignmentStatus::Pending);
        assert_eq!(assignment.service_date, Some(monday()));
        assert_eq!(harness.booking(1).status, BookingStatus::Scheduled);
        assert_eq!(harness.mailer.sent().len(), 1);

        assert!(matches!(
            assign(&harness, 1, ana.id).await,
            Err(SweepError::DuplicateAssignment { .. })
        ));

        // A declined assignment frees the pair
        harness
            .scheduler
            .update_assignment(&dispatcher(), assignment.id, AssignmentAction::Decline)
            .unwrap();
        assert!(assign(&harness, 1, ana.id).await.is_ok());
    }

    #[tokio::test]
    async fn dateless_assignment_still_schedules_the_booking() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        let mut booking = booking_row(77, ORG);
        booking.status = BookingStatus::CardSaved;
        harness.put_booking(&booking);

        let assignment = assign(&harness, 77, ana.id).await.unwrap();
        assert_eq!(assignment.service_date, None);
        assert_eq!(assignment.status, AssignmentStatus::Pending);
        let booking = harness.booking(77);
        assert_eq!(booking.status, BookingStatus::Scheduled);
        assert_eq!(booking.service_date, None);
        assert_eq!(
            harness.scheduler.list_booking_assignments(&dispatcher(), 77).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn assignment_date_fills_a_dateless_booking() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        let mut booking = booking_row(1, ORG);
        booking.status = BookingStatus::CardSaved;
        harness.put_booking(&booking);

        let assignment = harness
            .scheduler
            .assign_cleaner(
                &dispatcher(),
                1,
                AssignmentCreate {
                    cleaner_id: ana.id,
                    role: AssignmentRole::Primary,
                    service_date: Some(monday()),
                },
            )
            .await
            .unwrap();
        assert_eq!(assignment.service_date, Some(monday()));
        assert_eq!(harness.booking(1).service_date, Some(monday()));
        assert_eq!(harness.booking(1).status, BookingStatus::Scheduled);
    }

    #[tokio::test]
    async fn assigning_to_closed_booking_fails() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", None);
        let mut booking = booking_row(1, ORG);
        booking.status = BookingStatus::Cancelled;
        harness.put_booking(&booking);
        assert!(matches!(
            assign(&harness, 1, ana.id).await,
            Err(SweepError::BookingClosed(1))
        ));
    }

    #[tokio::test]
    async fn clock_in_starts_job_and_clock_out_records_duration() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", Some("user_cleaner"));
        card_saved_booking(&harness, 1);
        let assignment = assign(&harness, 1, ana.id).await.unwrap();

        // Must be accepted or confirmed first
        assert!(matches!(
            harness
                .scheduler
                .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::ClockIn),
            Err(SweepError::InvalidAssignmentTransition { .. })
        ));

        harness
            .scheduler
            .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::Accept)
            .unwrap();
        let started = harness
            .scheduler
            .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::ClockIn)
            .unwrap();
        assert_eq!(started.status, AssignmentStatus::InProgress);
        assert!(started.clock_in_at.is_some());
        assert_eq!(harness.booking(1).status, BookingStatus::InProgress);

        let done = harness
            .scheduler
            .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::ClockOut)
            .unwrap();
        assert_eq!(done.status, AssignmentStatus::Completed);
        assert_eq!(done.actual_duration_minutes, Some(0));
    }

    #[tokio::test]
    async fn cleaners_act_only_on_their_own_assignments() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", Some("someone_else"));
        card_saved_booking(&harness, 1);
        let assignment = assign(&harness, 1, ana.id).await.unwrap();

        assert!(matches!(
            harness
                .scheduler
                .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::Accept),
            Err(SweepError::Forbidden(_))
        ));
        assert!(matches!(
            harness
                .scheduler
                .update_assignment(&cleaner_user(), assignment.id, AssignmentAction::Confirm),
            Err(SweepError::Forbidden(_))
        ));
        assert!(
            harness
                .scheduler
                .list_assignments(&cleaner_user(), None, None)
                .is_err()
        );
    }

    #[test]
    fn time_off_lifecycle() {
        let harness = Harness::new();
        let ana = cleaner(&harness, "Ana", Some("user_cleaner"));

        assert!(matches!(
            harness.scheduler.request_time_off(
                &cleaner_user(),
                TimeOffCreate {
                    cleaner_id: ana.id,
                    start_date: NaiveDate::from_ymd_opt(2026, 3, 5).unwrap(),
                    end_date: monday(),
                    reason: None,
                },
            ),
            Err(SweepError::InvalidTimeRange(_))
        ));

        let request = harness
            .scheduler
            .request_time_off(
                &cleaner_user(),
                TimeOffCreate {
                    cleaner_id: ana.id,
                    start_date: monday(),
                    end_date: NaiveDate::from_ymd_opt(2026, 3, 4).unwrap(),
                    reason: Some("dentist".into()),
                },
            )
            .unwrap();
        assert_eq!(request.status, TimeOffStatus::Pending);

        // Cleaners cannot approve their own requests
        assert!(
            harness
                .scheduler
                .review_time_off(&cleaner_user(), request.id, TimeOffDecision::Approve)
                .is_err()
        );
        let denied = harness
            .scheduler
            .review_time_off(&admin(), request.id, TimeOffDecision::Deny)
            .unwrap();
        assert_eq!(denied.status, TimeOffStatus::Denied);
        assert_eq!(denied.reviewed_by.as_deref(), Some("user_admin"));
        assert!(
            harness
                .scheduler
                .review_time_off(&admin(), request.id, TimeOffDecision::Approve)
                .is_err()
        );
        assert!(harness.scheduler.cancel_time_off(&cleaner_user(), request.id).is_err());
        assert_eq!(
            harness
                .storage
                .list_audit(Some(ORG), Some(AuditAction::TimeOffReviewed), None, 10)
                .unwrap()
                .len(),
            1
        );
    }
}
