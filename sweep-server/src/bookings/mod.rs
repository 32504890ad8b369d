//! Booking lifecycle
//!
//! Every status change goes through [`apply_transition`], which checks the
//! transition table against the row as read inside the caller's write
//! transaction. Only [`BookingService::admin_override`] bypasses the table.

use crate::error::{Resource, SweepError, SweepResult};
use crate::ingest::QueueSend;
use crate::notify::ChangeBus;
use crate::storage::{BookingRef, Storage};
use redb::WriteTransaction;
use serde_json::json;
use shared::RequestContext;
use shared::models::{
    AssignmentStatus, AuditAction, Booking, BookingCreate, BookingFilter, BookingStatus,
    ChangeEvent, EmailTemplate, PaymentPurpose,
};
use shared::util::{normalize_email, now_millis, snowflake_id};

/// Load a booking the context may see. Foreign rows behave as missing.
pub(crate) fn load_booking(
    storage: &Storage,
    txn: &WriteTransaction,
    ctx: &RequestContext,
    booking_id: i64,
) -> SweepResult<Booking> {
    storage
        .get_booking_txn(txn, booking_id)?
        .filter(|b| ctx.can_see(&b.organization_id))
        .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))
}

/// Move a booking along the transition table and write the row
pub(crate) fn apply_transition(
    storage: &Storage,
    txn: &WriteTransaction,
    booking: &mut Booking,
    to: BookingStatus,
) -> SweepResult<()> {
    let from = booking.status;
    if !from.can_transition_to(to) {
        return Err(SweepError::InvalidTransition {
            booking_id: booking.id,
            from,
            to,
        });
    }
    booking.status = to.normalized();
    booking.updated_at = now_millis();
    storage.put_booking(txn, booking)?;
    tracing::info!(booking_id = booking.id, %from, to = %booking.status, "Booking status changed");
    Ok(())
}

/// Webhook flavor of [`apply_transition`]: already at `to` or not allowed
/// is reported as `false` instead of an error.
pub(crate) fn advance_if_allowed(
    storage: &Storage,
    txn: &WriteTransaction,
    booking: &mut Booking,
    to: BookingStatus,
) -> SweepResult<bool> {
    if booking.status.normalized() == to.normalized() {
        return Ok(false);
    }
    if !booking.status.can_transition_to(to) {
        tracing::warn!(
            booking_id = booking.id,
            from = %booking.status,
            %to,
            "Transition not allowed, leaving status unchanged"
        );
        return Ok(false);
    }
    apply_transition(storage, txn, booking, to)?;
    Ok(true)
}

pub(crate) fn publish_booking(bus: &ChangeBus, booking: &Booking) {
    bus.publish(ChangeEvent::Booking {
        organization_id: booking.organization_id.clone(),
        booking_id: booking.id,
        status: booking.status,
    });
}

/// Customer email about a booking, deduplicated by `key`
pub(crate) fn booking_email(
    booking: &Booking,
    template: EmailTemplate,
    key: String,
    currency: &str,
    extra: serde_json::Value,
) -> QueueSend {
    let mut payload = json!({
        "booking_id": booking.id,
        "customer_name": booking.customer_name,
        "service_date": booking.service_date.map(|d| d.to_string()),
        "amount": booking.amount,
        "currency": currency,
    });
    if let (Some(map), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
        map.extend(extra);
    }
    QueueSend {
        idempotency_key: key,
        recipient: booking.email.clone(),
        template,
        payload,
        booking_id: Some(booking.id),
        organization_id: Some(booking.organization_id.clone()),
    }
}

fn validate_amount(amount: Option<i64>) -> SweepResult<()> {
    match amount {
        Some(a) if a < 0 => Err(SweepError::validation("amount must not be negative")),
        _ => Ok(()),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Insert a booking, or return the one already created for the same intake
/// response. The flag is `true` when a row was written.
pub(crate) fn insert_booking(
    storage: &Storage,
    txn: &WriteTransaction,
    ctx: &RequestContext,
    input: BookingCreate,
) -> SweepResult<(Booking, bool)> {
    let email = normalize_email(&input.email);
    if email.is_empty() || !email.contains('@') {
        return Err(SweepError::validation("email is required"));
    }
    validate_amount(input.amount)?;

    let external_response_id = trimmed(input.external_response_id);
    if let Some(response_id) = external_response_id.as_deref()
        && let Some(existing_id) = storage.find_booking_id_txn(
            txn,
            BookingRef::IntakeResponse {
                organization_id: &ctx.organization_id,
                response_id,
            },
        )?
        && let Some(existing) = storage.get_booking_txn(txn, existing_id)?
    {
        tracing::debug!(booking_id = existing.id, response_id, "Booking already exists for response");
        return Ok((existing, false));
    }

    let now = now_millis();
    let booking = Booking {
        id: snowflake_id(),
        organization_id: ctx.organization_id.clone(),
        email,
        customer_name: trimmed(input.customer_name),
        phone: trimmed(input.phone),
        address: trimmed(input.address),
        status: BookingStatus::PendingCard,
        service_type: trimmed(input.service_type),
        service_date: input.service_date,
        amount: input.amount,
        notes: trimmed(input.notes),
        external_response_id,
        quote_id: input.quote_id,
        checkout_session_id: None,
        customer_id: None,
        setup_intent_id: None,
        payment_method_id: None,
        payment_intent_id: None,
        last_payment_error: None,
        created_at: now,
        updated_at: now,
    };
    storage.put_booking(txn, &booking)?;
    storage.append_audit(
        txn,
        Some(&booking.organization_id),
        AuditAction::BookingCreated,
        "booking",
        &booking.id.to_string(),
        &ctx.subject_id,
        json!({ "quote_id": booking.quote_id, "amount": booking.amount }),
    )?;
    Ok((booking, true))
}

#[derive(Clone)]
pub struct BookingService {
    storage: Storage,
    bus: ChangeBus,
}

impl BookingService {
    pub fn new(storage: Storage, bus: ChangeBus) -> Self {
        Self { storage, bus }
    }

    /// Create a booking in `pending_card`
    pub fn create(&self, ctx: &RequestContext, input: BookingCreate) -> SweepResult<Booking> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let (booking, created) = insert_booking(&self.storage, &txn, ctx, input)?;
        txn.commit()?;

        if created {
            tracing::info!(booking_id = booking.id, "Booking created");
            publish_booking(&self.bus, &booking);
        }
        Ok(booking)
    }

    pub fn get(&self, ctx: &RequestContext, booking_id: i64) -> SweepResult<Booking> {
        self.storage
            .get_booking(booking_id)?
            .filter(|b| ctx.can_see(&b.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))
    }

    pub fn list(&self, ctx: &RequestContext, filter: &BookingFilter) -> SweepResult<Vec<Booking>> {
        Ok(self.storage.list_bookings(&ctx.organization_id, filter)?)
    }

    /// Set or change the quoted amount while the booking is not yet charged
    pub fn set_amount(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        amount: i64,
    ) -> SweepResult<Booking> {
        ctx.require_dispatcher()?;
        validate_amount(Some(amount))?;

        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        if booking.status.is_terminal() {
            return Err(SweepError::BookingClosed(booking_id));
        }
        let charging = self
            .storage
            .list_attempts_txn(&txn, booking_id)?
            .iter()
            .any(|a| a.purpose == PaymentPurpose::Charge && a.status.is_active());
        if charging {
            return Err(SweepError::PaymentInProgress(booking_id));
        }
        if booking.amount == Some(amount) {
            return Ok(booking);
        }

        let previous = booking.amount;
        booking.amount = Some(amount);
        booking.updated_at = now_millis();
        self.storage.put_booking(&txn, &booking)?;
        self.storage.append_audit(
            &txn,
            Some(&booking.organization_id),
            AuditAction::BookingAmountChanged,
            "booking",
            &booking_id.to_string(),
            &ctx.subject_id,
            json!({ "from": previous, "to": amount }),
        )?;
        txn.commit()?;

        publish_booking(&self.bus, &booking);
        Ok(booking)
    }

    /// `scheduled → in_progress`
    pub fn start(&self, ctx: &RequestContext, booking_id: i64) -> SweepResult<Booking> {
        ctx.require_staff()?;
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        apply_transition(&self.storage, &txn, &mut booking, BookingStatus::InProgress)?;
        txn.commit()?;

        publish_booking(&self.bus, &booking);
        Ok(booking)
    }

    /// `scheduled | in_progress → completed`; the amount must be known
    pub fn mark_completed(&self, ctx: &RequestContext, booking_id: i64) -> SweepResult<Booking> {
        ctx.require_staff()?;
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        if !matches!(
            booking.status.normalized(),
            BookingStatus::Scheduled | BookingStatus::InProgress
        ) {
            return Err(SweepError::InvalidTransition {
                booking_id,
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }
        if booking.amount.is_none() {
            return Err(SweepError::AmountRequired(booking_id));
        }
        apply_transition(&self.storage, &txn, &mut booking, BookingStatus::Completed)?;
        txn.commit()?;

        publish_booking(&self.bus, &booking);
        Ok(booking)
    }

    /// Cancel from any non-terminal status. Open assignments are cancelled
    /// with it; a charge that already succeeded is not reversed.
    pub fn cancel(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        reason: Option<String>,
    ) -> SweepResult<Booking> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        let previous = booking.status;
        apply_transition(&self.storage, &txn, &mut booking, BookingStatus::Cancelled)?;

        let now = now_millis();
        let mut cancelled_assignments = 0;
        for mut assignment in self.storage.assignments_for_booking_txn(&txn, booking_id)? {
            if assignment.status.can_transition_to(AssignmentStatus::Cancelled) {
                assignment.status = AssignmentStatus::Cancelled;
                assignment.updated_at = now;
                self.storage.put_assignment(&txn, &assignment)?;
                cancelled_assignments += 1;
            }
        }

        self.storage.append_audit(
            &txn,
            Some(&booking.organization_id),
            AuditAction::BookingCancelled,
            "booking",
            &booking_id.to_string(),
            &ctx.subject_id,
            json!({ "from": previous, "reason": reason, "cancelled_assignments": cancelled_assignments }),
        )?;
        txn.commit()?;

        publish_booking(&self.bus, &booking);
        Ok(booking)
    }

    /// Write any status, bypassing the transition table. Audited with the
    /// actor in the same transaction.
    pub fn admin_override(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        status: BookingStatus,
        reason: &str,
    ) -> SweepResult<Booking> {
        ctx.require_admin()?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(SweepError::validation("a reason is required for a status override"));
        }

        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        let previous = booking.status;
        booking.status = status.normalized();
        booking.updated_at = now_millis();
        self.storage.put_booking(&txn, &booking)?;
        self.storage.append_audit(
            &txn,
            Some(&booking.organization_id),
            AuditAction::BookingStatusOverride,
            "booking",
            &booking_id.to_string(),
            &ctx.subject_id,
            json!({ "from": previous, "to": booking.status, "reason": reason }),
        )?;
        txn.commit()?;

        tracing::warn!(
            booking_id,
            actor = %ctx.subject_id,
            from = %previous,
            to = %booking.status,
            "Booking status overridden"
        );
        publish_booking(&self.bus, &booking);
        Ok(booking)
    }
}
