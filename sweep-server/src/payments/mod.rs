//! Deferred payment orchestration
//!
//! Card collection happens up front ("collect card, do not charge"), the
//! charge happens after the job is completed. Processor calls never run
//! inside a write transaction:
//!
//! 1. reserve an attempt row (one transaction)
//! 2. call the processor with the attempt's idempotency key
//! 3. record the outcome (second transaction)
//!
//! Webhooks are the source of truth for asynchronous outcomes and are
//! applied at most once per event id.

pub mod events;
pub mod processor;
pub mod stripe;

pub use events::{ProcessorEvent, ProcessorEventKind, parse_event};
pub use processor::{
    ChargeRequest, ChargeResult, CheckoutSession, CheckoutSessionRequest, CustomerRequest,
    PaymentProcessor, ProcessorError, SetupIntent, SetupIntentRequest,
};
pub use stripe::StripeClient;

use crate::bookings::{
    advance_if_allowed, apply_transition, booking_email, load_booking, publish_booking,
};
use crate::error::{Resource, SweepError, SweepResult};
use crate::ingest::{EmailPipeline, EventOutcome, QueueSend};
use crate::notify::ChangeBus;
use crate::storage::{BookingRef, Storage};
use redb::WriteTransaction;
use serde_json::json;
use shared::RequestContext;
use shared::models::{
    AttemptSource, AttemptStatus, AuditAction, Booking, BookingStatus, ChargeJob, ChargeReceipt,
    ChargeState, CheckoutLink, EmailTemplate, PaymentAttempt, PaymentPurpose, SetupIntentLink,
};
use shared::util::{now_millis, snowflake_id};
use std::sync::Arc;

const EVENT_SOURCE: &str = "stripe";
const ACTOR: &str = "system:stripe";

/// Open checkout sessions are reused while younger than this (Stripe
/// expires them after 24 hours)
const CHECKOUT_REUSE_WINDOW_MS: i64 = 23 * 60 * 60 * 1000;

/// A reserved attempt without a processor reference older than this is
/// treated as abandoned (crash between reserve and record)
const RESERVATION_TIMEOUT_MS: i64 = 2 * 60 * 1000;

/// `error_kind` of an attempt whose outcome is unknown; its idempotency
/// key is reused by the next charge
const ERROR_KIND_UNAVAILABLE: &str = "processor_unavailable";

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Setup attempt reserved in phase one
struct Reservation {
    booking: Booking,
    attempt: PaymentAttempt,
    stale_sessions: Vec<String>,
}

/// Declined or rejected charge, as recorded on the booking
struct ChargeFailure {
    message: String,
    decline_code: Option<String>,
    payment_intent_id: Option<String>,
}

enum SetupStart {
    Reserved(Reservation),
    Reused(CheckoutLink),
}

fn new_attempt(
    booking_id: i64,
    purpose: PaymentPurpose,
    source: AttemptSource,
    status: AttemptStatus,
    now: i64,
) -> PaymentAttempt {
    PaymentAttempt {
        id: snowflake_id(),
        booking_id,
        purpose,
        source,
        processor_ref: None,
        redirect_url: None,
        success_url: None,
        cancel_url: None,
        amount: None,
        status,
        error_message: None,
        error_kind: None,
        idempotency_key: uuid::Uuid::new_v4().to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn is_stale(attempt: Option<&PaymentAttempt>) -> bool {
    attempt.is_some_and(|a| matches!(a.status, AttemptStatus::Superseded | AttemptStatus::Expired))
}

fn setup_error(booking_id: i64, err: ProcessorError) -> SweepError {
    match err {
        ProcessorError::Unavailable(msg) => SweepError::ProcessorUnavailable(msg),
        ProcessorError::CardDeclined {
            message,
            decline_code,
            ..
        } => SweepError::CardDeclined {
            booking_id,
            message,
            decline_code,
        },
        ProcessorError::Rejected { message, .. } => SweepError::PaymentFailed(message),
    }
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    storage: Storage,
    bus: ChangeBus,
    processor: Arc<dyn PaymentProcessor>,
    email: EmailPipeline,
    settings: PaymentSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        storage: Storage,
        bus: ChangeBus,
        processor: Arc<dyn PaymentProcessor>,
        email: EmailPipeline,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            storage,
            bus,
            processor,
            email,
            settings,
        }
    }

    fn email_for(&self, booking: &Booking, template: EmailTemplate, key: String) -> QueueSend {
        booking_email(booking, template, key, &self.settings.currency, json!({}))
    }

    async fn send_all(&self, notifications: Vec<QueueSend>) {
        for req in notifications {
            self.email.notify(req).await;
        }
    }

    /// `completed → charged`, audited in the caller's transaction
    fn mark_charged(
        &self,
        txn: &WriteTransaction,
        actor: &str,
        booking: &mut Booking,
        payment_intent_id: &str,
    ) -> SweepResult<()> {
        booking.last_payment_error = None;
        apply_transition(&self.storage, txn, booking, BookingStatus::Charged)?;
        self.storage.append_audit(
            txn,
            Some(&booking.organization_id),
            AuditAction::BookingCharged,
            "booking",
            &booking.id.to_string(),
            actor,
            json!({ "amount": booking.amount, "payment_intent_id": payment_intent_id }),
        )?;
        Ok(())
    }

    /// `completed → payment_failed` with the processor error kept on the row
    fn fail_charge(
        &self,
        txn: &WriteTransaction,
        actor: &str,
        booking: &mut Booking,
        failure: &ChargeFailure,
        attempt_id: Option<i64>,
    ) -> SweepResult<QueueSend> {
        if let Some(pi) = &failure.payment_intent_id {
            booking.payment_intent_id = Some(pi.clone());
        }
        booking.last_payment_error = Some(failure.message.clone());
        if !advance_if_allowed(&self.storage, txn, booking, BookingStatus::PaymentFailed)? {
            booking.updated_at = now_millis();
            self.storage.put_booking(txn, booking)?;
        }
        self.storage.append_audit(
            txn,
            Some(&booking.organization_id),
            AuditAction::ChargeFailed,
            "booking",
            &booking.id.to_string(),
            actor,
            json!({
                "error": failure.message,
                "decline_code": failure.decline_code,
                "payment_intent_id": failure.payment_intent_id,
                "attempt_id": attempt_id,
            }),
        )?;
        tracing::warn!(booking_id = booking.id, error = %failure.message, "Charge failed");

        let key = match (&failure.payment_intent_id, attempt_id) {
            (Some(pi), _) => format!("payment_failed:{pi}"),
            (None, Some(id)) => format!("payment_failed:attempt:{id}"),
            (None, None) => format!("payment_failed:{}", booking.id),
        };
        Ok(booking_email(
            booking,
            EmailTemplate::PaymentFailed,
            key,
            &self.settings.currency,
            json!({ "error": failure.message }),
        ))
    }

    pub fn list_attempts(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
    ) -> SweepResult<Vec<PaymentAttempt>> {
        ctx.require_dispatcher()?;
        self.storage
            .get_booking(booking_id)?
            .filter(|b| ctx.can_see(&b.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))?;
        Ok(self.storage.list_attempts(booking_id)?)
    }

    // ========== Card collection ==========

    /// Reserve a setup attempt, superseding any active one.
    ///
    /// With `reuse_urls` set, a young open checkout session for the same
    /// redirect URLs is returned instead.
    fn reserve_setup(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        source: AttemptSource,
        reuse_urls: Option<(&str, &str)>,
    ) -> SweepResult<SetupStart> {
        let now = now_millis();
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;

        let status = booking.status.normalized();
        if !matches!(status, BookingStatus::PendingCard | BookingStatus::PaymentFailed) {
            return Err(SweepError::InvalidTransition {
                booking_id,
                from: booking.status,
                to: BookingStatus::PendingCard,
            });
        }

        let attempts = self.storage.list_attempts_txn(&txn, booking_id)?;
        let active: Vec<&PaymentAttempt> = attempts
            .iter()
            .filter(|a| a.purpose == PaymentPurpose::Setup && a.status.is_active())
            .collect();

        if let Some((success_url, cancel_url)) = reuse_urls
            && status == BookingStatus::PendingCard
            && let Some(open) = active.iter().find(|a| {
                a.source == AttemptSource::CheckoutSession
                    && a.status == AttemptStatus::Open
                    && a.success_url.as_deref() == Some(success_url)
                    && a.cancel_url.as_deref() == Some(cancel_url)
                    && now - a.created_at < CHECKOUT_REUSE_WINDOW_MS
            })
            && let (Some(session_id), Some(url)) = (&open.processor_ref, &open.redirect_url)
        {
            tracing::debug!(booking_id, session_id = %session_id, "Reusing open checkout session");
            return Ok(SetupStart::Reused(CheckoutLink {
                booking_id,
                attempt_id: open.id,
                session_id: session_id.clone(),
                url: url.clone(),
                reused: true,
            }));
        }

        if active
            .iter()
            .any(|a| a.processor_ref.is_none() && now - a.created_at < RESERVATION_TIMEOUT_MS)
        {
            return Err(SweepError::PaymentInProgress(booking_id));
        }

        let mut stale_sessions = Vec::new();
        for previous in active {
            let mut previous = previous.clone();
            previous.status = AttemptStatus::Superseded;
            previous.updated_at = now;
            if previous.source == AttemptSource::CheckoutSession
                && let Some(session_id) = &previous.processor_ref
            {
                stale_sessions.push(session_id.clone());
            }
            self.storage.put_attempt(&txn, &previous)?;
        }

        // A card update after a failed charge keeps `payment_failed`; only a
        // failed setup restarts card collection.
        let failed_charge = attempts.iter().any(|a| a.purpose == PaymentPurpose::Charge);
        if status == BookingStatus::PaymentFailed && !failed_charge {
            apply_transition(&self.storage, &txn, &mut booking, BookingStatus::PendingCard)?;
        }

        let mut attempt = new_attempt(
            booking_id,
            PaymentPurpose::Setup,
            source,
            AttemptStatus::Open,
            now,
        );
        if let Some((success_url, cancel_url)) = reuse_urls {
            attempt.success_url = Some(success_url.to_string());
            attempt.cancel_url = Some(cancel_url.to_string());
        }
        self.storage.put_attempt(&txn, &attempt)?;
        txn.commit()?;

        Ok(SetupStart::Reserved(Reservation {
            booking,
            attempt,
            stale_sessions,
        }))
    }

    /// Customer ids are write-once per booking. The deterministic key makes
    /// a retried creation return the same customer.
    async fn ensure_customer(&self, booking: &Booking) -> Result<String, ProcessorError> {
        if let Some(customer_id) = &booking.customer_id {
            return Ok(customer_id.clone());
        }
        self.processor
            .create_customer(&CustomerRequest {
                booking_id: booking.id,
                email: booking.email.clone(),
                name: booking.customer_name.clone(),
                idempotency_key: format!("customer-{}", booking.id),
            })
            .await
    }

    async fn expire_sessions(&self, sessions: Vec<String>) {
        for session_id in sessions {
            if let Err(e) = self.processor.expire_checkout_session(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Could not expire superseded checkout session");
            }
        }
    }

    /// Mark a reserved attempt failed after a processor error
    fn fail_attempt(&self, attempt_id: i64, err: &ProcessorError) {
        let result: SweepResult<()> = (|| {
            let txn = self.storage.begin_write()?;
            if let Some(mut attempt) = self.storage.get_attempt_txn(&txn, attempt_id)? {
                record_attempt_error(&mut attempt, err);
                self.storage.put_attempt(&txn, &attempt)?;
            }
            txn.commit()?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::error!(attempt_id, error = %e, "Failed to record payment attempt error");
        }
    }

    /// Open a "collect card, do not charge" checkout session.
    ///
    /// A second call returns the open session while it is still usable,
    /// otherwise the previous session is expired and superseded.
    pub async fn create_checkout_session(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        success_url: Option<String>,
        cancel_url: Option<String>,
    ) -> SweepResult<CheckoutLink> {
        let success_url = success_url.unwrap_or_else(|| self.settings.success_url.clone());
        let cancel_url = cancel_url.unwrap_or_else(|| self.settings.cancel_url.clone());

        let reservation = match self.reserve_setup(
            ctx,
            booking_id,
            AttemptSource::CheckoutSession,
            Some((&success_url, &cancel_url)),
        )? {
            SetupStart::Reused(link) => return Ok(link),
            SetupStart::Reserved(r) => r,
        };
        let Reservation {
            booking,
            attempt,
            stale_sessions,
        } = reservation;
        self.expire_sessions(stale_sessions).await;

        let outcome = async {
            let customer_id = self.ensure_customer(&booking).await?;
            let session = self
                .processor
                .create_checkout_session(&CheckoutSessionRequest {
                    booking_id,
                    attempt_id: attempt.id,
                    customer_id: customer_id.clone(),
                    currency: self.settings.currency.clone(),
                    success_url: success_url.clone(),
                    cancel_url: cancel_url.clone(),
                    idempotency_key: attempt.idempotency_key.clone(),
                })
                .await?;
            Ok::<_, ProcessorError>((customer_id, session))
        }
        .await;

        let (customer_id, session) = match outcome {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(booking_id, error = %e, "Checkout session creation failed");
                self.fail_attempt(attempt.id, &e);
                return Err(setup_error(booking_id, e));
            }
        };

        let txn = self.storage.begin_write()?;
        let mut booking = self
            .storage
            .get_booking_txn(&txn, booking_id)?
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))?;
        let mut attempt = self
            .storage
            .get_attempt_txn(&txn, attempt.id)?
            .ok_or_else(|| SweepError::not_found(Resource::PaymentAttempt, attempt.id))?;

        let now = now_millis();
        if booking.customer_id.is_none() {
            booking.customer_id = Some(customer_id);
        }
        booking.checkout_session_id = Some(session.id.clone());
        booking.updated_at = now;
        attempt.processor_ref = Some(session.id.clone());
        attempt.redirect_url = Some(session.url.clone());
        attempt.updated_at = now;
        self.storage.put_booking(&txn, &booking)?;
        self.storage.put_attempt(&txn, &attempt)?;
        txn.commit()?;

        tracing::info!(booking_id, session_id = %session.id, "Checkout session created");
        publish_booking(&self.bus, &booking);
        Ok(CheckoutLink {
            booking_id,
            attempt_id: attempt.id,
            session_id: session.id,
            url: session.url,
            reused: false,
        })
    }

    /// Bare setup intent for an embedded card form. Supersedes any open
    /// checkout session.
    pub async fn create_setup_intent(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
    ) -> SweepResult<SetupIntentLink> {
        // Without redirect URLs nothing is reused
        let SetupStart::Reserved(Reservation {
            booking,
            attempt,
            stale_sessions,
        }) = self.reserve_setup(ctx, booking_id, AttemptSource::SetupIntent, None)?
        else {
            return Err(SweepError::PaymentInProgress(booking_id));
        };
        self.expire_sessions(stale_sessions).await;

        let outcome = async {
            let customer_id = self.ensure_customer(&booking).await?;
            let intent = self
                .processor
                .create_setup_intent(&SetupIntentRequest {
                    booking_id,
                    attempt_id: attempt.id,
                    customer_id: customer_id.clone(),
                    idempotency_key: attempt.idempotency_key.clone(),
                })
                .await?;
            Ok::<_, ProcessorError>((customer_id, intent))
        }
        .await;

        let (customer_id, intent) = match outcome {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(booking_id, error = %e, "Setup intent creation failed");
                self.fail_attempt(attempt.id, &e);
                return Err(setup_error(booking_id, e));
            }
        };

        let txn = self.storage.begin_write()?;
        let mut booking = self
            .storage
            .get_booking_txn(&txn, booking_id)?
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))?;
        let mut attempt = self
            .storage
            .get_attempt_txn(&txn, attempt.id)?
            .ok_or_else(|| SweepError::not_found(Resource::PaymentAttempt, attempt.id))?;

        let now = now_millis();
        if booking.customer_id.is_none() {
            booking.customer_id = Some(customer_id);
        }
        booking.setup_intent_id = Some(intent.id.clone());
        booking.updated_at = now;
        attempt.processor_ref = Some(intent.id.clone());
        attempt.updated_at = now;
        self.storage.put_booking(&txn, &booking)?;
        self.storage.put_attempt(&txn, &attempt)?;
        txn.commit()?;

        tracing::info!(booking_id, setup_intent_id = %intent.id, "Setup intent created");
        publish_booking(&self.bus, &booking);
        Ok(SetupIntentLink {
            booking_id,
            attempt_id: attempt.id,
            setup_intent_id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    // ========== Charging ==========

    /// Charge the saved card of a completed booking.
    ///
    /// Success moves the booking to `charged`. A decline moves it to
    /// `payment_failed` with the processor error persisted. "Requires
    /// action" and an unavailable processor leave it `completed`.
    pub async fn charge_completed_job(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        job: ChargeJob,
    ) -> SweepResult<ChargeReceipt> {
        ctx.require_dispatcher()?;
        let now = now_millis();

        // Phase 1: validate and reserve
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        if booking.status.normalized() != BookingStatus::Completed {
            return Err(SweepError::InvalidTransition {
                booking_id,
                from: booking.status,
                to: BookingStatus::Charged,
            });
        }

        let amount = match (booking.amount, job.amount) {
            (Some(current), Some(requested)) if current != requested => {
                return Err(SweepError::validation(format!(
                    "amount {requested} does not match booking amount {current}"
                )));
            }
            (Some(current), _) => current,
            (None, Some(requested)) => requested,
            (None, None) => return Err(SweepError::AmountRequired(booking_id)),
        };
        if amount <= 0 {
            return Err(SweepError::validation("amount must be greater than zero to charge"));
        }

        let (Some(customer_id), Some(payment_method_id)) =
            (booking.customer_id.clone(), booking.payment_method_id.clone())
        else {
            return Err(SweepError::NoSavedPaymentMethod(booking_id));
        };

        let mut attempts = self.storage.list_attempts_txn(&txn, booking_id)?;
        // Reserved but never recorded (crash mid-call): outcome unknown
        for abandoned in attempts.iter_mut().filter(|a| {
            a.purpose == PaymentPurpose::Charge
                && a.status == AttemptStatus::Processing
                && a.processor_ref.is_none()
                && now - a.created_at >= RESERVATION_TIMEOUT_MS
        }) {
            abandoned.status = AttemptStatus::Failed;
            abandoned.error_kind = Some(ERROR_KIND_UNAVAILABLE.to_string());
            abandoned.error_message = Some("reservation abandoned".to_string());
            abandoned.updated_at = now;
            self.storage.put_attempt(&txn, abandoned)?;
            tracing::warn!(booking_id, attempt_id = abandoned.id, "Abandoned charge reservation released");
        }
        if attempts
            .iter()
            .any(|a| a.purpose == PaymentPurpose::Charge && a.status.is_active())
        {
            return Err(SweepError::PaymentInProgress(booking_id));
        }

        let mut attempt = new_attempt(
            booking_id,
            PaymentPurpose::Charge,
            AttemptSource::PaymentIntent,
            AttemptStatus::Processing,
            now,
        );
        attempt.amount = Some(amount);
        // Unknown outcome last time: same key, so the processor dedupes
        if let Some(previous) = attempts
            .iter()
            .rev()
            .find(|a| a.purpose == PaymentPurpose::Charge)
            .filter(|a| {
                a.error_kind.as_deref() == Some(ERROR_KIND_UNAVAILABLE) && a.amount == Some(amount)
            })
        {
            attempt.idempotency_key = previous.idempotency_key.clone();
        }

        if booking.amount.is_none() {
            booking.amount = Some(amount);
            booking.updated_at = now;
            self.storage.put_booking(&txn, &booking)?;
            self.storage.append_audit(
                &txn,
                Some(&booking.organization_id),
                AuditAction::BookingAmountChanged,
                "booking",
                &booking_id.to_string(),
                &ctx.subject_id,
                json!({ "from": null, "to": amount }),
            )?;
        }
        self.storage.put_attempt(&txn, &attempt)?;
        txn.commit()?;

        // Phase 2: processor call
        let description = job.description.unwrap_or_else(|| match booking.service_date {
            Some(date) => format!("Cleaning on {date}"),
            None => format!("Cleaning booking {booking_id}"),
        });
        tracing::info!(booking_id, attempt_id = attempt.id, amount, "Charging saved card");
        let result = self
            .processor
            .charge(&ChargeRequest {
                booking_id,
                attempt_id: attempt.id,
                customer_id,
                payment_method_id,
                amount,
                currency: self.settings.currency.clone(),
                description,
                idempotency_key: attempt.idempotency_key.clone(),
            })
            .await;

        // Phase 3: record
        let txn = self.storage.begin_write()?;
        let mut booking = self
            .storage
            .get_booking_txn(&txn, booking_id)?
            .ok_or_else(|| SweepError::not_found(Resource::Booking, booking_id))?;
        let mut attempt = self
            .storage
            .get_attempt_txn(&txn, attempt.id)?
            .ok_or_else(|| SweepError::not_found(Resource::PaymentAttempt, attempt.id))?;
        let attempt_id = attempt.id;
        let now = now_millis();
        attempt.updated_at = now;
        let mut notifications = Vec::new();

        let outcome = match result {
            Ok(ChargeResult::Succeeded { payment_intent_id }) => {
                attempt.status = AttemptStatus::Succeeded;
                attempt.processor_ref = Some(payment_intent_id.clone());
                booking.payment_intent_id = Some(payment_intent_id.clone());
                match booking.status.normalized() {
                    BookingStatus::Completed => {
                        self.mark_charged(&txn, &ctx.subject_id, &mut booking, &payment_intent_id)?;
                        notifications.push(self.email_for(
                            &booking,
                            EmailTemplate::Receipt,
                            format!("receipt:{booking_id}"),
                        ));
                    }
                    // A fast webhook got there first
                    BookingStatus::Charged => {}
                    status => {
                        tracing::error!(
                            booking_id,
                            %status,
                            payment_intent_id = %payment_intent_id,
                            "Charge succeeded but booking left its completed state"
                        );
                        booking.updated_at = now;
                        self.storage.put_booking(&txn, &booking)?;
                    }
                }
                Ok(ChargeReceipt {
                    booking_id,
                    attempt_id,
                    payment_intent_id,
                    amount,
                    state: ChargeState::Charged,
                })
            }
            Ok(ChargeResult::Processing { payment_intent_id }) => {
                attempt.processor_ref = Some(payment_intent_id.clone());
                booking.payment_intent_id = Some(payment_intent_id.clone());
                booking.updated_at = now;
                self.storage.put_booking(&txn, &booking)?;
                Ok(ChargeReceipt {
                    booking_id,
                    attempt_id,
                    payment_intent_id,
                    amount,
                    state: ChargeState::Processing,
                })
            }
            Ok(ChargeResult::RequiresAction {
                payment_intent_id,
                client_secret,
            }) => {
                attempt.status = AttemptStatus::RequiresAction;
                attempt.processor_ref = Some(payment_intent_id.clone());
                booking.payment_intent_id = Some(payment_intent_id.clone());
                booking.updated_at = now;
                self.storage.put_booking(&txn, &booking)?;
                self.storage.append_audit(
                    &txn,
                    Some(&booking.organization_id),
                    AuditAction::ChargeRequiresAction,
                    "booking",
                    &booking_id.to_string(),
                    &ctx.subject_id,
                    json!({ "payment_intent_id": payment_intent_id, "attempt_id": attempt_id }),
                )?;
                notifications.push(self.email_for(
                    &booking,
                    EmailTemplate::PaymentActionRequired,
                    format!("payment_action_required:{payment_intent_id}"),
                ));
                Err(SweepError::RequiresAction {
                    booking_id,
                    payment_intent_id,
                    client_secret,
                })
            }
            Err(err) => {
                record_attempt_error(&mut attempt, &err);
                match err {
                    ProcessorError::Unavailable(msg) => {
                        tracing::warn!(booking_id, attempt_id, error = %msg, "Charge outcome unknown, booking stays completed");
                        Err(SweepError::ProcessorUnavailable(msg))
                    }
                    ProcessorError::CardDeclined {
                        message,
                        decline_code,
                        payment_intent_id,
                    } => {
                        let failure = ChargeFailure {
                            message: message.clone(),
                            decline_code: decline_code.clone(),
                            payment_intent_id,
                        };
                        if let Some(pi) = &failure.payment_intent_id {
                            attempt.processor_ref = Some(pi.clone());
                        }
                        notifications.push(self.fail_charge(
                            &txn,
                            &ctx.subject_id,
                            &mut booking,
                            &failure,
                            Some(attempt_id),
                        )?);
                        Err(SweepError::CardDeclined {
                            booking_id,
                            message,
                            decline_code,
                        })
                    }
                    ProcessorError::Rejected {
                        message,
                        code,
                        payment_intent_id,
                    } => {
                        let failure = ChargeFailure {
                            message: message.clone(),
                            decline_code: code,
                            payment_intent_id,
                        };
                        if let Some(pi) = &failure.payment_intent_id {
                            attempt.processor_ref = Some(pi.clone());
                        }
                        notifications.push(self.fail_charge(
                            &txn,
                            &ctx.subject_id,
                            &mut booking,
                            &failure,
                            Some(attempt_id),
                        )?);
                        Err(SweepError::PaymentFailed(message))
                    }
                }
            }
        };

        self.storage.put_attempt(&txn, &attempt)?;
        txn.commit()?;

        publish_booking(&self.bus, &booking);
        self.send_all(notifications).await;
        outcome
    }

    /// `payment_failed → completed`, then charge again. Only for failures
    /// that came from a charge; a failed card setup needs a new checkout.
    pub async fn retry_failed_charge(
        &self,
        ctx: &RequestContext,
        booking_id: i64,
        job: ChargeJob,
    ) -> SweepResult<ChargeReceipt> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let mut booking = load_booking(&self.storage, &txn, ctx, booking_id)?;
        if booking.status.normalized() != BookingStatus::PaymentFailed {
            return Err(SweepError::InvalidTransition {
                booking_id,
                from: booking.status,
                to: BookingStatus::Completed,
            });
        }
        let charged_before = self
            .storage
            .list_attempts_txn(&txn, booking_id)?
            .iter()
            .any(|a| a.purpose == PaymentPurpose::Charge);
        if !charged_before {
            return Err(SweepError::validation(
                "card setup failed for this booking; collect a new card instead",
            ));
        }
        apply_transition(&self.storage, &txn, &mut booking, BookingStatus::Completed)?;
        txn.commit()?;
        publish_booking(&self.bus, &booking);

        self.charge_completed_job(ctx, booking_id, job).await
    }

    // ========== Webhook reconciliation ==========

    fn resolve_booking(
        &self,
        txn: &WriteTransaction,
        event: &ProcessorEvent,
    ) -> SweepResult<Option<Booking>> {
        let by_ref = match &event.kind {
            ProcessorEventKind::CheckoutCompleted { session_id, .. }
            | ProcessorEventKind::CheckoutExpired { session_id } => self
                .storage
                .find_booking_id_txn(txn, BookingRef::CheckoutSession(session_id))?,
            ProcessorEventKind::SetupSucceeded {
                setup_intent_id, ..
            }
            | ProcessorEventKind::SetupFailed {
                setup_intent_id, ..
            } => self
                .storage
                .find_booking_id_txn(txn, BookingRef::SetupIntent(setup_intent_id))?,
            ProcessorEventKind::PaymentSucceeded { payment_intent_id }
            | ProcessorEventKind::PaymentFailed {
                payment_intent_id, ..
            }
            | ProcessorEventKind::PaymentRequiresAction { payment_intent_id } => self
                .storage
                .find_booking_id_txn(txn, BookingRef::PaymentIntent(payment_intent_id))?,
            ProcessorEventKind::Unhandled => None,
        };
        match by_ref.or(event.booking_hint) {
            Some(id) => Ok(self.storage.get_booking_txn(txn, id)?),
            None => Ok(None),
        }
    }

    fn resolve_attempt(
        &self,
        txn: &WriteTransaction,
        booking_id: i64,
        event: &ProcessorEvent,
    ) -> SweepResult<Option<PaymentAttempt>> {
        if let Some(id) = event.attempt_hint
            && let Some(attempt) = self.storage.get_attempt_txn(txn, id)?
            && attempt.booking_id == booking_id
        {
            return Ok(Some(attempt));
        }
        match event.kind.object_id() {
            Some(object_id) => Ok(self
                .storage
                .find_attempt_by_ref_txn(txn, booking_id, object_id)?),
            None => Ok(None),
        }
    }

    /// Apply one verified processor event at most once
    pub async fn handle_event(&self, event: &ProcessorEvent) -> SweepResult<EventOutcome> {
        let txn = self.storage.begin_write()?;
        if self
            .storage
            .is_event_processed_txn(&txn, EVENT_SOURCE, &event.id)?
        {
            tracing::info!(event_id = %event.id, "Duplicate processor event, skipping");
            return Ok(EventOutcome::Duplicate);
        }

        if event.kind == ProcessorEventKind::Unhandled {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Unhandled processor event type");
            self.storage
                .mark_event_processed(&txn, EVENT_SOURCE, &event.id)?;
            txn.commit()?;
            return Ok(EventOutcome::Ignored);
        }

        let Some(mut booking) = self.resolve_booking(&txn, event)? else {
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                object_id = ?event.kind.object_id(),
                "Processor event matches no booking"
            );
            self.storage
                .mark_event_processed(&txn, EVENT_SOURCE, &event.id)?;
            txn.commit()?;
            return Ok(EventOutcome::Ignored);
        };

        let attempt = self.resolve_attempt(&txn, booking.id, event)?;
        let status_before = booking.status;
        let mut notifications = Vec::new();
        let outcome = self.reconcile(&txn, event, &mut booking, attempt, &mut notifications)?;

        self.storage
            .mark_event_processed(&txn, EVENT_SOURCE, &event.id)?;
        txn.commit()?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            booking_id = booking.id,
            outcome = ?outcome,
            "Processor event handled"
        );
        if outcome == EventOutcome::Applied || booking.status != status_before {
            publish_booking(&self.bus, &booking);
        }
        self.send_all(notifications).await;
        Ok(outcome)
    }

    fn reconcile(
        &self,
        txn: &WriteTransaction,
        event: &ProcessorEvent,
        booking: &mut Booking,
        mut attempt: Option<PaymentAttempt>,
        notifications: &mut Vec<QueueSend>,
    ) -> SweepResult<EventOutcome> {
        let now = now_millis();
        if is_stale(attempt.as_ref()) {
            tracing::info!(
                event_id = %event.id,
                booking_id = booking.id,
                "Event for a superseded attempt, ignoring"
            );
            return Ok(EventOutcome::Ignored);
        }

        let outcome = match &event.kind {
            ProcessorEventKind::CheckoutCompleted {
                session_id,
                setup_intent_id,
                customer_id,
            } => {
                let mut changed = false;
                if booking.customer_id.is_none()
                    && let Some(customer_id) = customer_id
                {
                    booking.customer_id = Some(customer_id.clone());
                    changed = true;
                }
                if let Some(setup_intent_id) = setup_intent_id {
                    // The setup intent event may carry no metadata; index it
                    // so it still resolves to this booking.
                    self.storage.index_booking_ref(
                        txn,
                        BookingRef::SetupIntent(setup_intent_id),
                        booking.id,
                    )?;
                    let current_session =
                        booking.checkout_session_id.as_deref() == Some(session_id.as_str());
                    if booking.setup_intent_id.as_deref() != Some(setup_intent_id.as_str())
                        && (booking.setup_intent_id.is_none() || current_session)
                    {
                        booking.setup_intent_id = Some(setup_intent_id.clone());
                        changed = true;
                    }
                }
                if changed {
                    booking.updated_at = now;
                    self.storage.put_booking(txn, booking)?;
                    EventOutcome::Applied
                } else {
                    EventOutcome::Duplicate
                }
            }

            ProcessorEventKind::CheckoutExpired { .. } => match attempt.as_mut() {
                Some(a) if a.status.is_active() => {
                    a.status = AttemptStatus::Expired;
                    a.updated_at = now;
                    self.storage.put_attempt(txn, a)?;
                    EventOutcome::Applied
                }
                _ => EventOutcome::Ignored,
            },

            ProcessorEventKind::SetupSucceeded {
                setup_intent_id,
                payment_method_id,
                customer_id,
            } => {
                let Some(payment_method_id) = payment_method_id else {
                    tracing::warn!(event_id = %event.id, "Setup intent succeeded without a payment method");
                    return Ok(EventOutcome::Ignored);
                };
                if let Some(a) = attempt.as_mut().filter(|a| a.status.is_active()) {
                    a.status = AttemptStatus::Succeeded;
                    a.updated_at = now;
                    self.storage.put_attempt(txn, a)?;
                }
                if booking.status.is_terminal() {
                    tracing::warn!(booking_id = booking.id, status = %booking.status, "Card saved on a closed booking, ignoring");
                    return Ok(EventOutcome::Ignored);
                }
                // Past card collection: a late confirmation is a no-op
                if booking.status.has_reached(BookingStatus::CardSaved) {
                    return Ok(EventOutcome::Duplicate);
                }

                let charged_before = self
                    .storage
                    .list_attempts_txn(txn, booking.id)?
                    .iter()
                    .any(|a| a.purpose == PaymentPurpose::Charge);
                // pending_card, or payment_failed after a failed setup
                let collecting = !charged_before;
                if !collecting
                    && booking.payment_method_id.as_deref() == Some(payment_method_id.as_str())
                {
                    return Ok(EventOutcome::Duplicate);
                }

                booking.payment_method_id = Some(payment_method_id.clone());
                if booking.setup_intent_id.is_none() {
                    booking.setup_intent_id = Some(setup_intent_id.clone());
                }
                if booking.customer_id.is_none() {
                    booking.customer_id = customer_id.clone();
                }
                booking.last_payment_error = None;
                booking.updated_at = now;
                self.storage.index_booking_ref(
                    txn,
                    BookingRef::SetupIntent(setup_intent_id),
                    booking.id,
                )?;

                if collecting {
                    if booking.status.normalized() == BookingStatus::PaymentFailed {
                        apply_transition(&self.storage, txn, booking, BookingStatus::PendingCard)?;
                    }
                    apply_transition(&self.storage, txn, booking, BookingStatus::CardSaved)?;
                    notifications.push(self.email_for(
                        booking,
                        EmailTemplate::CardSaved,
                        format!("card_saved:{}", booking.id),
                    ));
                } else {
                    // Card update after a declined charge; stays payment_failed
                    self.storage.put_booking(txn, booking)?;
                }
                self.storage.append_audit(
                    txn,
                    Some(&booking.organization_id),
                    AuditAction::CardSaved,
                    "booking",
                    &booking.id.to_string(),
                    ACTOR,
                    json!({ "setup_intent_id": setup_intent_id, "card_update": !collecting }),
                )?;
                EventOutcome::Applied
            }

            ProcessorEventKind::SetupFailed { message, .. } => {
                if let Some(a) = attempt.as_mut().filter(|a| a.status.is_active()) {
                    a.status = AttemptStatus::Failed;
                    a.error_message = message.clone();
                    a.updated_at = now;
                    self.storage.put_attempt(txn, a)?;
                }
                match booking.status.normalized() {
                    BookingStatus::PendingCard => {
                        booking.last_payment_error =
                            Some(message.clone().unwrap_or_else(|| "card setup failed".into()));
                        apply_transition(&self.storage, txn, booking, BookingStatus::PaymentFailed)?;
                        EventOutcome::Applied
                    }
                    BookingStatus::PaymentFailed => EventOutcome::Duplicate,
                    _ => EventOutcome::Ignored,
                }
            }

            ProcessorEventKind::PaymentSucceeded { payment_intent_id } => {
                if let Some(a) = attempt.as_mut()
                    && a.status != AttemptStatus::Succeeded
                {
                    a.status = AttemptStatus::Succeeded;
                    a.processor_ref = Some(payment_intent_id.clone());
                    a.error_message = None;
                    a.error_kind = None;
                    a.updated_at = now;
                    self.storage.put_attempt(txn, a)?;
                }
                let current_intent =
                    booking.payment_intent_id.as_deref() == Some(payment_intent_id.as_str());
                match booking.status.normalized() {
                    BookingStatus::Charged => EventOutcome::Duplicate,
                    status @ (BookingStatus::Completed | BookingStatus::PaymentFailed)
                        if status == BookingStatus::Completed || current_intent =>
                    {
                        if status == BookingStatus::PaymentFailed {
                            apply_transition(&self.storage, txn, booking, BookingStatus::Completed)?;
                        }
                        booking.payment_intent_id = Some(payment_intent_id.clone());
                        self.mark_charged(txn, ACTOR, booking, payment_intent_id)?;
                        notifications.push(self.email_for(
                            booking,
                            EmailTemplate::Receipt,
                            format!("receipt:{}", booking.id),
                        ));
                        EventOutcome::Applied
                    }
                    BookingStatus::Cancelled => {
                        tracing::error!(
                            booking_id = booking.id,
                            payment_intent_id = %payment_intent_id,
                            "Payment succeeded for a cancelled booking, needs manual refund"
                        );
                        EventOutcome::Ignored
                    }
                    other => {
                        tracing::warn!(booking_id = booking.id, status = %other, "Payment succeeded in unexpected status");
                        EventOutcome::Ignored
                    }
                }
            }

            ProcessorEventKind::PaymentFailed {
                payment_intent_id,
                message,
                decline_code,
            } => {
                if attempt
                    .as_ref()
                    .is_some_and(|a| a.status == AttemptStatus::Succeeded)
                {
                    return Ok(EventOutcome::Ignored);
                }
                if let Some(a) = attempt.as_mut()
                    && a.status.is_active()
                {
                    a.status = AttemptStatus::Failed;
                    a.processor_ref = Some(payment_intent_id.clone());
                    a.error_message = message.clone();
                    a.error_kind = decline_code.clone();
                    a.updated_at = now;
                    self.storage.put_attempt(txn, a)?;
                }
                // A failure of an older intent must not fail a newer charge
                let current_intent = booking
                    .payment_intent_id
                    .as_deref()
                    .is_none_or(|pi| pi == payment_intent_id);
                match booking.status.normalized() {
                    BookingStatus::Completed if current_intent => {
                        let failure = ChargeFailure {
                            message: message.clone().unwrap_or_else(|| "payment failed".into()),
                            decline_code: decline_code.clone(),
                            payment_intent_id: Some(payment_intent_id.clone()),
                        };
                        let attempt_id = attempt.as_ref().map(|a| a.id);
                        notifications.push(self.fail_charge(
                            txn, ACTOR, booking, &failure, attempt_id,
                        )?);
                        EventOutcome::Applied
                    }
                    BookingStatus::PaymentFailed => EventOutcome::Duplicate,
                    _ => EventOutcome::Ignored,
                }
            }
            ProcessorEventKind::PaymentRequiresAction { payment_intent_id } => {
                if booking.status.normalized() != BookingStatus::Completed {
                    return Ok(EventOutcome::Ignored);
                }
                let changed = match attempt.as_mut() {
                    Some(a) if a.status != AttemptStatus::RequiresAction => {
                        a.status = AttemptStatus::RequiresAction;
                        a.processor_ref = Some(payment_intent_id.clone());
                        a.updated_at = now;
                        self.storage.put_attempt(txn, a)?;
                        true
                    }
                    _ => false,
                };
                if booking.payment_intent_id.as_deref() != Some(payment_intent_id.as_str()) {
                    booking.payment_intent_id = Some(payment_intent_id.clone());
                    booking.updated_at = now;
                    self.storage.put_booking(txn, booking)?;
                }
                if changed {
                    notifications.push(self.email_for(
                        booking,
                        EmailTemplate::PaymentActionRequired,
                        format!("payment_action_required:{payment_intent_id}"),
                    ));
                    EventOutcome::Applied
                } else {
                    EventOutcome::Duplicate
                }
            }

            ProcessorEventKind::Unhandled => EventOutcome::Ignored,
        };
        Ok(outcome)
    }
}

fn record_attempt_error(attempt: &mut PaymentAttempt, err: &ProcessorError) {
    attempt.status = AttemptStatus::Failed;
    attempt.error_message = Some(err.to_string());
    attempt.error_kind = match err {
        ProcessorError::Unavailable(_) => Some(ERROR_KIND_UNAVAILABLE.to_string()),
        ProcessorError::CardDeclined { decline_code, .. } => decline_code.clone(),
        ProcessorError::Rejected { code, .. } => code.clone(),
    };
    attempt.updated_at = now_millis();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, ORG, booking_row, dispatcher};
    use shared::models::EmailSendStatus;

    fn pending(harness: &Harness, id: i64) -> Booking {
        let booking = booking_row(id, ORG);
        harness.put_booking(&booking);
        booking
    }

    fn event(id: &str, kind: ProcessorEventKind, booking_hint: Option<i64>) -> ProcessorEvent {
        ProcessorEvent {
            id: id.into(),
            event_type: "test".into(),
            kind,
            booking_hint,
            attempt_hint: None,
        }
    }

    fn card_saved(id: &str, booking_id: i64, pm: &str) -> ProcessorEvent {
        event(
            id,
            ProcessorEventKind::SetupSucceeded {
                setup_intent_id: format!("seti_{id}"),
                payment_method_id: Some(pm.into()),
                customer_id: Some(format!("cus_{booking_id}")),
            },
            Some(booking_id),
        )
    }

    fn declined() -> ProcessorError {
        ProcessorError::CardDeclined {
            message: "Your card has insufficient funds.".into(),
            decline_code: Some("insufficient_funds".into()),
            payment_intent_id: Some("pi_declined".into()),
        }
    }

    #[tokio::test]
    async fn checkout_session_is_reused_while_open() {
        let harness = Harness::new();
        pending(&harness, 1);

        let first = harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
        let second = harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(harness.processor.checkout_keys().len(), 1);
        assert_eq!(harness.processor.customer_keys(), vec!["customer-1".to_string()]);

        let booking = harness.booking(1);
        assert_eq!(booking.checkout_session_id.as_deref(), Some(first.session_id.as_str()));
        assert_eq!(booking.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(booking.status, BookingStatus::PendingCard);
    }

    #[tokio::test]
    async fn new_redirect_urls_supersede_the_open_session() {
        let harness = Harness::new();
        pending(&harness, 1);
        let first = harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
        let second = harness
            .payments
            .create_checkout_session(
                &dispatcher(),
                1,
                Some("https://other.test/ok".into()),
                None,
            )
            .await
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert_eq!(harness.processor.expired(), vec![first.session_id.clone()]);
        let attempts = harness.payments.list_attempts(&dispatcher(), 1).unwrap();
        assert_eq!(attempts.len(), 2);
        let superseded = attempts
            .iter()
            .find(|a| a.processor_ref.as_deref() == Some(first.session_id.as_str()))
            .unwrap();
        assert_eq!(superseded.status, AttemptStatus::Superseded);
        assert_eq!(
            attempts.iter().filter(|a| a.status == AttemptStatus::Open).count(),
            1
        );

        // The superseded session completing later changes nothing
        let mut late = card_saved("evt_late", 1, "pm_old");
        late.attempt_hint = Some(superseded.id);
        assert_eq!(
            harness.payments.handle_event(&late).await.unwrap(),
            EventOutcome::Ignored
        );
        assert_eq!(harness.booking(1).status, BookingStatus::PendingCard);
    }

    #[tokio::test]
    async fn checkout_failure_marks_attempt_failed() {
        let harness = Harness::new();
        pending(&harness, 1);
        harness
            .processor
            .fail_next_checkout(ProcessorError::Unavailable("timeout".into()));

        let err = harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::ProcessorUnavailable(_)));
        let attempts = harness.payments.list_attempts(&dispatcher(), 1).unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::Failed);

        // A retry is allowed right away
        harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn checkout_refused_once_card_saved() {
        let harness = Harness::new();
        let mut booking = booking_row(1, ORG);
        booking.status = BookingStatus::Scheduled;
        harness.put_booking(&booking);

        assert!(matches!(
            harness
                .payments
                .create_checkout_session(&dispatcher(), 1, None, None)
                .await,
            Err(SweepError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn setup_intent_records_id_and_supersedes_checkout() {
        let harness = Harness::new();
        pending(&harness, 1);
        let checkout = harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
        let intent = harness
            .payments
            .create_setup_intent(&dispatcher(), 1)
            .await
            .unwrap();

        assert!(intent.client_secret.ends_with("_secret"));
        assert_eq!(harness.processor.expired(), vec![checkout.session_id]);
        assert_eq!(
            harness.booking(1).setup_intent_id.as_deref(),
            Some(intent.setup_intent_id.as_str())
        );
    }

    #[tokio::test]
    async fn card_saved_event_applies_once() {
        let harness = Harness::new();
        pending(&harness, 1);

        let saved = card_saved("evt_1", 1, "pm_1");
        assert_eq!(
            harness.payments.handle_event(&saved).await.unwrap(),
            EventOutcome::Applied
        );
        assert_eq!(
            harness.payments.handle_event(&saved).await.unwrap(),
            EventOutcome::Duplicate
        );
        // Same outcome under a different event id
        assert_eq!(
            harness
                .payments
                .handle_event(&card_saved("evt_2", 1, "pm_1"))
                .await
                .unwrap(),
            EventOutcome::Duplicate
        );

        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::CardSaved);
        assert_eq!(booking.payment_method_id.as_deref(), Some("pm_1"));
        let sends = harness.storage.list_email_sends(ORG, Some(1)).unwrap();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].idempotency_key, "card_saved:1");
        assert_eq!(sends[0].status, EmailSendStatus::Sent);
    }

    #[tokio::test]
    async fn unmatched_event_is_ignored_but_recorded() {
        let harness = Harness::new();
        let orphan = event(
            "evt_1",
            ProcessorEventKind::PaymentSucceeded {
                payment_intent_id: "pi_unknown".into(),
            },
            None,
        );
        assert_eq!(
            harness.payments.handle_event(&orphan).await.unwrap(),
            EventOutcome::Ignored
        );
        assert_eq!(
            harness.payments.handle_event(&orphan).await.unwrap(),
            EventOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn setup_failure_then_new_card_recovers() {
        let harness = Harness::new();
        pending(&harness, 1);
        let failed = event(
            "evt_1",
            ProcessorEventKind::SetupFailed {
                setup_intent_id: "seti_x".into(),
                message: Some("card not supported".into()),
            },
            Some(1),
        );
        harness.payments.handle_event(&failed).await.unwrap();
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::PaymentFailed);
        assert_eq!(booking.last_payment_error.as_deref(), Some("card not supported"));

        // No charge was ever made, so a retry charge makes no sense
        assert!(matches!(
            harness
                .payments
                .retry_failed_charge(&dispatcher(), 1, ChargeJob::default())
                .await,
            Err(SweepError::Validation(_))
        ));

        harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
        assert_eq!(harness.booking(1).status, BookingStatus::PendingCard);

        harness
            .payments
            .handle_event(&card_saved("evt_2", 1, "pm_2"))
            .await
            .unwrap();
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::CardSaved);
        assert!(booking.last_payment_error.is_none());
    }

    #[tokio::test]
    async fn charge_requires_completed_booking() {
        let harness = Harness::new();
        let mut booking = booking_row(1, ORG);
        booking.status = BookingStatus::CardSaved;
        booking.amount = Some(15000);
        booking.customer_id = Some("cus_1".into());
        booking.payment_method_id = Some("pm_1".into());
        harness.put_booking(&booking);

        let err = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SweepError::InvalidTransition {
                to: BookingStatus::Charged,
                ..
            }
        ));
        assert!(harness.processor.charge_keys().is_empty());
        assert!(harness.payments.list_attempts(&dispatcher(), 1).unwrap().is_empty());
        let unchanged = harness.booking(1);
        assert_eq!(unchanged.status, BookingStatus::CardSaved);
        assert_eq!(unchanged.amount, Some(15000));
    }

    #[tokio::test]
    async fn supplied_amount_is_not_stored_on_an_unfinished_booking() {
        let harness = Harness::new();
        let mut booking = booking_row(2, ORG);
        booking.status = BookingStatus::Scheduled;
        booking.customer_id = Some("cus_2".into());
        booking.payment_method_id = Some("pm_2".into());
        harness.put_booking(&booking);

        let err = harness
            .payments
            .charge_completed_job(
                &dispatcher(),
                2,
                ChargeJob {
                    amount: Some(15000),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidTransition { .. }));
        assert!(harness.processor.charge_keys().is_empty());
        let unchanged = harness.booking(2);
        assert_eq!(unchanged.status, BookingStatus::Scheduled);
        assert_eq!(unchanged.amount, None);
    }

    #[tokio::test]
    async fn charge_without_saved_card_is_refused() {
        let harness = Harness::new();
        let mut booking = booking_row(1, ORG);
        booking.status = BookingStatus::Completed;
        booking.amount = Some(15000);
        harness.put_booking(&booking);

        assert!(matches!(
            harness
                .payments
                .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
                .await,
            Err(SweepError::NoSavedPaymentMethod(1))
        ));
    }

    #[tokio::test]
    async fn charge_amount_must_match() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        let job = ChargeJob {
            amount: Some(9900),
            description: None,
        };
        assert!(matches!(
            harness.payments.charge_completed_job(&dispatcher(), 1, job).await,
            Err(SweepError::Validation(_))
        ));
        assert_eq!(harness.booking(1).status, BookingStatus::Completed);
    }

    #[tokio::test]
    async fn successful_charge_moves_to_charged_and_sends_receipt() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);

        let receipt = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap();
        assert_eq!(receipt.state, ChargeState::Charged);
        assert_eq!(receipt.amount, 15000);

        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::Charged);
        assert_eq!(
            booking.payment_intent_id.as_deref(),
            Some(receipt.payment_intent_id.as_str())
        );
        assert_eq!(harness.mailer.sent().len(), 1);
        assert!(harness.mailer.sent()[0].subject.contains("Receipt"));

        // Webhook for the same intent arrives afterwards
        let late = event(
            "evt_pi",
            ProcessorEventKind::PaymentSucceeded {
                payment_intent_id: receipt.payment_intent_id.clone(),
            },
            Some(1),
        );
        assert_eq!(
            harness.payments.handle_event(&late).await.unwrap(),
            EventOutcome::Duplicate
        );

        assert!(matches!(
            harness
                .payments
                .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
                .await,
            Err(SweepError::InvalidTransition { .. })
        ));
        assert_eq!(harness.processor.charge_keys().len(), 1);
    }

    #[tokio::test]
    async fn decline_moves_to_payment_failed_and_retry_charges() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        harness.processor.queue_charge(Err(declined()));

        let err = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::CardDeclined { .. }));
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::PaymentFailed);
        assert_eq!(
            booking.last_payment_error.as_deref(),
            Some("Your card has insufficient funds.")
        );
        assert_eq!(
            harness
                .storage
                .list_audit(Some(ORG), Some(AuditAction::ChargeFailed), None, 10)
                .unwrap()
                .len(),
            1
        );

        let receipt = harness
            .payments
            .retry_failed_charge(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap();
        assert_eq!(receipt.state, ChargeState::Charged);
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::Charged);
        assert!(booking.last_payment_error.is_none());

        // Fresh key for a fresh attempt after a definite decline
        let keys = harness.processor.charge_keys();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn card_update_after_decline_keeps_payment_failed() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        harness.processor.queue_charge(Err(declined()));
        let _ = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await;

        harness
            .payments
            .create_checkout_session(&dispatcher(), 1, None, None)
            .await
            .unwrap();
        assert_eq!(harness.booking(1).status, BookingStatus::PaymentFailed);

        harness
            .payments
            .handle_event(&card_saved("evt_new_card", 1, "pm_new"))
            .await
            .unwrap();
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::PaymentFailed);
        assert_eq!(booking.payment_method_id.as_deref(), Some("pm_new"));
    }

    #[tokio::test]
    async fn unavailable_processor_keeps_completed_and_reuses_key() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        harness
            .processor
            .queue_charge(Err(ProcessorError::Unavailable("connection reset".into())));

        let err = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(harness.booking(1).status, BookingStatus::Completed);

        harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap();
        let keys = harness.processor.charge_keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn requires_action_is_not_a_failure() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        harness.processor.queue_charge(Ok(ChargeResult::RequiresAction {
            payment_intent_id: "pi_3ds".into(),
            client_secret: Some("pi_3ds_secret".into()),
        }));

        let err = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::RequiresAction { .. }));
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::Completed);
        assert!(booking.last_payment_error.is_none());

        // Blocked while the customer authenticates
        assert!(matches!(
            harness
                .payments
                .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
                .await,
            Err(SweepError::PaymentInProgress(1))
        ));

        // Authentication finished, processor confirms
        let done = event(
            "evt_ok",
            ProcessorEventKind::PaymentSucceeded {
                payment_intent_id: "pi_3ds".into(),
            },
            None,
        );
        assert_eq!(
            harness.payments.handle_event(&done).await.unwrap(),
            EventOutcome::Applied
        );
        assert_eq!(harness.booking(1).status, BookingStatus::Charged);
    }

    #[tokio::test]
    async fn processing_charge_settles_by_webhook_failure() {
        let harness = Harness::new();
        harness.completed_booking(1, 15000);
        harness.processor.queue_charge(Ok(ChargeResult::Processing {
            payment_intent_id: "pi_slow".into(),
        }));

        let receipt = harness
            .payments
            .charge_completed_job(&dispatcher(), 1, ChargeJob::default())
            .await
            .unwrap();
        assert_eq!(receipt.state, ChargeState::Processing);
        assert_eq!(harness.booking(1).status, BookingStatus::Completed);

        let failed = event(
            "evt_fail",
            ProcessorEventKind::PaymentFailed {
                payment_intent_id: "pi_slow".into(),
                message: Some("bank declined".into()),
                decline_code: Some("generic_decline".into()),
            },
            None,
        );
        assert_eq!(
            harness.payments.handle_event(&failed).await.unwrap(),
            EventOutcome::Applied
        );
        let booking = harness.booking(1);
        assert_eq!(booking.status, BookingStatus::PaymentFailed);
        assert_eq!(booking.last_payment_error.as_deref(), Some("bank declined"));

        let again = event("evt_fail_2", failed.kind.clone(), None);
        assert_eq!(
            harness.payments.handle_event(&again).await.unwrap(),
            EventOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn success_on_cancelled_booking_is_not_applied() {
        let harness = Harness::new();
        let mut booking = harness.completed_booking(1, 15000);
        booking.status = BookingStatus::Cancelled;
        booking.payment_intent_id = Some("pi_1".into());
        harness.put_booking(&booking);

        let ok = event(
            "evt_1",
            ProcessorEventKind::PaymentSucceeded {
                payment_intent_id: "pi_1".into(),
            },
            None,
        );
        assert_eq!(
            harness.payments.handle_event(&ok).await.unwrap(),
            EventOutcome::Ignored
        );
        assert_eq!(harness.booking(1).status, BookingStatus::Cancelled);
    }
}
