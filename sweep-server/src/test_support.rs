//! In-process doubles and fixtures for service tests

use crate::bookings::BookingService;
use crate::config::Config;
use crate::ingest::{EmailPipeline, IntakeService, Mailer, MailerError, OutgoingEmail};
use crate::notify::ChangeBus;
use crate::payments::{
    ChargeRequest, ChargeResult, CheckoutSession, CheckoutSessionRequest, CustomerRequest,
    PaymentOrchestrator, PaymentProcessor, PaymentSettings, ProcessorError, SetupIntent,
    SetupIntentRequest,
};
use crate::scheduling::Scheduler;
use crate::storage::Storage;
use async_trait::async_trait;
use shared::models::{Booking, BookingStatus};
use shared::{RequestContext, Role};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const ORG: &str = "org_1";

pub fn admin() -> RequestContext {
    RequestContext::new("user_admin", ORG, Role::Admin)
}

pub fn dispatcher() -> RequestContext {
    RequestContext::new("user_dispatch", ORG, Role::Dispatcher)
}

pub fn cleaner_user() -> RequestContext {
    RequestContext::new("user_cleaner", ORG, Role::Cleaner)
}

/// Development config with fixed test secrets
pub fn test_config() -> Config {
    Config {
        environment: "development".to_string(),
        http_port: 0,
        data_dir: "data".to_string(),
        log_dir: None,
        log_level: "debug".to_string(),
        stripe_secret_key: "sk_test".to_string(),
        stripe_webhook_secret: "whsec_test".to_string(),
        stripe_api_base: "http://localhost:12111".to_string(),
        checkout_success_url: "https://app.test/card/success".to_string(),
        checkout_cancel_url: "https://app.test/card/cancel".to_string(),
        currency: "usd".to_string(),
        intake_webhook_secret: "intake_secret".to_string(),
        intake_organization_id: ORG.to_string(),
        email_webhook_token: "route_token".to_string(),
        ses_from_email: "bookings@sweep.test".to_string(),
        ses_region: "us-east-1".to_string(),
        ses_configuration_set: None,
        jwt_secret: "jwt_test_secret".to_string(),
    }
}

/// Bare `pending_card` row for storage-level tests
pub fn booking_row(id: i64, organization_id: &str) -> Booking {
    Booking {
        id,
        organization_id: organization_id.to_string(),
        email: "jane@example.com".to_string(),
        customer_name: Some("Jane".to_string()),
        phone: None,
        address: None,
        status: BookingStatus::PendingCard,
        service_type: None,
        service_date: None,
        amount: None,
        notes: None,
        external_response_id: None,
        quote_id: None,
        checkout_session_id: None,
        customer_id: None,
        setup_intent_id: None,
        payment_method_id: None,
        payment_intent_id: None,
        last_payment_error: None,
        created_at: 0,
        updated_at: 0,
    }
}

// ========== Payment processor ==========

/// Processor double. Charges succeed unless a result was queued.
#[derive(Default)]
pub struct MockProcessor {
    seq: AtomicU64,
    charges: Mutex<VecDeque<Result<ChargeResult, ProcessorError>>>,
    checkout_failure: Mutex<Option<ProcessorError>>,
    customer_keys: Mutex<Vec<String>>,
    checkout_keys: Mutex<Vec<String>>,
    charge_keys: Mutex<Vec<String>>,
    expired: Mutex<Vec<String>>,
}

impl MockProcessor {
    fn next(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn queue_charge(&self, result: Result<ChargeResult, ProcessorError>) {
        self.charges.lock().unwrap().push_back(result);
    }

    pub fn fail_next_checkout(&self, err: ProcessorError) {
        *self.checkout_failure.lock().unwrap() = Some(err);
    }

    pub fn customer_keys(&self) -> Vec<String> {
        self.customer_keys.lock().unwrap().clone()
    }

    pub fn checkout_keys(&self) -> Vec<String> {
        self.checkout_keys.lock().unwrap().clone()
    }

    pub fn charge_keys(&self) -> Vec<String> {
        self.charge_keys.lock().unwrap().clone()
    }

    pub fn expired(&self) -> Vec<String> {
        self.expired.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn create_customer(&self, req: &CustomerRequest) -> Result<String, ProcessorError> {
        self.customer_keys
            .lock()
            .unwrap()
            .push(req.idempotency_key.clone());
        Ok(format!("cus_{}", req.booking_id))
    }

    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        if let Some(err) = self.checkout_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.checkout_keys
            .lock()
            .unwrap()
            .push(req.idempotency_key.clone());
        let id = format!("cs_{}", self.next());
        Ok(CheckoutSession {
            url: format!("https://checkout.test/{id}"),
            id,
        })
    }

    async fn expire_checkout_session(&self, session_id: &str) -> Result<(), ProcessorError> {
        self.expired.lock().unwrap().push(session_id.to_string());
        Ok(())
    }

    async fn create_setup_intent(
        &self,
        _req: &SetupIntentRequest,
    ) -> Result<SetupIntent, ProcessorError> {
        let id = format!("seti_{}", self.next());
        Ok(SetupIntent {
            client_secret: format!("{id}_secret"),
            id,
        })
    }

    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeResult, ProcessorError> {
        self.charge_keys
            .lock()
            .unwrap()
            .push(req.idempotency_key.clone());
        let queued = self.charges.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| {
            Ok(ChargeResult::Succeeded {
                payment_intent_id: format!("pi_{}", self.next()),
            })
        })
    }
}

// ========== Mailer ==========

#[derive(Default)]
pub struct MockMailer {
    seq: AtomicU64,
    sent: Mutex<Vec<OutgoingEmail>>,
    failure: Mutex<Option<String>>,
}

impl MockMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl Mailer for MockMailer {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailerError> {
        if let Some(message) = self.failure.lock().unwrap().take() {
            return Err(MailerError::Unavailable(message));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(format!("mock-{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1))
    }
}

// ========== Harness ==========

/// Every service wired to one in-memory database
pub struct Harness {
    pub storage: Storage,
    pub bus: ChangeBus,
    pub processor: Arc<MockProcessor>,
    pub mailer: Arc<MockMailer>,
    pub email: EmailPipeline,
    pub bookings: BookingService,
    pub payments: PaymentOrchestrator,
    pub scheduler: Scheduler,
    pub intake: IntakeService,
}

impl Harness {
    pub fn new() -> Self {
        let storage = Storage::open_in_memory().unwrap();
        let bus = ChangeBus::new();
        let processor = Arc::new(MockProcessor::default());
        let mailer = Arc::new(MockMailer::default());
        let email = EmailPipeline::new(storage.clone(), bus.clone(), mailer.clone());
        Self {
            bookings: BookingService::new(storage.clone(), bus.clone()),
            payments: PaymentOrchestrator::new(
                storage.clone(),
                bus.clone(),
                processor.clone(),
                email.clone(),
                PaymentSettings {
                    currency: "usd".to_string(),
                    success_url: "https://app.test/card/success".to_string(),
                    cancel_url: "https://app.test/card/cancel".to_string(),
                },
            ),
            scheduler: Scheduler::new(storage.clone(), bus.clone(), email.clone(), "usd"),
            intake: IntakeService::new(storage.clone(), bus.clone(), email.clone(), ORG),
            storage,
            bus,
            processor,
            mailer,
            email,
        }
    }

    /// Write a booking row directly, bypassing the services
    pub fn put_booking(&self, booking: &Booking) {
        let txn = self.storage.begin_write().unwrap();
        self.storage.put_booking(&txn, booking).unwrap();
        txn.commit().unwrap();
    }

    pub fn booking(&self, id: i64) -> Booking {
        self.storage.get_booking(id).unwrap().unwrap()
    }

    /// A completed booking with a saved card and the given amount
    pub fn completed_booking(&self, id: i64, amount: i64) -> Booking {
        let mut booking = booking_row(id, ORG);
        booking.status = BookingStatus::Completed;
        booking.amount = Some(amount);
        booking.customer_id = Some(format!("cus_{id}"));
        booking.payment_method_id = Some("pm_card".to_string());
        self.put_booking(&booking);
        booking
    }
}
