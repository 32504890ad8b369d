//! Application state shared by every handler

use crate::bookings::BookingService;
use crate::config::Config;
use crate::ingest::{EmailPipeline, IntakeService, Mailer, SesMailer};
use crate::notify::ChangeBus;
use crate::payments::{PaymentOrchestrator, PaymentProcessor, PaymentSettings, StripeClient};
use crate::scheduling::Scheduler;
use crate::storage::Storage;
use std::sync::Arc;
use std::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Secrets the HTTP layer checks inbound requests against
#[derive(Debug, Clone)]
pub struct Secrets {
    pub jwt_secret: String,
    pub stripe_webhook_secret: String,
    pub intake_webhook_secret: String,
    pub email_webhook_token: String,
}

impl From<&Config> for Secrets {
    fn from(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            stripe_webhook_secret: config.stripe_webhook_secret.clone(),
            intake_webhook_secret: config.intake_webhook_secret.clone(),
            email_webhook_token: config.email_webhook_token.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub bus: ChangeBus,
    pub bookings: BookingService,
    pub payments: PaymentOrchestrator,
    pub scheduler: Scheduler,
    pub intake: IntakeService,
    pub email: EmailPipeline,
    pub secrets: Arc<Secrets>,
    /// Outbound client for SNS subscription confirmation
    pub http: reqwest::Client,
}

impl AppState {
    /// Open the database and connect the Stripe and SES clients
    pub async fn new(config: &Config) -> Result<Self, BoxError> {
        let storage = Storage::open(config.database_path())?;
        tracing::info!(path = %config.database_path().display(), "Database opened");

        let processor = StripeClient::new(&config.stripe_secret_key, &config.stripe_api_base)?;
        let mailer = SesMailer::from_region(
            &config.ses_region,
            &config.ses_from_email,
            config.ses_configuration_set.clone(),
        )
        .await;

        Self::with_services(config, storage, Arc::new(processor), Arc::new(mailer))
    }

    /// Wire services over explicit storage and transports
    pub fn with_services(
        config: &Config,
        storage: Storage,
        processor: Arc<dyn PaymentProcessor>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, BoxError> {
        let bus = ChangeBus::new();
        let email = EmailPipeline::new(storage.clone(), bus.clone(), mailer);
        let payments = PaymentOrchestrator::new(
            storage.clone(),
            bus.clone(),
            processor,
            email.clone(),
            PaymentSettings {
                currency: config.currency.clone(),
                success_url: config.checkout_success_url.clone(),
                cancel_url: config.checkout_cancel_url.clone(),
            },
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            bookings: BookingService::new(storage.clone(), bus.clone()),
            scheduler: Scheduler::new(
                storage.clone(),
                bus.clone(),
                email.clone(),
                config.currency.clone(),
            ),
            intake: IntakeService::new(
                storage.clone(),
                bus.clone(),
                email.clone(),
                config.intake_organization_id.clone(),
            ),
            payments,
            email,
            secrets: Arc::new(Secrets::from(config)),
            http,
            storage,
            bus,
        })
    }
}
