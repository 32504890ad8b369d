//! Server configuration

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    pub http_port: u16,
    /// Directory holding the redb file
    pub data_dir: String,
    /// Daily rolling log files go here when set
    pub log_dir: Option<String>,
    /// Fallback filter when RUST_LOG is unset
    pub log_level: String,

    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,
    /// Stripe REST base URL (overridable for stripe-mock)
    pub stripe_api_base: String,
    /// Default redirect after card collection
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
    /// ISO currency for charges
    pub currency: String,

    /// Intake form provider signing secret
    pub intake_webhook_secret: String,
    /// Organization that receives intake submissions
    pub intake_organization_id: String,
    /// Route token expected in `/webhooks/email/{token}`
    pub email_webhook_token: String,

    /// SES sender email address
    pub ses_from_email: String,
    pub ses_region: String,
    /// SES configuration set that publishes delivery events to SNS
    pub ses_configuration_set: Option<String>,

    /// HS256 secret for dashboard JWTs
    pub jwt_secret: String,
}

impl Config {
    /// Require a secret env var: must be set and non-empty in non-development environments.
    fn require_secret(name: &str, environment: &str) -> Result<String, BoxError> {
        let val = match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                if environment != "development" {
                    return Err(format!("{name} must be set in {environment} environment").into());
                }
                format!("dev-{name}-not-for-production")
            }
        };
        if val.is_empty() && environment != "development" {
            return Err(format!("{name} must not be empty in {environment} environment").into());
        }
        Ok(val)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        let environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());

        Ok(Self {
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "data".into()),
            log_dir: std::env::var("LOG_DIR").ok().filter(|s| !s.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            stripe_secret_key: Self::require_secret("STRIPE_SECRET_KEY", &environment)?,
            stripe_webhook_secret: Self::require_secret("STRIPE_WEBHOOK_SECRET", &environment)?,
            stripe_api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            checkout_success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:3000/booking/card-saved".into()),
            checkout_cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "http://localhost:3000/booking/card-cancelled".into()),
            currency: std::env::var("CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|_| "usd".into()),
            intake_webhook_secret: Self::require_secret("INTAKE_WEBHOOK_SECRET", &environment)?,
            intake_organization_id: std::env::var("INTAKE_ORGANIZATION_ID")
                .map_err(|_| "INTAKE_ORGANIZATION_ID must be set")?,
            email_webhook_token: Self::require_secret("EMAIL_WEBHOOK_TOKEN", &environment)?,
            ses_from_email: std::env::var("SES_FROM_EMAIL")
                .unwrap_or_else(|_| "bookings@sweep.local".into()),
            ses_region: std::env::var("SES_REGION").unwrap_or_else(|_| "us-east-1".into()),
            ses_configuration_set: std::env::var("SES_CONFIGURATION_SET")
                .ok()
                .filter(|s| !s.is_empty()),
            jwt_secret: Self::require_secret("JWT_SECRET", &environment)?,
            environment,
        })
    }

    /// Path of the database file inside `data_dir`
    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_dir).join("sweep.redb")
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}
