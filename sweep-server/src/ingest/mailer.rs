//! Outbound email transport
//!
//! The email pipeline only talks to the `Mailer` trait. Production sends
//! through AWS SES v2.

use async_trait::async_trait;
use aws_sdk_sesv2::Client as SesClient;
use aws_sdk_sesv2::error::SdkError;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message, MessageTag};
use thiserror::Error;

/// Rendered message ready for the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    /// Provider tags (SES message tags), e.g. `("template", "receipt")`
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MailerError {
    /// Message could not be built or was refused by the provider
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Name stored on send rows ("ses", "mock")
    fn provider(&self) -> &'static str;

    /// Send one message, returning the provider message id
    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailerError>;
}

/// AWS SES v2 transport
pub struct SesMailer {
    client: SesClient,
    from: String,
    configuration_set: Option<String>,
}

impl SesMailer {
    pub fn new(client: SesClient, from: impl Into<String>, configuration_set: Option<String>) -> Self {
        Self {
            client,
            from: from.into(),
            configuration_set,
        }
    }

    /// Client for the given region using the default credential chain
    pub async fn from_region(
        region: &str,
        from: impl Into<String>,
        configuration_set: Option<String>,
    ) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest())
            .await
            .to_builder()
            .region(aws_config::Region::new(region.to_string()))
            .build();
        Self::new(SesClient::new(&aws_config), from, configuration_set)
    }
}

fn content(data: &str) -> Result<Content, MailerError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|e| MailerError::Rejected(e.to_string()))
}

#[async_trait]
impl Mailer for SesMailer {
    fn provider(&self) -> &'static str {
        "ses"
    }

    async fn send(&self, email: &OutgoingEmail) -> Result<String, MailerError> {
        let body = Body::builder().text(content(&email.text)?).build();
        let message = Message::builder()
            .subject(content(&email.subject)?)
            .body(body)
            .build();

        let mut req = self
            .client
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build());

        if let Some(set) = &self.configuration_set {
            req = req.configuration_set_name(set);
        }
        for (name, value) in &email.tags {
            let tag = MessageTag::builder()
                .name(name)
                .value(value)
                .build()
                .map_err(|e| MailerError::Rejected(e.to_string()))?;
            req = req.email_tags(tag);
        }

        let output = req.send().await.map_err(|e| match e {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                MailerError::Unavailable(e.to_string())
            }
            other => {
                let service_error = other.into_service_error();
                if service_error.is_too_many_requests_exception() {
                    MailerError::Unavailable(service_error.to_string())
                } else {
                    MailerError::Rejected(service_error.to_string())
                }
            }
        })?;

        let message_id = output
            .message_id()
            .map(String::from)
            .ok_or_else(|| MailerError::Unavailable("SES response had no message id".into()))?;

        tracing::info!(to = %email.to, message_id = %message_id, "Email sent");
        Ok(message_id)
    }
}
