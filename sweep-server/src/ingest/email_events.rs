//! SES delivery events delivered through SNS HTTP(S) subscriptions

use serde::Deserialize;
use serde_json::Value;

/// SNS envelope fields we read
#[derive(Debug, Clone, Deserialize)]
pub struct SnsEnvelope {
    #[serde(rename = "Type")]
    pub message_type: String,
    #[serde(rename = "MessageId")]
    pub message_id: String,
    #[serde(rename = "TopicArn", default)]
    pub topic_arn: Option<String>,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "SubscribeURL", default)]
    pub subscribe_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmailEventKind {
    Send,
    Delivery,
    DeliveryDelay,
    Bounce { permanent: bool },
    Complaint,
    Reject,
    RenderingFailure,
    /// Opens, clicks and anything else we do not track
    Other(String),
}

/// One SES event, keyed for dedupe by the SNS message id
#[derive(Debug, Clone, PartialEq)]
pub struct EmailEvent {
    pub event_id: String,
    pub kind: EmailEventKind,
    /// SES `mail.messageId`, equal to the id returned by `SendEmail`
    pub provider_message_id: Option<String>,
    /// Recipients the event is about (bounced, complained, delayed)
    pub recipients: Vec<String>,
    pub detail: Option<String>,
}

pub fn parse_envelope(body: &[u8]) -> Result<SnsEnvelope, String> {
    serde_json::from_slice(body).map_err(|e| format!("invalid SNS envelope: {e}"))
}

fn addresses(list: Option<&Value>) -> Vec<String> {
    list.and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|r| r.get("emailAddress").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the SES payload carried in an SNS `Notification`.
///
/// Accepts both configuration-set event publishing (`eventType`) and the
/// older identity notifications (`notificationType`).
pub fn parse_ses_event(event_id: &str, message: &str) -> Result<EmailEvent, String> {
    let payload: Value =
        serde_json::from_str(message).map_err(|e| format!("invalid SES message: {e}"))?;

    let event_type = payload
        .get("eventType")
        .or_else(|| payload.get("notificationType"))
        .and_then(Value::as_str)
        .ok_or("SES message has no event type")?;

    let provider_message_id = payload
        .get("mail")
        .and_then(|m| m.get("messageId"))
        .and_then(Value::as_str)
        .map(String::from);

    let (kind, recipients, detail) = match event_type {
        "Send" => (EmailEventKind::Send, Vec::new(), None),
        "Delivery" => (EmailEventKind::Delivery, Vec::new(), None),
        "DeliveryDelay" => {
            let delay = payload.get("deliveryDelay");
            (
                EmailEventKind::DeliveryDelay,
                addresses(delay.and_then(|d| d.get("delayedRecipients"))),
                delay
                    .and_then(|d| d.get("delayType"))
                    .and_then(Value::as_str)
                    .map(String::from),
            )
        }
        "Bounce" => {
            let bounce = payload.get("bounce");
            let bounce_type = bounce
                .and_then(|b| b.get("bounceType"))
                .and_then(Value::as_str)
                .unwrap_or("Undetermined");
            let sub_type = bounce
                .and_then(|b| b.get("bounceSubType"))
                .and_then(Value::as_str)
                .unwrap_or("General");
            (
                EmailEventKind::Bounce {
                    permanent: bounce_type == "Permanent",
                },
                addresses(bounce.and_then(|b| b.get("bouncedRecipients"))),
                Some(format!("{bounce_type}/{sub_type}")),
            )
        }
        "Complaint" => {
            let complaint = payload.get("complaint");
            (
                EmailEventKind::Complaint,
                addresses(complaint.and_then(|c| c.get("complainedRecipients"))),
                complaint
                    .and_then(|c| c.get("complaintFeedbackType"))
                    .and_then(Value::as_str)
                    .map(String::from),
            )
        }
        "Reject" => (
            EmailEventKind::Reject,
            Vec::new(),
            payload
                .get("reject")
                .and_then(|r| r.get("reason"))
                .and_then(Value::as_str)
                .map(String::from),
        ),
        "Rendering Failure" | "RenderingFailure" => (
            EmailEventKind::RenderingFailure,
            Vec::new(),
            payload
                .get("failure")
                .and_then(|f| f.get("errorMessage"))
                .and_then(Value::as_str)
                .map(String::from),
        ),
        other => (EmailEventKind::Other(other.to_string()), Vec::new(), None),
    };

    Ok(EmailEvent {
        event_id: event_id.to_string(),
        kind,
        provider_message_id,
        recipients,
        detail,
    })
}

/// SNS subscription URLs are only followed when they point at AWS over https
pub fn is_trusted_subscribe_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            parsed.scheme() == "https"
                && parsed
                    .host_str()
                    .is_some_and(|h| h.starts_with("sns.") && h.ends_with(".amazonaws.com"))
        }
        Err(_) => false,
    }
}

/// Visit the SubscribeURL to confirm an SNS subscription
pub async fn confirm_subscription(http: &reqwest::Client, url: &str) -> Result<(), String> {
    if !is_trusted_subscribe_url(url) {
        return Err(format!("untrusted SubscribeURL: {url}"));
    }
    let resp = http.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("SNS confirmation returned {}", resp.status()));
    }
    Ok(())
}
