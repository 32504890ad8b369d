//! Form-intake webhook: quote requests and their conversion into bookings
//!
//! The form provider posts one JSON document per submission, signed with a
//! base64 HMAC-SHA256 of the raw body. Submissions are keyed by response id,
//! so redelivery never creates a second quote.

use super::{EmailPipeline, EventOutcome, QueueSend};
use crate::bookings::{insert_booking, publish_booking};
use crate::error::{Resource, SweepError, SweepResult};
use crate::notify::ChangeBus;
use crate::storage::Storage;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::Sha256;
use shared::RequestContext;
use shared::models::{
    AuditAction, Booking, BookingCreate, ChangeEvent, EmailTemplate, QuoteConversion,
    QuoteRequest, QuoteStatus, format_quote_number,
};
use shared::util::{normalize_email, now_millis, snowflake_id};

pub const SIGNATURE_HEADER: &str = "tally-signature";
const QUOTE_SEQUENCE: &str = "quote";

/// Verify the base64 HMAC-SHA256 signature of a submission body
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> Result<(), &'static str> {
    let expected = STANDARD
        .decode(signature.trim())
        .map_err(|_| "Signature is not base64")?;
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| "Intake signature mismatch")
}

// ========== Payload ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionEnvelope {
    event_type: Option<String>,
    data: SubmissionData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionData {
    response_id: String,
    #[serde(default)]
    fields: Vec<SubmissionField>,
}

#[derive(Debug, Deserialize)]
struct SubmissionField {
    key: String,
    label: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    options: Vec<FieldOption>,
}

#[derive(Debug, Deserialize)]
struct FieldOption {
    id: String,
    text: String,
}

impl SubmissionField {
    /// Display value: choice ids become their option text
    fn text(&self) -> Option<String> {
        let option_text = |id: &str| {
            self.options
                .iter()
                .find(|o| o.id == id)
                .map(|o| o.text.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let text = match &self.value {
            Value::Null => return None,
            Value::String(s) => option_text(s),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(option_text)
                .collect::<Vec<_>>()
                .join(", "),
            Value::Object(_) => self.value.to_string(),
        };
        let text = text.trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

/// Where a labelled field lands on the quote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Email,
    Phone,
    Address,
    PreferredDate,
    ServiceType,
    Notes,
    Name,
}

fn slot_for(label: &str) -> Option<Slot> {
    let label = label.to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| label.contains(w));
    if has(&["email", "e-mail"]) {
        Some(Slot::Email)
    } else if has(&["phone", "mobile"]) {
        Some(Slot::Phone)
    } else if has(&["address", "street", "location"]) {
        Some(Slot::Address)
    } else if has(&["date", "when"]) {
        Some(Slot::PreferredDate)
    } else if has(&["service", "type of clean", "cleaning type"]) {
        Some(Slot::ServiceType)
    } else if has(&["note", "message", "comment", "detail", "instruction"]) {
        Some(Slot::Notes)
    } else if has(&["name"]) {
        Some(Slot::Name)
    } else {
        None
    }
}

/// Submission fields mapped onto quote columns
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Submission {
    pub response_id: String,
    pub email: Option<String>,
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub service_type: Option<String>,
    pub preferred_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub raw_fields: Value,
}

pub fn parse_submission(body: &[u8]) -> Result<Submission, String> {
    let envelope: SubmissionEnvelope =
        serde_json::from_slice(body).map_err(|e| format!("Invalid submission: {e}"))?;
    if let Some(kind) = envelope.event_type.as_deref()
        && kind != "FORM_RESPONSE"
    {
        return Err(format!("Unsupported event type {kind}"));
    }
    let response_id = envelope.data.response_id.trim().to_string();
    if response_id.is_empty() {
        return Err("Missing responseId".to_string());
    }

    let mut submission = Submission {
        response_id,
        ..Default::default()
    };
    let mut raw = Map::new();
    let mut names: Vec<String> = Vec::new();

    for field in &envelope.data.fields {
        let label = field.label.clone().unwrap_or_else(|| field.key.clone());
        let Some(text) = field.text() else {
            continue;
        };
        raw.insert(label.clone(), Value::String(text.clone()));

        let target = match slot_for(&label) {
            Some(Slot::Email) => &mut submission.email,
            Some(Slot::Phone) => &mut submission.phone,
            Some(Slot::Address) => &mut submission.address,
            Some(Slot::ServiceType) => &mut submission.service_type,
            Some(Slot::Notes) => &mut submission.notes,
            Some(Slot::Name) => {
                // "First name" + "Last name" forms
                names.push(text);
                continue;
            }
            Some(Slot::PreferredDate) => {
                if submission.preferred_date.is_none() {
                    submission.preferred_date = NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok();
                }
                continue;
            }
            None => continue,
        };
        if target.is_none() {
            *target = Some(text);
        }
    }

    if !names.is_empty() {
        submission.customer_name = Some(names.join(" "));
    }
    submission.email = submission
        .email
        .map(|e| normalize_email(&e))
        .filter(|e| e.contains('@'));
    submission.raw_fields = Value::Object(raw);
    Ok(submission)
}

// ========== Service ==========

#[derive(Clone)]
pub struct IntakeService {
    storage: Storage,
    bus: ChangeBus,
    email: EmailPipeline,
    /// Organization that owns webhook submissions
    organization_id: String,
}

impl IntakeService {
    pub fn new(
        storage: Storage,
        bus: ChangeBus,
        email: EmailPipeline,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            bus,
            email,
            organization_id: organization_id.into(),
        }
    }

    fn publish_quote(&self, quote: &QuoteRequest) {
        self.bus.publish(ChangeEvent::Quote {
            organization_id: quote.organization_id.clone(),
            quote_id: quote.id,
        });
    }

    /// Record a submission body (signature already checked)
    pub async fn ingest(&self, body: &[u8]) -> SweepResult<(QuoteRequest, EventOutcome)> {
        let submission = parse_submission(body).map_err(SweepError::Validation)?;

        let txn = self.storage.begin_write()?;
        if let Some(existing) = self.storage.find_quote_by_response_txn(
            &txn,
            &self.organization_id,
            &submission.response_id,
        )? {
            tracing::debug!(
                quote_id = existing.id,
                response_id = %submission.response_id,
                "Submission already recorded"
            );
            return Ok((existing, EventOutcome::Duplicate));
        }

        let number = self.storage.next_sequence(&txn, QUOTE_SEQUENCE)?;
        let now = now_millis();
        let quote = QuoteRequest {
            id: snowflake_id(),
            organization_id: self.organization_id.clone(),
            quote_number: format_quote_number(number),
            external_response_id: submission.response_id,
            email: submission.email,
            customer_name: submission.customer_name,
            phone: submission.phone,
            address: submission.address,
            service_type: submission.service_type,
            preferred_date: submission.preferred_date,
            notes: submission.notes,
            raw_fields: submission.raw_fields,
            status: QuoteStatus::New,
            booking_id: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_quote(&txn, &quote)?;
        txn.commit()?;

        tracing::info!(
            quote_id = quote.id,
            quote_number = %quote.quote_number,
            response_id = %quote.external_response_id,
            "Quote request received"
        );
        self.publish_quote(&quote);

        if let Some(recipient) = quote.email.clone() {
            self.email
                .notify(QueueSend {
                    idempotency_key: format!("quote_received:{}", quote.id),
                    recipient,
                    template: EmailTemplate::QuoteReceived,
                    payload: json!({
                        "quote_number": quote.quote_number,
                        "customer_name": quote.customer_name,
                    }),
                    booking_id: None,
                    organization_id: Some(quote.organization_id.clone()),
                })
                .await;
        } else {
            tracing::warn!(quote_id = quote.id, "Quote request has no email address");
        }
        Ok((quote, EventOutcome::Applied))
    }

    pub fn get_quote(&self, ctx: &RequestContext, quote_id: i64) -> SweepResult<QuoteRequest> {
        self.storage
            .get_quote(quote_id)?
            .filter(|q| ctx.can_see(&q.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Quote, quote_id))
    }

    pub fn list_quotes(&self, ctx: &RequestContext) -> SweepResult<Vec<QuoteRequest>> {
        Ok(self.storage.list_quotes(&ctx.organization_id)?)
    }

    /// Turn a quote into a `pending_card` booking. A quote yields at most one
    /// booking.
    pub fn convert_quote(
        &self,
        ctx: &RequestContext,
        quote_id: i64,
        conversion: QuoteConversion,
    ) -> SweepResult<Booking> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let mut quote = self
            .storage
            .get_quote_txn(&txn, quote_id)?
            .filter(|q| ctx.can_see(&q.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Quote, quote_id))?;

        match quote.status {
            QuoteStatus::Converted => return Err(SweepError::QuoteAlreadyConverted(quote_id)),
            QuoteStatus::Dismissed => {
                return Err(SweepError::validation("dismissed quotes cannot be converted"));
            }
            QuoteStatus::New => {}
        }
        let Some(email) = quote.email.clone() else {
            return Err(SweepError::validation("quote has no email address"));
        };

        let (booking, created) = insert_booking(
            &self.storage,
            &txn,
            ctx,
            BookingCreate {
                email,
                customer_name: quote.customer_name.clone(),
                phone: quote.phone.clone(),
                address: quote.address.clone(),
                service_type: quote.service_type.clone(),
                service_date: conversion.service_date.or(quote.preferred_date),
                amount: conversion.amount,
                notes: conversion.notes.or_else(|| quote.notes.clone()),
                external_response_id: Some(quote.external_response_id.clone()),
                quote_id: Some(quote.id),
            },
        )?;

        quote.status = QuoteStatus::Converted;
        quote.booking_id = Some(booking.id);
        quote.updated_at = now_millis();
        self.storage.put_quote(&txn, &quote)?;
        self.storage.append_audit(
            &txn,
            Some(&quote.organization_id),
            AuditAction::QuoteConverted,
            "quote",
            &quote_id.to_string(),
            &ctx.subject_id,
            json!({ "booking_id": booking.id, "booking_created": created }),
        )?;
        txn.commit()?;

        tracing::info!(quote_id, booking_id = booking.id, created, "Quote converted");
        self.publish_quote(&quote);
        publish_booking(&self.bus, &booking);
        Ok(booking)
    }

    pub fn dismiss_quote(&self, ctx: &RequestContext, quote_id: i64) -> SweepResult<QuoteRequest> {
        ctx.require_dispatcher()?;
        let txn = self.storage.begin_write()?;
        let mut quote = self
            .storage
            .get_quote_txn(&txn, quote_id)?
            .filter(|q| ctx.can_see(&q.organization_id))
            .ok_or_else(|| SweepError::not_found(Resource::Quote, quote_id))?;
        match quote.status {
            QuoteStatus::Converted => return Err(SweepError::QuoteAlreadyConverted(quote_id)),
            QuoteStatus::Dismissed => return Ok(quote),
            QuoteStatus::New => {}
        }
        quote.status = QuoteStatus::Dismissed;
        quote.updated_at = now_millis();
        self.storage.put_quote(&txn, &quote)?;
        txn.commit()?;

        self.publish_quote(&quote);
        Ok(quote)
    }
}

#[cfg(test)]
pub(crate) fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Harness, ORG, cleaner_user, dispatcher};
    use shared::models::BookingStatus;

    fn submission(response_id: &str) -> Vec<u8> {
        json!({
            "eventId": format!("evt_{response_id}"),
            "eventType": "FORM_RESPONSE",
            "data": {
                "responseId": response_id,
                "fields": [
                    { "key": "q1", "label": "First name", "type": "INPUT_TEXT", "value": "Jane" },
                    { "key": "q2", "label": "Last name", "type": "INPUT_TEXT", "value": "Doe" },
                    { "key": "q3", "label": "Email address", "type": "INPUT_EMAIL", "value": " Jane@Example.com " },
                    { "key": "q4", "label": "Phone number", "type": "INPUT_PHONE_NUMBER", "value": "555-0100" },
                    {
                        "key": "q5",
                        "label": "Service",
                        "type": "DROPDOWN",
                        "value": ["opt_deep"],
                        "options": [
                            { "id": "opt_std", "text": "Standard clean" },
                            { "id": "opt_deep", "text": "Deep clean" }
                        ]
                    },
                    { "key": "q6", "label": "Preferred date", "type": "INPUT_DATE", "value": "2026-03-02" },
                    { "key": "q7", "label": "Anything else?", "type": "TEXTAREA", "value": null },
                    { "key": "q8", "label": "Bedrooms", "type": "INPUT_NUMBER", "value": 3 }
                ]
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn signature_round_trip() {
        let body = submission("r1");
        let signature = sign(&body, "intake_secret");
        assert!(verify_signature(&body, &signature, "intake_secret").is_ok());
        assert_eq!(
            verify_signature(&body, &signature, "other_secret"),
            Err("Intake signature mismatch")
        );
        assert_eq!(
            verify_signature(&body, "%%%", "intake_secret"),
            Err("Signature is not base64")
        );
    }

    #[test]
    fn fields_are_mapped_by_label() {
        let parsed = parse_submission(&submission("r1")).unwrap();
        assert_eq!(parsed.response_id, "r1");
        assert_eq!(parsed.customer_name.as_deref(), Some("Jane Doe"));
        assert_eq!(parsed.email.as_deref(), Some("jane@example.com"));
        assert_eq!(parsed.phone.as_deref(), Some("555-0100"));
        assert_eq!(parsed.service_type.as_deref(), Some("Deep clean"));
        assert_eq!(parsed.preferred_date, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(parsed.notes, None);
        assert_eq!(parsed.raw_fields["Bedrooms"], "3");
        assert!(parsed.raw_fields.get("Anything else?").is_none());
    }

    #[test]
    fn malformed_submissions_are_rejected() {
        assert!(parse_submission(b"not json").is_err());
        assert!(parse_submission(br#"{"data":{"responseId":"  "}}"#).is_err());
        assert!(
            parse_submission(br#"{"eventType":"FORM_DELETED","data":{"responseId":"r1"}}"#)
                .is_err()
        );
    }

    #[tokio::test]
    async fn redelivered_submission_is_a_duplicate() {
        let harness = Harness::new();
        let (first, outcome) = harness.intake.ingest(&submission("r1")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(first.quote_number, "Q-000001");
        assert_eq!(first.organization_id, ORG);

        let (again, outcome) = harness.intake.ingest(&submission("r1")).await.unwrap();
        assert_eq!(outcome, EventOutcome::Duplicate);
        assert_eq!(again.id, first.id);

        let (second, _) = harness.intake.ingest(&submission("r2")).await.unwrap();
        assert_eq!(second.quote_number, "Q-000002");

        assert_eq!(harness.intake.list_quotes(&dispatcher()).unwrap().len(), 2);
        // One acknowledgement per quote
        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].to, "jane@example.com");
    }

    #[tokio::test]
    async fn invalid_body_is_a_validation_error() {
        let harness = Harness::new();
        assert!(matches!(
            harness.intake.ingest(b"{}").await,
            Err(SweepError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn quote_converts_to_one_booking() {
        let harness = Harness::new();
        let (quote, _) = harness.intake.ingest(&submission("r1")).await.unwrap();

        let booking = harness
            .intake
            .convert_quote(
                &dispatcher(),
                quote.id,
                QuoteConversion {
                    amount: Some(15_000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(booking.status, BookingStatus::PendingCard);
        assert_eq!(booking.quote_id, Some(quote.id));
        assert_eq!(booking.amount, Some(15_000));
        assert_eq!(booking.service_date, NaiveDate::from_ymd_opt(2026, 3, 2));
        assert_eq!(booking.external_response_id.as_deref(), Some("r1"));

        let converted = harness.intake.get_quote(&dispatcher(), quote.id).unwrap();
        assert_eq!(converted.status, QuoteStatus::Converted);
        assert_eq!(converted.booking_id, Some(booking.id));

        assert!(matches!(
            harness
                .intake
                .convert_quote(&dispatcher(), quote.id, QuoteConversion::default()),
            Err(SweepError::QuoteAlreadyConverted(_))
        ));
        assert!(matches!(
            harness.intake.dismiss_quote(&dispatcher(), quote.id),
            Err(SweepError::QuoteAlreadyConverted(_))
        ));
    }

    #[tokio::test]
    async fn dismissed_quote_cannot_be_converted() {
        let harness = Harness::new();
        let (quote, _) = harness.intake.ingest(&submission("r1")).await.unwrap();

        assert!(harness.intake.dismiss_quote(&cleaner_user(), quote.id).is_err());
        let dismissed = harness.intake.dismiss_quote(&dispatcher(), quote.id).unwrap();
        assert_eq!(dismissed.status, QuoteStatus::Dismissed);
        assert!(matches!(
            harness
                .intake
                .convert_quote(&dispatcher(), quote.id, QuoteConversion::default()),
            Err(SweepError::Validation(_))
        ));
    }
}
