//! Stripe integration via REST API (no SDK dependency)

use super::processor::{
    ChargeRequest, ChargeResult, CheckoutSession, CheckoutSessionRequest, CustomerRequest,
    PaymentProcessor, ProcessorError, SetupIntent, SetupIntentRequest,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

/// Stripe signatures older than this are rejected (replay protection)
const SIGNATURE_TOLERANCE_SECS: i64 = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>, api_base: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            secret_key: secret_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// POST a form to Stripe. Non-2xx responses become `ProcessorError`.
    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, ProcessorError> {
        let mut req = self
            .http
            .post(format!("{}{path}", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form);
        if let Some(key) = idempotency_key {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProcessorError::Unavailable(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProcessorError::Unavailable(format!("unreadable response: {e}")))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_error(status.as_u16(), &body))
        }
    }
}

/// Map a Stripe error response onto the processor taxonomy
pub fn classify_error(status: u16, body: &Value) -> ProcessorError {
    let err = &body["error"];
    let message = err["message"]
        .as_str()
        .unwrap_or("unknown Stripe error")
        .to_string();
    let code = err["code"].as_str().map(String::from);
    let payment_intent_id = err["payment_intent"]["id"].as_str().map(String::from);

    if status == 429 || status >= 500 || err["type"] == "api_error" {
        return ProcessorError::Unavailable(message);
    }
    if err["type"] == "card_error" {
        return ProcessorError::CardDeclined {
            message,
            decline_code: err["decline_code"].as_str().map(String::from).or(code),
            payment_intent_id,
        };
    }
    ProcessorError::Rejected {
        message,
        code,
        payment_intent_id,
    }
}

/// Interpret a PaymentIntent object returned by a confirm call
fn charge_result_from_intent(intent: &Value) -> Result<ChargeResult, ProcessorError> {
    let payment_intent_id = intent["id"].as_str().unwrap_or_default().to_string();
    match intent["status"].as_str() {
        Some("succeeded") => Ok(ChargeResult::Succeeded { payment_intent_id }),
        Some("requires_action") | Some("requires_confirmation") => Ok(ChargeResult::RequiresAction {
            payment_intent_id,
            client_secret: intent["client_secret"].as_str().map(String::from),
        }),
        Some("processing") => Ok(ChargeResult::Processing { payment_intent_id }),
        Some("requires_payment_method") => {
            let last = &intent["last_payment_error"];
            Err(ProcessorError::CardDeclined {
                message: last["message"]
                    .as_str()
                    .unwrap_or("payment method was declined")
                    .to_string(),
                decline_code: last["decline_code"]
                    .as_str()
                    .or(last["code"].as_str())
                    .map(String::from),
                payment_intent_id: Some(payment_intent_id),
            })
        }
        other => Err(ProcessorError::Rejected {
            message: format!("unexpected payment intent status: {}", other.unwrap_or("none")),
            code: None,
            payment_intent_id: Some(payment_intent_id),
        }),
    }
}

fn required_str(body: &Value, field: &str) -> Result<String, ProcessorError> {
    body[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ProcessorError::Rejected {
            message: format!("Stripe response missing `{field}`"),
            code: None,
            payment_intent_id: None,
        })
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    async fn create_customer(&self, req: &CustomerRequest) -> Result<String, ProcessorError> {
        let mut form = vec![
            ("email", req.email.clone()),
            ("metadata[booking_id]", req.booking_id.to_string()),
        ];
        if let Some(name) = &req.name {
            form.push(("name", name.clone()));
        }
        let resp = self
            .post_form("/v1/customers", &form, Some(&req.idempotency_key))
            .await?;
        required_str(&resp, "id")
    }

    async fn create_checkout_session(
        &self,
        req: &CheckoutSessionRequest,
    ) -> Result<CheckoutSession, ProcessorError> {
        let form = [
            ("mode", "setup".to_string()),
            ("customer", req.customer_id.clone()),
            ("currency", req.currency.clone()),
            ("payment_method_types[0]", "card".to_string()),
            ("success_url", req.success_url.clone()),
            ("cancel_url", req.cancel_url.clone()),
            ("client_reference_id", req.booking_id.to_string()),
            ("metadata[booking_id]", req.booking_id.to_string()),
            ("metadata[attempt_id]", req.attempt_id.to_string()),
            ("setup_intent_data[metadata][booking_id]", req.booking_id.to_string()),
            ("setup_intent_data[metadata][attempt_id]", req.attempt_id.to_string()),
        ];
        let resp = self
            .post_form("/v1/checkout/sessions", &form, Some(&req.idempotency_key))
            .await?;
        Ok(CheckoutSession {
            id: required_str(&resp, "id")?,
            url: required_str(&resp, "url")?,
        })
    }

    async fn expire_checkout_session(&self, session_id: &str) -> Result<(), ProcessorError> {
        self.post_form(
            &format!("/v1/checkout/sessions/{session_id}/expire"),
            &[],
            None,
        )
        .await?;
        Ok(())
    }

    async fn create_setup_intent(
        &self,
        req: &SetupIntentRequest,
    ) -> Result<SetupIntent, ProcessorError> {
        let form = [
            ("customer", req.customer_id.clone()),
            ("usage", "off_session".to_string()),
            ("payment_method_types[0]", "card".to_string()),
            ("metadata[booking_id]", req.booking_id.to_string()),
            ("metadata[attempt_id]", req.attempt_id.to_string()),
        ];
        let resp = self
            .post_form("/v1/setup_intents", &form, Some(&req.idempotency_key))
            .await?;
        Ok(SetupIntent {
            id: required_str(&resp, "id")?,
            client_secret: required_str(&resp, "client_secret")?,
        })
    }

    async fn charge(&self, req: &ChargeRequest) -> Result<ChargeResult, ProcessorError> {
        let form = [
            ("amount", req.amount.to_string()),
            ("currency", req.currency.clone()),
            ("customer", req.customer_id.clone()),
            ("payment_method", req.payment_method_id.clone()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
            ("description", req.description.clone()),
            ("metadata[booking_id]", req.booking_id.to_string()),
            ("metadata[attempt_id]", req.attempt_id.to_string()),
        ];
        match self
            .post_form("/v1/payment_intents", &form, Some(&req.idempotency_key))
            .await
        {
            Ok(intent) => charge_result_from_intent(&intent),
            // Off-session confirm that needs 3DS comes back as a card error
            Err(ProcessorError::CardDeclined {
                decline_code: Some(code),
                payment_intent_id: Some(payment_intent_id),
                ..
            }) if code == "authentication_required" => Ok(ChargeResult::RequiresAction {
                payment_intent_id,
                client_secret: None,
            }),
            Err(e) => Err(e),
        }
    }
}

/// Verify a `Stripe-Signature` header (HMAC-SHA256) against `now` (Unix seconds)
pub fn verify_signature_at(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
    now: i64,
) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signatures = Vec::new();
    for part in sig_header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    if timestamp.is_empty() || signatures.is_empty() {
        return Err("Invalid Stripe-Signature header");
    }

    let ts: i64 = timestamp.parse().map_err(|_| "Invalid timestamp")?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err("Webhook timestamp outside tolerance");
    }

    // Secret rotation sends several v1 entries; any match is enough
    for signature in signatures {
        let Ok(sig_bytes) = hex::decode(signature) else {
            continue;
        };
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&sig_bytes).is_ok() {
            return Ok(());
        }
    }

    Err("Webhook signature mismatch")
}

pub fn verify_webhook_signature(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
) -> Result<(), &'static str> {
    verify_signature_at(payload, sig_header, secret, chrono::Utc::now().timestamp())
}

#[cfg(test)]
pub(crate) fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    #[test]
    fn valid_signature_passes() {
        let payload = br#"{"id":"evt_1"}"#;
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        assert!(verify_signature_at(payload, &header, SECRET, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign_payload(br#"{"id":"evt_1"}"#, SECRET, 1_700_000_000);
        assert_eq!(
            verify_signature_at(br#"{"id":"evt_2"}"#, &header, SECRET, 1_700_000_000),
            Err("Webhook signature mismatch")
        );
    }

    #[test]
    fn stale_timestamp_fails() {
        let payload = b"{}";
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        assert_eq!(
            verify_signature_at(payload, &header, SECRET, 1_700_000_301),
            Err("Webhook timestamp outside tolerance")
        );
    }

    #[test]
    fn any_rotated_signature_matches() {
        let payload = b"{}";
        let good = sign_payload(payload, SECRET, 1_700_000_000);
        let v1 = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={v1}", "00".repeat(32));
        assert!(verify_signature_at(payload, &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn malformed_header_fails() {
        assert!(verify_signature_at(b"{}", "garbage", SECRET, 0).is_err());
    }

    #[test]
    fn classify_card_error_as_decline() {
        let body = json!({"error": {
            "type": "card_error",
            "code": "card_declined",
            "decline_code": "insufficient_funds",
            "message": "Your card has insufficient funds.",
            "payment_intent": {"id": "pi_1"}
        }});
        assert_eq!(
            classify_error(402, &body),
            ProcessorError::CardDeclined {
                message: "Your card has insufficient funds.".into(),
                decline_code: Some("insufficient_funds".into()),
                payment_intent_id: Some("pi_1".into()),
            }
        );
    }

    #[test]
    fn classify_transient_errors() {
        let body = json!({"error": {"type": "api_error", "message": "boom"}});
        assert!(matches!(
            classify_error(500, &body),
            ProcessorError::Unavailable(_)
        ));
        let body = json!({"error": {"type": "invalid_request_error", "message": "slow down"}});
        assert!(matches!(
            classify_error(429, &body),
            ProcessorError::Unavailable(_)
        ));
    }

    #[test]
    fn classify_invalid_request_as_rejected() {
        let body = json!({"error": {
            "type": "invalid_request_error",
            "code": "resource_missing",
            "message": "No such payment_method"
        }});
        assert!(matches!(
            classify_error(400, &body),
            ProcessorError::Rejected { code: Some(c), .. } if c == "resource_missing"
        ));
    }

    #[test]
    fn intent_status_mapping() {
        assert_eq!(
            charge_result_from_intent(&json!({"id": "pi_1", "status": "succeeded"})),
            Ok(ChargeResult::Succeeded {
                payment_intent_id: "pi_1".into()
            })
        );
        assert_eq!(
            charge_result_from_intent(
                &json!({"id": "pi_1", "status": "requires_action", "client_secret": "sec"})
            ),
            Ok(ChargeResult::RequiresAction {
                payment_intent_id: "pi_1".into(),
                client_secret: Some("sec".into())
            })
        );
        assert!(matches!(
            charge_result_from_intent(&json!({
                "id": "pi_1",
                "status": "requires_payment_method",
                "last_payment_error": {"message": "declined", "decline_code": "do_not_honor"}
            })),
            Err(ProcessorError::CardDeclined { .. })
        ));
    }
}
