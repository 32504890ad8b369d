//! Plain-text transactional templates
//!
//! Payload keys are optional; a missing value renders as a neutral phrase
//! instead of failing the send.

use serde_json::Value;
use shared::models::EmailTemplate;

#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
}

fn text<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn greeting(payload: &Value) -> String {
    match text(payload, "customer_name") {
        Some(name) => format!("Hi {name},"),
        None => "Hello,".to_string(),
    }
}

fn service_date(payload: &Value) -> String {
    text(payload, "service_date")
        .map(|d| format!("on {d}"))
        .unwrap_or_else(|| "on the scheduled date".to_string())
}

/// Minor units to a display amount, e.g. `15000, "usd"` → `150.00 USD`
pub fn format_amount(amount: i64, currency: &str) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{sign}{}.{:02} {}",
        abs / 100,
        abs % 100,
        currency.to_uppercase()
    )
}

fn amount(payload: &Value) -> String {
    let currency = text(payload, "currency").unwrap_or("usd");
    payload
        .get("amount")
        .and_then(Value::as_i64)
        .map(|a| format_amount(a, currency))
        .unwrap_or_else(|| "the quoted amount".to_string())
}

pub fn render(template: EmailTemplate, payload: &Value) -> Rendered {
    let hello = greeting(payload);
    match template {
        EmailTemplate::QuoteReceived => {
            let number = text(payload, "quote_number").unwrap_or("your request");
            Rendered {
                subject: format!("We received your quote request ({number})"),
                text: format!(
                    "{hello}\n\nThanks for reaching out. We received your cleaning quote \
                     request {number} and will reply with a price shortly.\n"
                ),
            }
        }
        EmailTemplate::CardSaved => Rendered {
            subject: "Your card is saved".to_string(),
            text: format!(
                "{hello}\n\nYour card is on file. Nothing has been charged yet: we only \
                 charge after your cleaning {} is completed.\n",
                service_date(payload)
            ),
        },
        EmailTemplate::BookingScheduled => Rendered {
            subject: "Your cleaning is scheduled".to_string(),
            text: format!(
                "{hello}\n\nYour cleaning is scheduled {}. We will let you know if \
                 anything changes.\n",
                service_date(payload)
            ),
        },
        EmailTemplate::Receipt => Rendered {
            subject: "Receipt for your cleaning".to_string(),
            text: format!(
                "{hello}\n\nWe charged {} to your saved card for your cleaning {}. \
                 Thank you!\n",
                amount(payload),
                service_date(payload)
            ),
        },
        EmailTemplate::PaymentFailed => {
            let reason = text(payload, "error")
                .map(|e| format!(" The processor said: {e}"))
                .unwrap_or_default();
            Rendered {
                subject: "We could not charge your card".to_string(),
                text: format!(
                    "{hello}\n\nThe charge of {} for your cleaning did not go through.{reason}\n\n\
                     Please reply to this email so we can update your payment details.\n",
                    amount(payload)
                ),
            }
        }
        EmailTemplate::PaymentActionRequired => Rendered {
            subject: "Please confirm your payment".to_string(),
            text: format!(
                "{hello}\n\nYour bank asked for confirmation of the {} charge for your \
                 cleaning. Please reply to this email and we will send you a secure link.\n",
                amount(payload)
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_render_in_major_units() {
        assert_eq!(format_amount(15000, "usd"), "150.00 USD");
        assert_eq!(format_amount(5, "eur"), "0.05 EUR");
        assert_eq!(format_amount(-1999, "usd"), "-19.99 USD");
    }

    #[test]
    fn receipt_mentions_amount_and_date() {
        let rendered = render(
            EmailTemplate::Receipt,
            &json!({ "customer_name": "Ana", "amount": 15000, "currency": "usd", "service_date": "2026-05-01" }),
        );
        assert!(rendered.text.starts_with("Hi Ana,"));
        assert!(rendered.text.contains("150.00 USD"));
        assert!(rendered.text.contains("on 2026-05-01"));
    }

    #[test]
    fn missing_fields_fall_back() {
        let rendered = render(EmailTemplate::PaymentFailed, &json!({}));
        assert!(rendered.text.starts_with("Hello,"));
        assert!(rendered.text.contains("the quoted amount"));
        assert!(!rendered.text.contains("processor said"));
    }

    #[test]
    fn quote_subject_carries_number() {
        let rendered = render(EmailTemplate::QuoteReceived, &json!({ "quote_number": "Q-000123" }));
        assert_eq!(rendered.subject, "We received your quote request (Q-000123)");
    }
}
