//! Stripe webhook event parsing
//!
//! Only the fields reconciliation needs are extracted. Everything else in the
//! event body is ignored.

use serde_json::Value;

/// A processor event reduced to what reconciliation acts on
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorEvent {
    pub id: String,
    pub event_type: String,
    pub kind: ProcessorEventKind,
    /// `metadata.booking_id` stamped on every object we create
    pub booking_hint: Option<i64>,
    /// `metadata.attempt_id`
    pub attempt_hint: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEventKind {
    CheckoutCompleted {
        session_id: String,
        setup_intent_id: Option<String>,
        customer_id: Option<String>,
    },
    CheckoutExpired {
        session_id: String,
    },
    SetupSucceeded {
        setup_intent_id: String,
        payment_method_id: Option<String>,
        customer_id: Option<String>,
    },
    SetupFailed {
        setup_intent_id: String,
        message: Option<String>,
    },
    PaymentSucceeded {
        payment_intent_id: String,
    },
    PaymentFailed {
        payment_intent_id: String,
        message: Option<String>,
        decline_code: Option<String>,
    },
    PaymentRequiresAction {
        payment_intent_id: String,
    },
    /// Event type we do not act on
    Unhandled,
}

impl ProcessorEventKind {
    /// Processor object id the event is about
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::CheckoutCompleted { session_id, .. } | Self::CheckoutExpired { session_id } => {
                Some(session_id)
            }
            Self::SetupSucceeded {
                setup_intent_id, ..
            }
            | Self::SetupFailed {
                setup_intent_id, ..
            } => Some(setup_intent_id),
            Self::PaymentSucceeded { payment_intent_id }
            | Self::PaymentFailed {
                payment_intent_id, ..
            }
            | Self::PaymentRequiresAction { payment_intent_id } => Some(payment_intent_id),
            Self::Unhandled => None,
        }
    }
}

fn str_field(obj: &Value, field: &str) -> Option<String> {
    obj.get(field).and_then(Value::as_str).map(String::from)
}

/// Expandable fields arrive either as an id string or as the full object
fn id_field(obj: &Value, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("id").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

fn metadata_id(obj: &Value, key: &str) -> Option<i64> {
    let value = obj.get("metadata")?.get(key)?;
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn required_id(obj: &Value, event_type: &str) -> Result<String, String> {
    str_field(obj, "id").ok_or_else(|| format!("{event_type} object has no id"))
}

/// Parse a verified webhook body
pub fn parse_event(body: &[u8]) -> Result<ProcessorEvent, String> {
    let event: Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid event JSON: {e}"))?;

    let id = str_field(&event, "id").ok_or("event has no id")?;
    let event_type = str_field(&event, "type").ok_or("event has no type")?;
    let obj = event
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or("event has no data.object")?;

    let kind = match event_type.as_str() {
        "checkout.session.completed" => ProcessorEventKind::CheckoutCompleted {
            session_id: required_id(obj, &event_type)?,
            setup_intent_id: id_field(obj, "setup_intent"),
            customer_id: id_field(obj, "customer"),
        },
        "checkout.session.expired" => ProcessorEventKind::CheckoutExpired {
            session_id: required_id(obj, &event_type)?,
        },
        "setup_intent.succeeded" => ProcessorEventKind::SetupSucceeded {
            setup_intent_id: required_id(obj, &event_type)?,
            payment_method_id: id_field(obj, "payment_method"),
            customer_id: id_field(obj, "customer"),
        },
        "setup_intent.setup_failed" => ProcessorEventKind::SetupFailed {
            setup_intent_id: required_id(obj, &event_type)?,
            message: obj
                .get("last_setup_error")
                .and_then(|e| str_field(e, "message")),
        },
        "payment_intent.succeeded" => ProcessorEventKind::PaymentSucceeded {
            payment_intent_id: required_id(obj, &event_type)?,
        },
        "payment_intent.payment_failed" => {
            let error = obj.get("last_payment_error");
            ProcessorEventKind::PaymentFailed {
                payment_intent_id: required_id(obj, &event_type)?,
                message: error.and_then(|e| str_field(e, "message")),
                decline_code: error
                    .and_then(|e| str_field(e, "decline_code").or_else(|| str_field(e, "code"))),
            }
        }
        "payment_intent.requires_action" => ProcessorEventKind::PaymentRequiresAction {
            payment_intent_id: required_id(obj, &event_type)?,
        },
        _ => ProcessorEventKind::Unhandled,
    };

    Ok(ProcessorEvent {
        booking_hint: metadata_id(obj, "booking_id"),
        attempt_hint: metadata_id(obj, "attempt_id"),
        id,
        event_type,
        kind,
    })
}
