//! Outbound email queue, suppression list and provider event ingestion

use super::EventOutcome;
use super::email_events::{EmailEvent, EmailEventKind};
use super::mailer::{Mailer, OutgoingEmail};
use super::templates;
use crate::error::{Resource, SweepError, SweepResult};
use crate::notify::ChangeBus;
use crate::storage::{Storage, StorageResult};
use redb::WriteTransaction;
use serde_json::{Value, json};
use shared::RequestContext;
use shared::models::{
    AuditAction, ChangeEvent, EmailSend, EmailSendStatus, EmailSuppression, EmailTemplate,
    SuppressionReason,
};
use shared::util::{normalize_email, now_millis, snowflake_id};
use std::sync::Arc;

const EVENT_SOURCE: &str = "ses";

/// Request to queue one message
#[derive(Debug, Clone)]
pub struct QueueSend {
    /// Re-queuing with the same key returns the existing row
    pub idempotency_key: String,
    pub recipient: String,
    pub template: EmailTemplate,
    pub payload: Value,
    pub booking_id: Option<i64>,
    pub organization_id: Option<String>,
}

#[derive(Clone)]
pub struct EmailPipeline {
    storage: Storage,
    bus: ChangeBus,
    mailer: Arc<dyn Mailer>,
}

impl EmailPipeline {
    pub fn new(storage: Storage, bus: ChangeBus, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            storage,
            bus,
            mailer,
        }
    }

    fn publish(&self, send: &EmailSend) {
        self.bus.publish(ChangeEvent::EmailSend {
            organization_id: send.organization_id.clone(),
            send_id: send.id,
        });
    }

    /// Insert a `queued` row, or return the row already holding the key
    pub fn queue_send(&self, req: QueueSend) -> SweepResult<EmailSend> {
        let recipient = req.recipient.trim().to_string();
        if recipient.is_empty() || !recipient.contains('@') {
            return Err(SweepError::validation("recipient must be an email address"));
        }
        if req.idempotency_key.trim().is_empty() {
            return Err(SweepError::validation("idempotency key is required"));
        }

        let txn = self.storage.begin_write()?;
        if let Some(existing) = self
            .storage
            .find_email_send_by_key_txn(&txn, &req.idempotency_key)?
        {
            tracing::debug!(
                idempotency_key = %req.idempotency_key,
                send_id = existing.id,
                "Email already queued"
            );
            return Ok(existing);
        }

        let now = now_millis();
        let send = EmailSend {
            id: snowflake_id(),
            organization_id: req.organization_id,
            idempotency_key: req.idempotency_key,
            recipient,
            template: req.template,
            provider: self.mailer.provider().to_string(),
            status: EmailSendStatus::Queued,
            payload: req.payload,
            booking_id: req.booking_id,
            provider_message_id: None,
            error: None,
            attempts: 0,
            sent_at: None,
            created_at: now,
            updated_at: now,
        };
        self.storage.put_email_send(&txn, &send)?;
        txn.commit()?;

        tracing::info!(
            send_id = send.id,
            template = send.template.as_str(),
            "Email queued"
        );
        self.publish(&send);
        Ok(send)
    }

    /// Send a queued row once.
    ///
    /// The first caller claims the row by bumping `attempts`; later callers
    /// get the row back unchanged. Suppressed recipients are marked
    /// `skipped` without contacting the provider.
    pub async fn dispatch(&self, send_id: i64) -> SweepResult<EmailSend> {
        let txn = self.storage.begin_write()?;
        let mut send = self
            .storage
            .get_email_send_txn(&txn, send_id)?
            .ok_or_else(|| SweepError::not_found(Resource::EmailSend, send_id))?;

        if send.status != EmailSendStatus::Queued || send.attempts > 0 {
            return Ok(send);
        }

        let now = now_millis();
        let recipient = normalize_email(&send.recipient);
        if self.storage.get_suppression_txn(&txn, &recipient)?.is_some() {
            send.status = EmailSendStatus::Skipped;
            send.error = Some("recipient is suppressed".into());
            send.updated_at = now;
            self.storage.put_email_send(&txn, &send)?;
            txn.commit()?;
            tracing::info!(send_id, "Email skipped, recipient suppressed");
            self.publish(&send);
            return Ok(send);
        }

        send.attempts += 1;
        send.updated_at = now;
        self.storage.put_email_send(&txn, &send)?;
        txn.commit()?;

        let rendered = templates::render(send.template, &send.payload);
        let outgoing = OutgoingEmail {
            to: send.recipient.clone(),
            subject: rendered.subject,
            text: rendered.text,
            tags: vec![("template".into(), send.template.as_str().into())],
        };
        let result = self.mailer.send(&outgoing).await;

        let txn = self.storage.begin_write()?;
        let mut send = self
            .storage
            .get_email_send_txn(&txn, send_id)?
            .ok_or_else(|| SweepError::not_found(Resource::EmailSend, send_id))?;
        let now = now_millis();
        match result {
            Ok(message_id) => {
                send.status = EmailSendStatus::Sent;
                send.provider_message_id = Some(message_id);
                send.sent_at = Some(now);
                send.error = None;
            }
            Err(e) => {
                tracing::warn!(send_id, error = %e, "Email send failed");
                send.status = EmailSendStatus::Failed;
                send.error = Some(e.to_string());
            }
        }
        send.updated_at = now;
        self.storage.put_email_send(&txn, &send)?;
        txn.commit()?;

        self.publish(&send);
        Ok(send)
    }

    /// Queue then dispatch
    pub async fn send(&self, req: QueueSend) -> SweepResult<EmailSend> {
        let queued = self.queue_send(req)?;
        self.dispatch(queued.id).await
    }

    /// Fire-and-forget variant for lifecycle notifications.
    ///
    /// Failures are logged; they never fail the booking operation that
    /// triggered the email.
    pub async fn notify(&self, req: QueueSend) {
        let key = req.idempotency_key.clone();
        if let Err(e) = self.send(req).await {
            tracing::warn!(idempotency_key = %key, error = %e, "Notification email not sent");
        }
    }

    /// Upsert a suppression entry by normalized email
    pub fn suppress(
        &self,
        email: &str,
        reason: SuppressionReason,
        source_event_id: Option<&str>,
    ) -> SweepResult<EmailSuppression> {
        let txn = self.storage.begin_write()?;
        let entry = self.suppress_txn(&txn, email, reason, source_event_id)?;
        txn.commit()?;
        Ok(entry)
    }

    pub(crate) fn suppress_txn(
        &self,
        txn: &WriteTransaction,
        email: &str,
        reason: SuppressionReason,
        source_event_id: Option<&str>,
    ) -> StorageResult<EmailSuppression> {
        let normalized = normalize_email(email);
        let now = now_millis();
        let entry = match self.storage.get_suppression_txn(txn, &normalized)? {
            Some(mut existing) => {
                existing.reason = reason;
                existing.source_event_id = source_event_id.map(String::from);
                existing.updated_at = now;
                existing
            }
            None => EmailSuppression {
                email: normalized,
                reason,
                source_event_id: source_event_id.map(String::from),
                created_at: now,
                updated_at: now,
            },
        };
        self.storage.put_suppression(txn, &entry)?;
        Ok(entry)
    }

    /// Apply one SES delivery event at most once
    pub fn ingest_event(&self, event: &EmailEvent) -> SweepResult<EventOutcome> {
        let txn = self.storage.begin_write()?;
        if self
            .storage
            .is_event_processed_txn(&txn, EVENT_SOURCE, &event.event_id)?
        {
            tracing::info!(event_id = %event.event_id, "Duplicate email event, skipping");
            return Ok(EventOutcome::Duplicate);
        }

        let mut send = match event.provider_message_id.as_deref() {
            Some(id) => self.storage.find_email_send_by_message_txn(&txn, id)?,
            None => None,
        };
        let before = send.as_ref().map(|s| s.status);

        let (next, suppression) = match &event.kind {
            EmailEventKind::Delivery => (Some(EmailSendStatus::Delivered), None),
            EmailEventKind::DeliveryDelay => (Some(EmailSendStatus::DeliveryDelayed), None),
            EmailEventKind::Bounce { permanent: true } => (
                Some(EmailSendStatus::Failed),
                Some(SuppressionReason::HardBounce),
            ),
            EmailEventKind::Bounce { permanent: false } => {
                (Some(EmailSendStatus::DeliveryDelayed), None)
            }
            EmailEventKind::Complaint => (None, Some(SuppressionReason::Complaint)),
            EmailEventKind::Reject | EmailEventKind::RenderingFailure => {
                (Some(EmailSendStatus::Failed), None)
            }
            EmailEventKind::Send | EmailEventKind::Other(_) => (None, None),
        };

        if let (Some(row), Some(next)) = (send.as_mut(), next)
            && row.status.can_advance_to(next)
        {
            row.status = next;
            if next == EmailSendStatus::Failed {
                row.error = event.detail.clone().or_else(|| Some("delivery failed".into()));
            }
            row.updated_at = now_millis();
            self.storage.put_email_send(&txn, row)?;
        }
        let send_changed = send.as_ref().map(|s| s.status) != before;

        let mut suppressed = 0;
        if let Some(reason) = suppression {
            let recipients: Vec<&str> = if event.recipients.is_empty() {
                send.iter().map(|s| s.recipient.as_str()).collect()
            } else {
                event.recipients.iter().map(String::as_str).collect()
            };
            let organization_id = send.as_ref().and_then(|s| s.organization_id.as_deref());
            for recipient in recipients {
                let entry = self.suppress_txn(&txn, recipient, reason, Some(&event.event_id))?;
                self.storage.append_audit(
                    &txn,
                    organization_id,
                    AuditAction::RecipientSuppressed,
                    "email_suppression",
                    &entry.email,
                    "system:ses",
                    json!({ "reason": reason, "event_id": event.event_id }),
                )?;
                suppressed += 1;
            }
        }

        self.storage
            .mark_event_processed(&txn, EVENT_SOURCE, &event.event_id)?;
        txn.commit()?;

        if send_changed && let Some(row) = &send {
            self.publish(row);
        }

        if send.is_none() && event.provider_message_id.is_some() && suppressed == 0 {
            tracing::debug!(event_id = %event.event_id, "Email event for unknown message");
        }
        tracing::info!(
            event_id = %event.event_id,
            kind = ?event.kind,
            suppressed,
            "Email event ingested"
        );

        Ok(if send_changed || suppressed > 0 {
            EventOutcome::Applied
        } else {
            EventOutcome::Ignored
        })
    }

    pub fn list_sends(
        &self,
        ctx: &RequestContext,
        booking_id: Option<i64>,
    ) -> SweepResult<Vec<EmailSend>> {
        ctx.require_dispatcher()?;
        Ok(self
            .storage
            .list_email_sends(&ctx.organization_id, booking_id)?)
    }

    /// The suppression list is shared across organizations
    pub fn list_suppressions(&self, ctx: &RequestContext) -> SweepResult<Vec<EmailSuppression>> {
        ctx.require_admin()?;
        Ok(self.storage.list_suppressions()?)
    }
}
