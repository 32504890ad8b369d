//! Inbound event ingestion and outbound email
//!
//! Senders deliver at least once. Every handler here records the external
//! event id in the same transaction as its effect, so a replay is reported
//! as `Duplicate` and changes nothing.

pub mod email;
pub mod email_events;
pub mod intake;
pub mod mailer;
pub mod templates;
pub mod webhook_log;

pub use email::{EmailPipeline, QueueSend};
pub use intake::IntakeService;
pub use mailer::{Mailer, MailerError, OutgoingEmail, SesMailer};

use serde::Serialize;

/// Result of handling one external event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The event changed local state
    Applied,
    /// Already processed, or the state it would produce is already there
    Duplicate,
    /// Nothing to do (unmatched, stale or unhandled type)
    Ignored,
}
