//! Log of webhook deliveries rejected before reaching a handler
//!
//! Recording is best effort. A storage failure here must never change the
//! response the sender gets.

use crate::storage::{Storage, WebhookFailure};
use shared::util::{now_millis, snowflake_id};

/// Where a rejected delivery came from
#[derive(Debug, Clone, Copy)]
pub struct WebhookSource<'a> {
    pub provider: &'a str,
    pub endpoint: &'a str,
    pub route_token: Option<&'a str>,
}

pub fn log_webhook_failure(
    storage: &Storage,
    source: WebhookSource<'_>,
    status_code: u16,
    reason: &str,
) {
    tracing::warn!(
        provider = source.provider,
        endpoint = source.endpoint,
        status_code,
        reason,
        "Webhook rejected"
    );
    let failure = WebhookFailure {
        id: snowflake_id(),
        provider: source.provider.to_string(),
        endpoint: source.endpoint.to_string(),
        route_token: source.route_token.map(String::from),
        status_code,
        reason: reason.to_string(),
        created_at: now_millis(),
    };
    if let Err(e) = storage.record_webhook_failure(&failure) {
        tracing::warn!(provider = source.provider, error = %e, "Failed to record webhook failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_recorded_newest_first() {
        let storage = Storage::open_in_memory().unwrap();
        let stripe = WebhookSource {
            provider: "stripe",
            endpoint: "/webhooks/stripe",
            route_token: None,
        };
        log_webhook_failure(&storage, stripe, 400, "Webhook signature mismatch");
        log_webhook_failure(
            &storage,
            WebhookSource {
                provider: "ses",
                endpoint: "/webhooks/email",
                route_token: Some("bad-token"),
            },
            404,
            "Unknown route token",
        );

        let rows = storage.list_webhook_failures(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.provider == "stripe" && r.status_code == 400));
        let ses = rows.iter().find(|r| r.provider == "ses").unwrap();
        assert_eq!(ses.route_token.as_deref(), Some("bad-token"));
        assert_eq!(storage.list_webhook_failures(1).unwrap().len(), 1);
    }
}
