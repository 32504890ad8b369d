//! Change notifications over Server-Sent Events
//!
//! GET /api/events streams `change` events for the caller's organization.
//! Clients re-query on each event. A `resync` event means notifications were
//! dropped and every view should be refreshed.

use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::api::auth::Auth;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/events", get(stream_changes))
}

pub async fn stream_changes(
    State(state): State<AppState>,
    Auth(ctx): Auth,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();
    let organization_id = ctx.organization_id;
    tracing::debug!(organization_id = %organization_id, "Change stream opened");

    let events = stream::unfold(rx, move |mut rx| {
        let organization_id = organization_id.clone();
        async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        if change.organization_id() != Some(organization_id.as_str()) {
                            continue;
                        }
                        match Event::default().event("change").json_data(&change) {
                            Ok(event) => return Some((Ok(event), rx)),
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to encode change event");
                                continue;
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Change stream lagged");
                        let event = Event::default().event("resync").data(skipped.to_string());
                        return Some((Ok(event), rx));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
