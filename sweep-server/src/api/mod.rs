//! HTTP surface
//!
//! - `/api/*` dashboard API, bearer JWT
//! - `/webhooks/*` provider callbacks, signature or route token
//! - `/health` public

use axum::Router;
use http::{HeaderName, HeaderValue};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::state::AppState;

pub mod audit;
pub mod auth;
pub mod bookings;
pub mod email;
pub mod events;
pub mod health;
pub mod quotes;
pub mod scheduling;
pub mod webhooks;

#[derive(Clone)]
struct XRequestId;

impl MakeRequestId for XRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Every route, no middleware and no state
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(bookings::router())
        .merge(scheduling::router())
        .merge(quotes::router())
        .merge(email::router())
        .merge(audit::router())
        .merge(events::router())
        .merge(webhooks::router())
        .merge(health::router())
}

/// Routes plus middleware, ready to serve
pub fn build_app(state: AppState) -> Router {
    build_router()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            XRequestId,
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::issue_token;
    use crate::ingest::intake;
    use crate::payments::stripe::sign_payload;
    use crate::storage::Storage;
    use crate::test_support::{MockMailer, MockProcessor, admin, cleaner_user, dispatcher, test_config};
    use axum::body::Body;
    use http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use shared::RequestContext;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, AppState) {
        let config = test_config();
        let state = AppState::with_services(
            &config,
            Storage::open_in_memory().unwrap(),
            Arc::new(MockProcessor::default()),
            Arc::new(MockMailer::default()),
        )
        .unwrap();
        (build_app(state.clone()), state)
    }

    fn bearer(ctx: &RequestContext) -> String {
        format!("Bearer {}", issue_token(ctx, &test_config().jwt_secret, 3600))
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, ctx: &RequestContext, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::AUTHORIZATION, bearer(ctx))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_booking(app: &Router) -> i64 {
        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/bookings",
                &dispatcher(),
                json!({ "email": "jane@example.com", "customer_name": "Jane" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let booking = body_json(resp).await;
        assert_eq!(booking["status"], "pending_card");
        booking["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("x-request-id"));
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn api_requires_a_token() {
        let (app, _) = app();
        let resp = app
            .oneshot(Request::get("/api/bookings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn booking_is_created_and_read_back() {
        let (app, _) = app();
        let id = create_booking(&app).await;

        let resp = app
            .oneshot(
                Request::get(format!("/api/bookings/{id}"))
                    .header(header::AUTHORIZATION, bearer(&admin()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["email"], "jane@example.com");
    }

    #[tokio::test]
    async fn cleaners_cannot_charge() {
        let (app, _) = app();
        let id = create_booking(&app).await;
        let resp = app
            .oneshot(post_json(
                &format!("/api/bookings/{id}/charge"),
                &cleaner_user(),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn stripe_webhook_with_bad_signature_is_logged() {
        let (app, state) = app();
        let resp = app
            .oneshot(
                Request::post("/webhooks/stripe")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from(r#"{"id":"evt_1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let failures = state.storage.list_webhook_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "stripe");
        assert_eq!(failures[0].status_code, 400);
    }

    #[tokio::test]
    async fn signed_but_unreadable_stripe_event_is_acknowledged() {
        let (app, state) = app();
        let payload =
            r#"{"id":"evt_bad","type":"payment_intent.succeeded","data":{"object":{}}}"#;
        let signature = sign_payload(
            payload.as_bytes(),
            &test_config().stripe_webhook_secret,
            chrono::Utc::now().timestamp(),
        );
        let resp = app
            .oneshot(
                Request::post("/webhooks/stripe")
                    .header("stripe-signature", signature)
                    .body(Body::from(payload))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["outcome"], "ignored");

        let failures = state.storage.list_webhook_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "stripe");
        assert!(failures[0].reason.contains("has no id"));
    }

    #[tokio::test]
    async fn signed_setup_event_saves_the_card() {
        let (app, state) = app();
        let id = create_booking(&app).await;

        let payload = json!({
            "id": "evt_setup_1",
            "type": "setup_intent.succeeded",
            "data": { "object": {
                "id": "seti_1",
                "payment_method": "pm_1",
                "customer": "cus_1",
                "metadata": { "booking_id": id.to_string() }
            }}
        })
        .to_string();
        let signature = sign_payload(
            payload.as_bytes(),
            &test_config().stripe_webhook_secret,
            chrono::Utc::now().timestamp(),
        );
        let send = |body: String| {
            Request::post("/webhooks/stripe")
                .header("stripe-signature", signature.clone())
                .body(Body::from(body))
                .unwrap()
        };

        let resp = app.clone().oneshot(send(payload.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["outcome"], "applied");
        let booking = state.storage.get_booking(id).unwrap().unwrap();
        assert_eq!(booking.payment_method_id.as_deref(), Some("pm_1"));

        // Redelivery
        let resp = app.oneshot(send(payload)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["outcome"], "duplicate");
    }

    #[tokio::test]
    async fn intake_requires_a_valid_signature() {
        let (app, state) = app();
        let body = json!({
            "eventId": "evt_r1",
            "eventType": "FORM_RESPONSE",
            "data": {
                "responseId": "r1",
                "fields": [
                    { "key": "q1", "label": "Name", "type": "INPUT_TEXT", "value": "Jane Doe" },
                    { "key": "q2", "label": "Email", "type": "INPUT_EMAIL", "value": "jane@example.com" }
                ]
            }
        })
        .to_string();

        let unsigned = app
            .clone()
            .oneshot(Request::post("/webhooks/intake").body(Body::from(body.clone())).unwrap())
            .await
            .unwrap();
        assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

        let signature = intake::sign(body.as_bytes(), &test_config().intake_webhook_secret);
        let resp = app
            .oneshot(
                Request::post("/webhooks/intake")
                    .header(intake::SIGNATURE_HEADER, signature)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["quote_number"], "Q-000001");

        let failures = state.storage.list_webhook_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].provider, "intake");
    }

    #[tokio::test]
    async fn email_webhook_rejects_unknown_route_token() {
        let (app, state) = app();
        let resp = app
            .oneshot(
                Request::post("/webhooks/email/wrong")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let failures = state.storage.list_webhook_failures(10).unwrap();
        assert_eq!(failures[0].route_token.as_deref(), Some("wrong"));
    }

    #[tokio::test]
    async fn event_stream_is_sse() {
        let (app, _) = app();
        let resp = app
            .oneshot(
                Request::get("/api/events")
                    .header(header::AUTHORIZATION, bearer(&dispatcher()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));
    }
}
