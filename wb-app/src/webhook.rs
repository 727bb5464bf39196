//! WhatsApp Cloud API webhook: subscription handshake and delivery ingest.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use wb_graph::WhatsAppClient;
use wb_inbound::{BotError, CanonicalMessage, RouteOutcome, normalize_json};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

pub struct WebhookState {
    pub verify_token: String,
    pub app_secret: Option<String>,
    /// Business account id every delivery must belong to.
    pub tenant_id: String,
    pub client: WhatsAppClient,
    pub router: wb_inbound::Router,
}

pub fn router(state: Arc<WebhookState>, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, get(verify).post(ingest))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[tracing::instrument(level = "debug", skip_all)]
async fn verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let (Some(mode), Some(token), Some(challenge)) =
        (query.mode, query.verify_token, query.challenge)
    else {
        tracing::warn!("webhook verification missing hub parameters");
        return (StatusCode::FORBIDDEN, "verification failed").into_response();
    };
    if mode.trim() == "subscribe" && token.trim() == state.verify_token {
        tracing::info!("webhook subscription verified");
        return (StatusCode::OK, challenge).into_response();
    }
    tracing::warn!(mode = %mode, "webhook verification rejected");
    (StatusCode::FORBIDDEN, "verification failed").into_response()
}

fn error_response(status: StatusCode, error: String) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": error,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "info", skip_all)]
async fn ingest(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.app_secret.as_deref() {
        if !verify_signature(&headers, &body, secret) {
            tracing::warn!("webhook delivery with invalid signature");
            return error_response(
                StatusCode::UNAUTHORIZED,
                format!("invalid {SIGNATURE_HEADER}"),
            );
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid whatsapp webhook payload: {error}"),
            );
        }
    };

    let normalized = match normalize_json(&payload, &state.tenant_id) {
        Ok(normalized) => normalized,
        Err(error) => {
            tracing::warn!(error = %error, "webhook delivery rejected");
            return error_response(StatusCode::BAD_REQUEST, error.to_string());
        }
    };

    let Some(message) = normalized.message else {
        return ok_response("empty");
    };

    if let CanonicalMessage::User(user) = &message {
        mark_as_read(&state.client, user.message_id.as_deref()).await;
    }

    match state.router.route(&message).await {
        Ok(outcome) => ok_response(&outcome_label(&outcome)),
        Err(error @ BotError::Dispatch(_)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        Err(error) => error_response(StatusCode::BAD_REQUEST, error.to_string()),
    }
}

fn ok_response(outcome: &str) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "outcome": outcome,
        })),
    )
        .into_response()
}

async fn mark_as_read(client: &WhatsAppClient, message_id: Option<&str>) {
    let Some(message_id) = message_id else {
        return;
    };
    match client.mark_as_read(message_id).await {
        Ok(receipt) => tracing::debug!(?receipt, "message marked as read"),
        Err(error) => tracing::warn!(error = %error, message_id, "failed to mark message as read"),
    }
}

fn outcome_label(outcome: &RouteOutcome) -> String {
    match outcome {
        RouteOutcome::Skipped => "skipped".to_string(),
        RouteOutcome::CatchAll(kind) => format!("catch_all:{kind}"),
        RouteOutcome::Identity { kind, .. } => format!("identity:{kind}"),
        RouteOutcome::Default => "default".to_string(),
    }
}

/// Checks `x-hub-signature-256: sha256=<hex hmac of body>` against the app
/// secret. A missing or malformed header fails the check.
fn verify_signature(headers: &HeaderMap, body: &[u8], app_secret: &str) -> bool {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
    else {
        return false;
    };
    let Some(digest) = signature
        .strip_prefix("sha256=")
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&digest).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::{Bot, build_router};
    use crate::config::BotConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderValue, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    async fn app(server: &MockServer, app_secret: Option<&str>) -> Router {
        let client = WhatsAppClient::http(&server.uri(), "v16.0", "token", "1234", "waba-1")
            .expect("client");
        let bot = Bot::new(client.clone(), BotConfig::default());
        let state = Arc::new(WebhookState {
            verify_token: "verify-me".to_string(),
            app_secret: app_secret.map(str::to_string),
            tenant_id: "waba-1".to_string(),
            client,
            router: build_router(&bot).expect("router"),
        });
        router(state, "/webhook")
    }

    fn delivery(value: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{ "id": "waba-1", "changes": [{ "field": "messages", "value": value }] }]
        })
    }

    fn text_delivery(body: &str) -> Value {
        delivery(json!({
            "messaging_product": "whatsapp",
            "metadata": { "display_phone_number": "15550000000", "phone_number_id": "1234" },
            "contacts": [{ "profile": { "name": "Ada" }, "wa_id": "15551234567" }],
            "messages": [{
                "from": "15551234567",
                "id": "wamid.in",
                "timestamp": "1700000000",
                "type": "text",
                "text": { "body": body }
            }]
        }))
    }

    fn post(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn response_body_json(response: Response) -> Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&body).expect("response json")
    }

    async fn response_body_text(response: Response) -> String {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        String::from_utf8(body.to_vec()).expect("utf8")
    }

    #[test]
    fn hmac_matches_known_sha256_vector() {
        assert_eq!(
            sign("key", b"The quick brown fox jumps over the lazy dog"),
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn signature_verification_accepts_valid_header() {
        let body = br#"{"hello":"world"}"#;
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&sign("secret", body)).expect("signature header"),
        );
        assert!(verify_signature(&headers, body, "secret"));
        assert!(!verify_signature(&headers, body, "wrong"));
        assert!(!verify_signature(&headers, b"tampered", "secret"));
    }

    #[test]
    fn signature_verification_rejects_malformed_headers() {
        let body = b"{}";
        assert!(!verify_signature(&HeaderMap::new(), body, "secret"));
        for bad in ["deadbeef", "sha256=not-hex", "sha1=abcd"] {
            let mut headers = HeaderMap::new();
            headers.insert(SIGNATURE_HEADER, HeaderValue::from_static(bad));
            assert!(!verify_signature(&headers, body, "secret"), "{bad}");
        }
    }

    #[tokio::test]
    async fn verify_echoes_challenge_for_matching_token() {
        let server = MockServer::start().await;
        let response = app(&server, None)
            .await
            .oneshot(
                Request::builder()
                    .uri(
                        "/webhook?hub.mode=subscribe&hub.verify_token=verify-me\
                         &hub.challenge=1158201444",
                    )
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body_text(response).await, "1158201444");
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token_or_missing_params() {
        let server = MockServer::start().await;
        for uri in [
            "/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1",
            "/webhook?hub.mode=unsubscribe&hub.verify_token=verify-me&hub.challenge=1",
            "/webhook?hub.mode=subscribe&hub.verify_token=verify-me",
            "/webhook",
        ] {
            let response = app(&server, None)
                .await
                .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn ingest_marks_read_and_routes_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v16.0/1234/messages"))
            .and(body_partial_json(json!({ "status": "read", "message_id": "wamid.in" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v16.0/1234/messages"))
            .and(body_partial_json(json!({ "type": "interactive", "to": "15551234567" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "messages": [{ "id": "wamid.out" }] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = app(&server, None)
            .await
            .oneshot(post(&text_delivery("hi")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response_body_json(response).await,
            json!({ "status": "ok", "outcome": "identity:text" })
        );
    }

    #[tokio::test]
    async fn ingest_acknowledges_status_notifications_without_outbound_calls() {
        let server = MockServer::start().await;
        let status = delivery(json!({
            "messaging_product": "whatsapp",
            "metadata": { "display_phone_number": "15550000000", "phone_number_id": "1234" },
            "statuses": [{
                "id": "wamid.out",
                "status": "delivered",
                "timestamp": "1700000001",
                "recipient_id": "15551234567"
            }]
        }));
        let response = app(&server, None)
            .await
            .oneshot(post(&status))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body_json(response).await["outcome"], "skipped");
        let received = server.received_requests().await.expect("recording enabled");
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn ingest_rejects_foreign_tenant_and_bad_json() {
        let server = MockServer::start().await;
        let mut foreign = text_delivery("hi");
        foreign["entry"][0]["id"] = json!("someone-else");
        let response = app(&server, None)
            .await
            .oneshot(post(&foreign))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response_body_json(response).await;
        assert_eq!(body["status"], "error");

        let response = app(&server, None)
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .body(Body::from("{not json"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let received = server.received_requests().await.expect("recording enabled");
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn ingest_requires_valid_signature_when_secret_is_set() {
        let server = MockServer::start().await;
        let payload = delivery(json!({ "messaging_product": "whatsapp" }));

        let response = app(&server, Some("app-secret"))
            .await
            .oneshot(post(&payload))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = payload.to_string();
        let response = app(&server, Some("app-secret"))
            .await
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhook")
                    .header(SIGNATURE_HEADER, sign("app-secret", body.as_bytes()))
                    .body(Body::from(body))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body_json(response).await["outcome"], "empty");
    }

    #[tokio::test]
    async fn ingest_reports_dispatch_failure_as_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v16.0/1234/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let response = app(&server, None)
            .await
            .oneshot(post(&text_delivery("hi")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_body_json(response).await;
        assert_eq!(body["status"], "error");
        assert!(
            body["error"]
                .as_str()
                .expect("error message")
                .starts_with("dispatch failed")
        );
    }

    #[test]
    fn outcome_labels_name_the_route() {
        assert_eq!(outcome_label(&RouteOutcome::Default), "default");
        assert_eq!(
            outcome_label(&RouteOutcome::CatchAll(wb_inbound::MessageKind::Image)),
            "catch_all:image"
        );
    }
}
