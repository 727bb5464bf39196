//! wabot server: webhook routes behind the HTTP middleware stack.

use crate::bot::{self, Bot};
use crate::config::{ServerConfig, WabotConfig};
use crate::routes;
use crate::webhook::{self, WebhookState};
use anyhow::Result;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use wb_graph::{TextMessage, WhatsAppClient};

fn build_client(cfg: &WabotConfig) -> Result<WhatsAppClient> {
    let whatsapp = &cfg.whatsapp;
    Ok(WhatsAppClient::http(
        &whatsapp.base_url,
        &whatsapp.api_version,
        &whatsapp.access_token,
        &whatsapp.phone_number_id,
        &whatsapp.business_account_id,
    )?)
}

fn build_state(cfg: &WabotConfig) -> Result<Arc<WebhookState>> {
    let client = build_client(cfg)?;
    let bot = Bot::new(client.clone(), cfg.bot.clone());
    let router = bot::build_router(&bot)?;
    tracing::debug!(?router, "handler registry frozen");
    Ok(Arc::new(WebhookState {
        verify_token: cfg.whatsapp.webhook_verify_token.trim().to_string(),
        app_secret: cfg.app_secret().map(str::to_string),
        tenant_id: cfg.whatsapp.business_account_id.trim().to_string(),
        client,
        router,
    }))
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = WabotConfig::load_with_path(config_path).await?;
    build_state(&cfg)?;
    tracing::info!(
        config_path = %path.display(),
        business_account_id = %cfg.whatsapp.business_account_id,
        phone_number_id = %cfg.whatsapp.phone_number_id,
        api_version = %cfg.whatsapp.api_version,
        webhook_path = %cfg.server.webhook_path,
        signature_checks = cfg.app_secret().is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    recipient: &str,
    message: &str,
) -> Result<()> {
    let cfg = WabotConfig::load(config_path).await?;
    let client = build_client(&cfg)?;
    let sent = client.send_text(recipient, TextMessage::new(message)).await?;
    tracing::info!(message_id = %sent.id, recipient, "message sent");
    println!("{}", sent.id);
    Ok(())
}

pub fn app(state: Arc<WebhookState>, server: &ServerConfig) -> axum::Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::debug!(
                method = %request.method(),
                uri = %request.uri(),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    routes::router()
        .merge(webhook::router(state, &server.webhook_path))
        .layer(GlobalConcurrencyLimitLayer::new(server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = WabotConfig::load_with_path(config_path).await?;
    tracing::info!(config_path = %path.display(), "config loaded");
    let state = build_state(&cfg)?;
    let addr = cfg.bind_addr()?;
    let listener = bind_listener(addr).await?;

    let shutdown = CancellationToken::new();
    let app = app(state, &cfg.server);

    tracing::info!(%addr, webhook_path = %cfg.server.webhook_path, "wabot serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("bind failed for {addr}: {e}"))
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install SIGTERM handler; falling back to ctrl_c only"
                );
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
