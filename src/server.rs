use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::any;
use axum::Router;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::capture::handler::canary_handler;
use crate::config::Config;
use crate::middleware::rate_limit::RateLimiter;
use crate::middleware::recorder::EventRecorder;
use crate::middleware::reverse_dns::{DisabledResolver, ReverseResolver, SystemResolver};
use crate::notification::email::EmailNotifier;
use crate::notification::webhook::WebhookNotifier;
use crate::notification::{AlertDispatcher, AlertSink};
use crate::store::{EventStore, TokenStore};

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub tokens: Arc<dyn TokenStore>,
    pub events: Arc<dyn EventStore>,
    pub rate_limiter: RateLimiter,
    pub recorder: EventRecorder,
    pub alerts: AlertDispatcher,
}

impl AppState {
    pub fn new(
        config: Config,
        tokens: Arc<dyn TokenStore>,
        events: Arc<dyn EventStore>,
        resolver: Arc<dyn ReverseResolver>,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            rate_limiter: RateLimiter::new(config.rate_limit_max, config.rate_limit_window()),
            recorder: EventRecorder::new(events.clone(), resolver, config.trust_forwarded_for),
            config,
            tokens,
            events,
            alerts,
        }
    }

    /// Wire resolver and alert sinks from configuration.
    /// Spawns the alert worker, so it must run inside a Tokio runtime.
    pub fn from_config<S>(config: Config, store: Arc<S>) -> Self
    where
        S: TokenStore + EventStore + 'static,
    {
        let resolver = resolver_from_config(&config);
        let alerts = AlertDispatcher::spawn(sinks_from_config(&config));
        Self::new(config, store.clone(), store, resolver, alerts)
    }
}

pub fn resolver_from_config(config: &Config) -> Arc<dyn ReverseResolver> {
    if config.reverse_dns {
        Arc::new(SystemResolver::new(config.reverse_dns_timeout()))
    } else {
        Arc::new(DisabledResolver)
    }
}

/// Webhook first, then email; each only when configured.
pub fn sinks_from_config(config: &Config) -> Vec<Arc<dyn AlertSink>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if let Some(url) = &config.alert_webhook {
        sinks.push(Arc::new(WebhookNotifier::new(
            url.clone(),
            config.alert_webhook_secret.clone(),
        )));
    }
    if let Some(email) = EmailNotifier::from_config(config) {
        sinks.push(Arc::new(email));
    }
    if sinks.is_empty() {
        tracing::warn!("no alert sinks configured; hits are recorded but nobody is notified");
    }
    sinks
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/c/:token", any(canary_handler))
        .merge(api::api_router(state.clone()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("SSRF canary listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

/// Middleware: response hygiene headers, and no server fingerprint.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");

    resp
}
