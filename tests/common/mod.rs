#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, Response};
use axum::Router;
use tower::ServiceExt;

use canary::config::Config;
use canary::middleware::reverse_dns::DisabledResolver;
use canary::notification::{AlertDispatcher, AlertPayload, AlertSink};
use canary::server::{router, AppState};
use canary::store::memory::MemoryStore;
use canary::store::{EventStore, TokenStore};

/// Sink that remembers every payload it was handed.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: AtomicUsize,
    pub payloads: tokio::sync::Mutex<Vec<AlertPayload>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, payload: &AlertPayload) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads.lock().await.push(payload.clone());
        true
    }
}

pub fn test_config() -> Config {
    Config {
        reverse_dns: false,
        ..Config::default()
    }
}

pub fn state_with(
    cfg: Config,
    tokens: Arc<dyn TokenStore>,
    events: Arc<dyn EventStore>,
    sinks: Vec<Arc<dyn AlertSink>>,
) -> Arc<AppState> {
    Arc::new(AppState::new(
        cfg,
        tokens,
        events,
        Arc::new(DisabledResolver),
        AlertDispatcher::spawn(sinks),
    ))
}

pub fn memory_state(cfg: Config, sinks: Vec<Arc<dyn AlertSink>>) -> (Arc<AppState>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = state_with(cfg, store.clone(), store.clone(), sinks);
    (state, store)
}

/// Router whose requests appear to come from `peer`.
pub fn app_from(state: Arc<AppState>, peer: &str) -> Router {
    let addr: SocketAddr = format!("{}:40000", peer).parse().expect("peer address");
    router(state).layer(MockConnectInfo(addr))
}

pub async fn send(app: &Router, req: Request<Body>) -> Response<Body> {
    app.clone().oneshot(req).await.expect("router is infallible")
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
