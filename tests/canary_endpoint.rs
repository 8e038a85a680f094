//! Black-box tests for `/c/:token`, driven through the full router.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use canary::models::event::{Event, NewEvent};
use canary::models::token::NewToken;
use canary::notification::webhook::WebhookNotifier;
use canary::notification::AlertSink;
use canary::store::memory::MemoryStore;
use canary::store::{EventStore, StoreError, TokenStore};

use common::*;

fn hit(method: &str, uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(body.into())
        .unwrap()
}

async fn wait_for_requests(server: &MockServer, n: usize) -> Vec<wiremock::Request> {
    for _ in 0..200 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= n {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    server.received_requests().await.unwrap_or_default()
}

#[tokio::test]
async fn test_unknown_token_from_private_peer_is_recorded_and_alerted() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sink: Arc<dyn AlertSink> = Arc::new(WebhookNotifier::new(
        format!("{}/hook", mock_server.uri()),
        None,
    ));
    let (state, store) = memory_state(test_config(), vec![sink]);
    let app = app_from(state, "10.1.2.3");

    let resp = send(&app, hit("POST", "/c/unknown-token", "x=1")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "OK");

    let events = store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, "unknown-token");
    assert_eq!(events[0].method, "POST");
    assert_eq!(events[0].remote_addr.as_deref(), Some("10.1.2.3"));
    assert_eq!(events[0].body_preview, "x=1");
    assert!(events[0].suspicious);

    let received = wait_for_requests(&mock_server, 1).await;
    assert_eq!(received.len(), 1);
    let alert: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(alert["token"], "unknown-token");
    assert_eq!(alert["token_exists"], false);
    assert_eq!(alert["token_active"], false);
    assert_eq!(alert["suspicious"], true);
    assert_eq!(alert["rate_ok"], true);
    assert_eq!(alert["remote_addr"], "10.1.2.3");
}

#[tokio::test]
async fn test_known_token_alert_carries_owner() {
    let sink = Arc::new(RecordingSink::default());
    let (state, store) = memory_state(test_config(), vec![sink.clone()]);
    store
        .insert_token(NewToken {
            token: "known".into(),
            owner: Some("red-team".into()),
            expires_at: None,
            meta: None,
        })
        .await
        .unwrap();
    let app = app_from(state, "8.8.8.8");

    let resp = send(&app, hit("GET", "/c/known", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);

    assert!(eventually(|| sink.calls.load(Ordering::SeqCst) == 1).await);
    let payloads = sink.payloads.lock().await;
    assert!(payloads[0].token_exists);
    assert!(payloads[0].token_active);
    assert_eq!(payloads[0].token_owner.as_deref(), Some("red-team"));
    assert!(!payloads[0].suspicious);
}

#[tokio::test]
async fn test_response_does_not_reveal_token_state() {
    let (state, store) = memory_state(test_config(), Vec::new());
    store
        .insert_token(NewToken {
            token: "real".into(),
            owner: None,
            expires_at: None,
            meta: None,
        })
        .await
        .unwrap();
    let app = app_from(state, "10.0.0.1");

    let known = send(&app, hit("GET", "/c/real", Body::empty())).await;
    let unknown = send(&app, hit("GET", "/c/bogus", Body::empty())).await;
    assert_eq!(known.status(), unknown.status());
    assert_eq!(body_string(known).await, body_string(unknown).await);
}

#[tokio::test]
async fn test_webhook_failure_does_not_affect_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let sink: Arc<dyn AlertSink> = Arc::new(WebhookNotifier::new(mock_server.uri(), None));
    let (state, store) = memory_state(test_config(), vec![sink]);
    let app = app_from(state, "10.0.0.1");

    let resp = send(&app, hit("POST", "/c/abc", "payload")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.events().await.len(), 1);
}

#[tokio::test]
async fn test_no_sinks_configured_still_records() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.4.4");

    let resp = send(&app, hit("GET", "/c/abc", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.events().await.len(), 1);
}

#[tokio::test]
async fn test_rapid_fire_from_public_peer() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    for _ in 0..25 {
        let resp = send(&app, hit("GET", "/c/tok", Body::empty())).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let events = store.events().await;
    assert_eq!(events.len(), 25);
    let suspicious = events.iter().filter(|e| e.suspicious).count();
    assert!(suspicious >= 5, "expected at least 5 rate-limited hits, got {}", suspicious);
    assert!(events[..20].iter().all(|e| !e.suspicious));
}

#[tokio::test]
async fn test_rate_limit_is_per_token() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    for _ in 0..20 {
        send(&app, hit("GET", "/c/one", Body::empty())).await;
    }
    send(&app, hit("GET", "/c/two", Body::empty())).await;

    let events = store.events().await;
    let two: Vec<&Event> = events.iter().filter(|e| e.token == "two").collect();
    assert_eq!(two.len(), 1);
    assert!(!two[0].suspicious);
}

#[tokio::test]
async fn test_concurrent_hits_respect_the_limit() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let mut handles = Vec::new();
    for _ in 0..40 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            send(&app, hit("GET", "/c/burst", Body::empty())).await.status()
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), StatusCode::OK);
    }

    let events = store.events().await;
    assert_eq!(events.len(), 40);
    assert_eq!(events.iter().filter(|e| !e.suspicious).count(), 20);
}

#[tokio::test]
async fn test_large_body_preview_is_truncated() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let resp = send(&app, hit("PUT", "/c/big", "A".repeat(10_000))).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let events = store.events().await;
    assert_eq!(events[0].body_preview.chars().count(), 2000);
    let raw_preview = events[0].raw["body_preview"].as_str().unwrap();
    assert_eq!(raw_preview.len(), 4096);
}

#[tokio::test]
async fn test_forwarded_for_takes_precedence_over_peer() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "10.0.0.5");

    let req = Request::builder()
        .method("GET")
        .uri("/c/xff")
        .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
        .body(Body::empty())
        .unwrap();
    send(&app, req).await;

    let events = store.events().await;
    assert_eq!(events[0].remote_addr.as_deref(), Some("203.0.113.5"));
    assert!(!events[0].suspicious);
}

#[tokio::test]
async fn test_forwarded_for_ignored_when_untrusted() {
    let mut cfg = test_config();
    cfg.trust_forwarded_for = false;
    let (state, store) = memory_state(cfg, Vec::new());
    let app = app_from(state, "10.0.0.5");

    let req = Request::builder()
        .method("GET")
        .uri("/c/xff")
        .header("x-forwarded-for", "203.0.113.5")
        .body(Body::empty())
        .unwrap();
    send(&app, req).await;

    let events = store.events().await;
    assert_eq!(events[0].remote_addr.as_deref(), Some("10.0.0.5"));
    assert!(events[0].suspicious);
}

#[tokio::test]
async fn test_metadata_host_header_is_suspicious() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let req = Request::builder()
        .method("GET")
        .uri("/c/meta?role=admin")
        .header("host", "169.254.169.254:80")
        .body(Body::empty())
        .unwrap();
    send(&app, req).await;

    let events = store.events().await;
    assert!(events[0].suspicious);
    assert_eq!(events[0].path, "/c/meta?role=admin");
    assert_eq!(events[0].raw["args"]["role"], "admin");
    assert_eq!(events[0].headers.get("host").map(String::as_str), Some("169.254.169.254:80"));
}

#[tokio::test]
async fn test_every_method_is_accepted() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::from_bytes(b"PROPFIND").unwrap(),
    ];
    for m in &methods {
        let resp = send(&app, hit(m.as_str(), "/c/methods", Body::empty())).await;
        assert_eq!(resp.status(), StatusCode::OK, "method {}", m);
    }

    let events = store.events().await;
    assert_eq!(events.len(), methods.len());
    assert!(events.iter().any(|e| e.method == "PROPFIND"));
}

#[tokio::test]
async fn test_response_hygiene_headers() {
    let (state, _store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let resp = send(&app, hit("GET", "/c/hdr", Body::empty())).await;
    let headers = resp.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["cache-control"], "no-store");
    assert!(headers.contains_key("x-request-id"));
    assert!(!headers.contains_key("server"));
}

/// Token lookups work, event writes always fail.
struct BrokenEvents;

#[async_trait]
impl EventStore for BrokenEvents {
    async fn insert_event(&self, _event: NewEvent) -> Result<Event, StoreError> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn list_events(&self, _page: i64, _per: i64) -> Result<(i64, Vec<Event>), StoreError> {
        Ok((0, Vec::new()))
    }
}

#[tokio::test]
async fn test_recording_failure_returns_500_without_alert() {
    let sink = Arc::new(RecordingSink::default());
    let tokens = Arc::new(MemoryStore::new());
    let state = state_with(test_config(), tokens, Arc::new(BrokenEvents), vec![sink.clone()]);
    let app = app_from(state, "10.0.0.1");

    let resp = send(&app, hit("POST", "/c/lost", "evidence")).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_string(resp).await;
    assert!(!body.contains("lost"));
    assert!(!body.contains("disk on fire"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_binary_body_is_recorded_with_replacements() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let body = vec![0x89, b'P', b'N', b'G', 0, 0, 0, 13];
    let resp = send(&app, hit("POST", "/c/binary", body)).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let events = store.events().await;
    assert_eq!(events[0].body_preview, "\u{fffd}PNG\u{fffd}\u{fffd}\u{fffd}\r");
    assert!(!events[0].body_preview.contains('\0'));
}

#[tokio::test]
async fn test_non_utf8_header_value_is_recorded() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let req = Request::builder()
        .method("GET")
        .uri("/c/hdr-bytes")
        .header("x-legacy", HeaderValue::from_bytes(b"caf\xe9").unwrap())
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, req).await.status(), StatusCode::OK);

    let events = store.events().await;
    assert_eq!(events[0].headers["x-legacy"], "caf\u{fffd}");
}

#[tokio::test]
async fn test_undecodable_token_segment_is_recorded() {
    let sink = Arc::new(RecordingSink::default());
    let (state, store) = memory_state(test_config(), vec![sink.clone()]);
    let app = app_from(state, "8.8.8.8");

    let resp = send(&app, hit("GET", "/c/%FFabc", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "OK");

    let events = store.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].token, "\u{fffd}abc");
    assert_eq!(events[0].path, "/c/%FFabc");
    assert!(eventually(|| sink.calls.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_nul_in_token_is_replaced() {
    let (state, store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let resp = send(&app, hit("GET", "/c/%00x", Body::empty())).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.events().await[0].token, "\u{fffd}x");
}

#[tokio::test]
async fn test_request_id_generated_or_propagated() {
    let (state, _store) = memory_state(test_config(), Vec::new());
    let app = app_from(state, "8.8.8.8");

    let generated = send(&app, hit("GET", "/c/rid", Body::empty())).await;
    let id = generated.headers()["x-request-id"].to_str().unwrap();
    assert!(uuid::Uuid::parse_str(id).is_ok());

    let req = Request::builder()
        .uri("/c/rid")
        .header("x-request-id", "upstream-42")
        .body(Body::empty())
        .unwrap();
    let resp = send(&app, req).await;
    assert_eq!(resp.headers()["x-request-id"], "upstream-42");
}
