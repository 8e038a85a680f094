use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::HOST;
use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::json;

use crate::capture::request::CapturedRequest;
use crate::errors::AppError;
use crate::middleware::classify;
use crate::middleware::reverse_dns::ReverseResolver;
use crate::models::event::{Event, NewEvent};
use crate::store::EventStore;

/// Characters of decoded body kept on the event itself.
pub const BODY_PREVIEW_CHARS: usize = 2000;

/// Why a hit was (or was not) flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verdict {
    pub internal_address: bool,
    pub internal_host: bool,
    pub rate_limited: bool,
}

impl Verdict {
    pub fn is_suspicious(&self) -> bool {
        self.internal_address || self.internal_host || self.rate_limited
    }
}

/// Builds the canonical event for a canary hit and persists it.
///
/// Only the store write can fail; body decoding, address derivation and
/// reverse resolution all degrade to defaults.
pub struct EventRecorder {
    events: Arc<dyn EventStore>,
    resolver: Arc<dyn ReverseResolver>,
    trust_forwarded_for: bool,
}

impl EventRecorder {
    pub fn new(
        events: Arc<dyn EventStore>,
        resolver: Arc<dyn ReverseResolver>,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            events,
            resolver,
            trust_forwarded_for,
        }
    }

    pub async fn record(&self, req: &CapturedRequest, rate_ok: bool) -> Result<Event, AppError> {
        let timestamp = Utc::now();

        let body_text = scrub_nul(&String::from_utf8_lossy(&req.body));
        let body_preview = truncate_chars(&body_text, BODY_PREVIEW_CHARS);

        let remote_addr = derive_remote_addr(&req.headers, req.peer, self.trust_forwarded_for);
        let host_header = req
            .headers
            .get(HOST)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();

        let verdict = Verdict {
            internal_address: remote_addr
                .as_deref()
                .is_some_and(classify::is_suspicious_address),
            internal_host: classify::is_suspicious_host(&host_header),
            rate_limited: !rate_ok,
        };
        tracing::debug!(token = %req.token, ?verdict, "classified canary hit");

        let remote_host = match remote_addr.as_deref() {
            Some(addr) => self.resolver.resolve(addr).await,
            None => None,
        };

        let headers = header_map(&req.headers);
        let raw = json!({
            "method": req.method.as_str(),
            "path": scrub_nul(&req.path),
            "args": req.query_args,
            "headers": headers,
            "body_preview": body_text,
            "remote_addr": remote_addr,
            "timestamp": timestamp.to_rfc3339(),
        });

        let event = NewEvent {
            token: scrub_nul(&req.token),
            timestamp,
            method: req.method.as_str().to_string(),
            path: scrub_nul(&req.full_path),
            headers,
            body_preview,
            remote_addr,
            remote_host,
            suspicious: verdict.is_suspicious(),
            raw,
        };

        self.events
            .insert_event(event)
            .await
            .map_err(AppError::RecordingFailed)
    }
}

/// First non-empty `X-Forwarded-For` hop when trusted, else the socket peer.
pub fn derive_remote_addr(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(String::from);

    forwarded.or_else(|| peer.map(|p| p.ip().to_string()))
}

/// Flatten headers to name -> value. Repeated names keep the last value;
/// non-UTF-8 bytes are replaced rather than rejected.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (name, value) in headers {
        map.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    map
}

/// Replace NUL with U+FFFD. Postgres text columns reject NUL even though it
/// is valid UTF-8.
pub fn scrub_nul(s: &str) -> String {
    s.replace('\0', "\u{fffd}")
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
