use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Uri};
use futures::StreamExt;

/// Raw body bytes read from a canary hit. Anything past this is never buffered.
pub const BODY_READ_LIMIT: usize = 4096;

/// Everything the recorder needs from one inbound request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub token: String,
    pub method: Method,
    /// Path without query string.
    pub path: String,
    /// Path plus query string, as requested.
    pub full_path: String,
    pub query_args: BTreeMap<String, String>,
    pub headers: HeaderMap,
    /// At most [`BODY_READ_LIMIT`] bytes.
    pub body: Vec<u8>,
    pub peer: Option<SocketAddr>,
}

impl CapturedRequest {
    pub async fn capture(
        token: String,
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: Body,
        peer: Option<SocketAddr>,
    ) -> Self {
        let full_path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        Self {
            token,
            method,
            path: uri.path().to_string(),
            full_path,
            query_args: query_args(uri.query()),
            headers,
            body: read_body_prefix(body, BODY_READ_LIMIT).await,
            peer,
        }
    }
}

/// Read at most `limit` bytes of `body`, then stop pulling frames.
/// A transport error mid-body keeps whatever arrived before it.
pub async fn read_body_prefix(body: Body, limit: usize) -> Vec<u8> {
    let mut stream = body.into_data_stream();
    let mut buf = Vec::with_capacity(limit.min(1024));

    while buf.len() < limit {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, read = buf.len(), "body read aborted");
                break;
            }
            None => break,
        }
    }

    buf
}

/// Lossy percent-decode of the token segment of a `/c/{token}` path.
/// Bytes that are not UTF-8 become U+FFFD.
pub fn token_from_path(path: &str) -> String {
    let segment = path.strip_prefix("/c/").unwrap_or(path);
    String::from_utf8_lossy(&urlencoding::decode_binary(segment.as_bytes())).into_owned()
}

/// Decode query parameters. For repeated names the first value wins.
pub fn query_args(query: Option<&str>) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            args.entry(k.into_owned()).or_insert_with(|| v.into_owned());
        }
    }
    args
}
