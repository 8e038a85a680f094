use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::PathRejection;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};

use crate::capture::request::{token_from_path, CapturedRequest};
use crate::errors::AppError;
use crate::notification::AlertPayload;
use crate::server::AppState;

/// Fixed reply for every recorded hit. Carries nothing about classification,
/// token validity or rate state.
pub const CANARY_RESPONSE: (StatusCode, &str) = (StatusCode::OK, "OK");

/// Records any request against a token URL, whatever the method.
///
/// Order: rate check, token lookup, record, alert, respond. The token lookup
/// only enriches the alert; unknown, expired and inactive tokens are recorded
/// the same way. Alerting is enqueued and never awaited. The only failure
/// that reaches the client is a store write error. A token segment that does
/// not percent-decode to UTF-8 is decoded lossily instead of rejected.
#[tracing::instrument(
    name = "canary_hit",
    skip_all,
    fields(token = tracing::field::Empty, method = %method)
)]
pub async fn canary_handler(
    State(state): State<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Body,
) -> Result<(StatusCode, &'static str), AppError> {
    let token = match path {
        Ok(Path(token)) => token,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "undecodable token segment, using lossy decode");
            token_from_path(uri.path())
        }
    };
    tracing::Span::current().record("token", token.as_str());

    // -- 1. Rate window --
    let rate_ok = state.rate_limiter.check(&token);

    // -- 2. Token resolution (enrichment only) --
    let known = match state.tokens.find_by_token(&token).await {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "token lookup failed, recording hit as unknown");
            None
        }
    };

    // -- 3. Record --
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let captured = CapturedRequest::capture(token, method, &uri, headers, body, peer).await;
    let event = state.recorder.record(&captured, rate_ok).await?;

    tracing::info!(
        event_id = event.id,
        remote_addr = event.remote_addr.as_deref().unwrap_or("-"),
        remote_host = event.remote_host.as_deref().unwrap_or("-"),
        suspicious = event.suspicious,
        rate_ok,
        token_known = known.is_some(),
        "canary hit recorded"
    );

    // -- 4. Alert (fire-and-forget) --
    state
        .alerts
        .dispatch(AlertPayload::from_hit(&event, known.as_ref(), rate_ok));

    Ok(CANARY_RESPONSE)
}
