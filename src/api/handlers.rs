use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::event::Event;
use crate::models::token::{generate_token_value, NewToken, Token};
use crate::server::AppState;
use crate::store::{StoreError, TokenStore};

/// Tokens returned by `GET /tokens`.
pub const TOKEN_LIST_LIMIT: i64 = 200;
const MAX_PER_PAGE: i64 = 500;
const MAX_PAGE: i64 = 1_000_000;
/// Matches the `tokens.owner` column width.
const MAX_OWNER_CHARS: usize = 128;
const GENERATE_ATTEMPTS: usize = 5;

// ── Request / Response DTOs ──────────────────────────────────

/// Parameters for token issuance. Accepted as JSON body or query string;
/// body values take precedence.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTokenParams {
    pub owner: Option<String>,
    /// Seconds until expiry. Kept loose so garbage falls back to the default.
    pub expires_in: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub count: usize,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventListParams {
    pub page: Option<String>,
    pub per: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventListResponse {
    pub total: i64,
    pub page: i64,
    pub per: i64,
    pub events: Vec<Event>,
}

// ── Shared logic (also used by the CLI) ──────────────────────

/// Interpret `expires_in`: missing or unparseable means `default_secs`,
/// 0 means no expiry.
pub fn resolve_expiry(
    expires_in: Option<&Value>,
    default_secs: u64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let secs = match expires_in {
        None | Some(Value::Null) => default_secs as i64,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default_secs as i64),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default_secs as i64),
        Some(_) => default_secs as i64,
    };
    if secs == 0 {
        return None;
    }
    chrono::Duration::try_seconds(secs).and_then(|d| now.checked_add_signed(d))
}

/// Issue a new token, retrying on the rare value collision.
pub async fn issue_token(
    tokens: &dyn TokenStore,
    owner: Option<String>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Token, AppError> {
    let mut last_err = None;
    for _ in 0..GENERATE_ATTEMPTS {
        let candidate = NewToken {
            token: generate_token_value(),
            owner: owner.clone(),
            expires_at,
            meta: Some(json!({ "created_via": "api" })),
        };
        match tokens.insert_token(candidate).await {
            Ok(t) => return Ok(t),
            Err(StoreError::Duplicate(v)) => {
                tracing::warn!(value = %v, "token value collision, regenerating");
                last_err = Some(StoreError::Duplicate(v));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err
        .map(AppError::from)
        .unwrap_or_else(|| AppError::Internal(anyhow::anyhow!("token generation exhausted"))))
}

/// Clamp listing parameters; non-numeric input falls back to page 1, 50 per page.
pub fn page_params(params: &EventListParams) -> (i64, i64) {
    let page = params.page.as_deref().map(str::parse::<i64>);
    let per = params.per.as_deref().map(str::parse::<i64>);
    match (page.unwrap_or(Ok(1)), per.unwrap_or(Ok(50))) {
        (Ok(page), Ok(per)) => (page.clamp(1, MAX_PAGE), per.clamp(1, MAX_PER_PAGE)),
        _ => (1, 50),
    }
}

pub fn token_url(base_url: &str, token: &str) -> String {
    format!("{}/c/{}", base_url, token)
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /create_token: issue a new canary token
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateTokenParams>,
    body: Option<Json<CreateTokenParams>>,
) -> Result<Json<CreateTokenResponse>, AppError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let owner = body
        .owner
        .or(query.owner)
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| "default".to_string());
    if owner.chars().count() > MAX_OWNER_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "owner must be at most {} characters",
            MAX_OWNER_CHARS
        )));
    }
    let expires_in = body.expires_in.or(query.expires_in);
    let expires_at = resolve_expiry(expires_in.as_ref(), state.config.token_expiry_secs, Utc::now());

    let token = issue_token(state.tokens.as_ref(), Some(owner), expires_at).await?;
    tracing::info!(token = %token.token, owner = ?token.owner, "token issued");

    Ok(Json(CreateTokenResponse {
        url: token_url(&state.config.base_url, &token.token),
        token: token.token,
        expires_at: token.expires_at,
    }))
}

/// GET /tokens: newest issued tokens
pub async fn list_tokens(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenListResponse>, AppError> {
    let tokens = state.tokens.list_tokens(TOKEN_LIST_LIMIT).await?;
    Ok(Json(TokenListResponse {
        count: tokens.len(),
        tokens,
    }))
}

/// POST /tokens/:token/deactivate: stop a token from resolving
pub async fn deactivate_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<Value>, AppError> {
    if !state.tokens.deactivate_token(&token).await? {
        return Err(AppError::TokenNotFound);
    }
    tracing::info!(token = %token, "token deactivated");
    Ok(Json(json!({ "ok": true })))
}

/// GET /events: recorded hits, newest first
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventListParams>,
) -> Result<Json<EventListResponse>, AppError> {
    let (page, per) = page_params(&params);
    let (total, events) = state.events.list_events(page, per).await?;
    Ok(Json(EventListResponse {
        total,
        page,
        per,
        events,
    }))
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_expiry() {
        let now = Utc::now();
        assert_eq!(
            resolve_expiry(None, 60, now),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(
            resolve_expiry(Some(&json!(120)), 60, now),
            Some(now + chrono::Duration::seconds(120))
        );
        assert_eq!(
            resolve_expiry(Some(&json!("30")), 60, now),
            Some(now + chrono::Duration::seconds(30))
        );
        assert_eq!(
            resolve_expiry(Some(&json!("soon")), 60, now),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(resolve_expiry(Some(&json!(0)), 60, now), None);
        assert_eq!(resolve_expiry(None, 0, now), None);
    }

    #[test]
    fn test_page_params() {
        let p = |page: Option<&str>, per: Option<&str>| {
            page_params(&EventListParams {
                page: page.map(String::from),
                per: per.map(String::from),
            })
        };
        assert_eq!(p(None, None), (1, 50));
        assert_eq!(p(Some("3"), Some("10")), (3, 10));
        assert_eq!(p(Some("x"), Some("10")), (1, 50));
        assert_eq!(p(Some("0"), Some("100000")), (1, 500));
        assert_eq!(p(Some("9223372036854775807"), Some("500")), (1_000_000, 500));
    }

    #[test]
    fn test_token_url() {
        assert_eq!(
            token_url("https://canary.example.com", "abc"),
            "https://canary.example.com/c/abc"
        );
    }
}
