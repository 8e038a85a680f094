use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{page_offset, EventStore, StoreError, TokenStore};
use crate::models::event::{headers_from_text, Event, NewEvent};
use crate::models::token::{NewToken, Token};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for PgStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<Token>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token, owner, created_at, expires_at, active, meta FROM tokens WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Token::from))
    }

    async fn insert_token(&self, token: NewToken) -> Result<Token, StoreError> {
        let meta = token.meta.as_ref().map(serde_json::to_string).transpose()?;
        let row = sqlx::query_as::<_, TokenRow>(
            r#"INSERT INTO tokens (token, owner, expires_at, active, meta)
               VALUES ($1, $2, $3, true, $4)
               RETURNING id, token, owner, created_at, expires_at, active, meta"#,
        )
        .bind(&token.token)
        .bind(&token.owner)
        .bind(token.expires_at)
        .bind(meta)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_tokens(&self, limit: i64) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT id, token, owner, created_at, expires_at, active, meta FROM tokens ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Token::from).collect())
    }

    async fn deactivate_token(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE tokens SET active = false WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let headers = serde_json::to_string(&event.headers)?;
        let raw = serde_json::to_string(&event.raw)?;

        let id = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO events (
                token, timestamp, method, path, headers, body_preview,
                remote_addr, remote_host, suspicious, raw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id"#,
        )
        .bind(&event.token)
        .bind(event.timestamp)
        .bind(&event.method)
        .bind(&event.path)
        .bind(headers)
        .bind(&event.body_preview)
        .bind(&event.remote_addr)
        .bind(&event.remote_host)
        .bind(event.suspicious)
        .bind(raw)
        .fetch_one(&self.pool)
        .await?;

        Ok(event.into_event(id))
    }

    async fn list_events(&self, page: i64, per: i64) -> Result<(i64, Vec<Event>), StoreError> {
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, EventRow>(
            r#"SELECT id, token, timestamp, method, path, headers, body_preview,
                      remote_addr, remote_host, suspicious, raw
               FROM events
               ORDER BY timestamp DESC, id DESC
               LIMIT $1 OFFSET $2"#,
        )
        .bind(per)
        .bind(page_offset(page, per))
        .fetch_all(&self.pool)
        .await?;

        Ok((total, rows.into_iter().map(Event::from).collect()))
    }
}

// -- Row structs --

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    id: i64,
    token: String,
    owner: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    active: bool,
    meta: Option<String>,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Token {
            id: row.id,
            token: row.token,
            owner: row.owner,
            created_at: row.created_at,
            expires_at: row.expires_at,
            active: row.active,
            meta: row.meta.and_then(|m| serde_json::from_str(&m).ok()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    token: String,
    timestamp: DateTime<Utc>,
    method: String,
    path: String,
    headers: Option<String>,
    body_preview: Option<String>,
    remote_addr: Option<String>,
    remote_host: Option<String>,
    suspicious: bool,
    raw: Option<String>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            id: row.id,
            headers: headers_from_text(row.headers.as_deref()),
            raw: row
                .raw
                .and_then(|r| serde_json::from_str(&r).ok())
                .unwrap_or(serde_json::Value::Null),
            token: row.token,
            timestamp: row.timestamp,
            method: row.method,
            path: row.path,
            body_preview: row.body_preview.unwrap_or_default(),
            remote_addr: row.remote_addr,
            remote_host: row.remote_host,
            suspicious: row.suspicious,
        }
    }
}
