//! Persistence for tokens and canary events.
//!
//! The hit path only needs `TokenStore::find_by_token` and
//! `EventStore::insert_event`; the rest backs the administrative surface.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::event::{Event, NewEvent};
use crate::models::token::{NewToken, Token};

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<Token>, StoreError>;

    async fn insert_token(&self, token: NewToken) -> Result<Token, StoreError>;

    /// Newest first.
    async fn list_tokens(&self, limit: i64) -> Result<Vec<Token>, StoreError>;

    /// Returns false when the token does not exist.
    async fn deactivate_token(&self, token: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError>;

    /// Page is 1-based. Newest capture timestamp first. Returns (total, page).
    async fn list_events(&self, page: i64, per: i64) -> Result<(i64, Vec<Event>), StoreError>;
}

/// Rows to skip for a 1-based page. Saturates instead of overflowing.
pub fn page_offset(page: i64, per: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(per.max(0))
}
