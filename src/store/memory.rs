use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{page_offset, EventStore, StoreError, TokenStore};
use crate::models::event::{Event, NewEvent};
use crate::models::token::{NewToken, Token};

/// Process-local store. Lost on restart; used by tests and `serve --in-memory`.
#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<HashMap<String, Token>>,
    events: RwLock<Vec<Event>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored event in insertion order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<Token>, StoreError> {
        Ok(self.tokens.read().await.get(token).cloned())
    }

    async fn insert_token(&self, token: NewToken) -> Result<Token, StoreError> {
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&token.token) {
            return Err(StoreError::Duplicate(token.token));
        }
        let stored = Token {
            id: tokens.len() as i64 + 1,
            token: token.token,
            owner: token.owner,
            created_at: Utc::now(),
            expires_at: token.expires_at,
            active: true,
            meta: token.meta,
        };
        tokens.insert(stored.token.clone(), stored.clone());
        Ok(stored)
    }

    async fn list_tokens(&self, limit: i64) -> Result<Vec<Token>, StoreError> {
        let mut all: Vec<Token> = self.tokens.read().await.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn deactivate_token(&self, token: &str) -> Result<bool, StoreError> {
        match self.tokens.write().await.get_mut(token) {
            Some(t) => {
                t.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: NewEvent) -> Result<Event, StoreError> {
        let mut events = self.events.write().await;
        let stored = event.into_event(events.len() as i64 + 1);
        events.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(&self, page: i64, per: i64) -> Result<(i64, Vec<Event>), StoreError> {
        let events = self.events.read().await;
        let mut sorted: Vec<&Event> = events.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let offset = usize::try_from(page_offset(page, per)).unwrap_or(usize::MAX);
        let page_items = sorted
            .into_iter()
            .skip(offset)
            .take(per.max(0) as usize)
            .cloned()
            .collect();

        Ok((events.len() as i64, page_items))
    }
}
