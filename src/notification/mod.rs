//! Fire-and-forget alert fan-out.
//!
//! The handler hands an [`AlertPayload`] to [`AlertDispatcher::dispatch`],
//! which only enqueues it. A single worker task drains the queue and runs each
//! delivery on its own task, trying every configured sink in order. Sinks
//! report success as a bool; failures are logged and never retried.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::models::event::Event;
use crate::models::token::Token;

pub mod email;
pub mod webhook;

/// Pending alerts held before new ones are dropped.
pub const QUEUE_CAPACITY: usize = 1024;

/// Deliveries running at once.
pub const MAX_IN_FLIGHT: usize = 16;

/// What operators receive for every canary hit.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub token: String,
    /// The token is present in the store, whatever its state.
    pub token_exists: bool,
    /// The token is present, active and unexpired.
    pub token_active: bool,
    pub token_owner: Option<String>,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub suspicious: bool,
    pub headers: BTreeMap<String, String>,
    pub body_preview: String,
    pub rate_ok: bool,
}

impl AlertPayload {
    pub fn from_hit(event: &Event, token: Option<&Token>, rate_ok: bool) -> Self {
        Self {
            token: event.token.clone(),
            token_exists: token.is_some(),
            token_active: token.is_some_and(|t| t.is_resolved(event.timestamp)),
            token_owner: token.and_then(|t| t.owner.clone()),
            timestamp: event.timestamp.to_rfc3339(),
            method: event.method.clone(),
            path: event.path.clone(),
            remote_addr: event.remote_addr.clone(),
            remote_host: event.remote_host.clone(),
            suspicious: event.suspicious,
            headers: event.headers.clone(),
            body_preview: event.body_preview.clone(),
            rate_ok,
        }
    }
}

/// A notification channel. `deliver` must swallow its own errors.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, payload: &AlertPayload) -> bool;
}

#[derive(Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<AlertPayload>,
}

impl AlertDispatcher {
    /// Spawn the delivery worker. Must be called inside a Tokio runtime.
    pub fn spawn(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(run_worker(rx, Arc::new(sinks)));
        Self { tx }
    }

    /// Enqueue `payload` and return immediately. Never blocks, never fails.
    pub fn dispatch(&self, payload: AlertPayload) {
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(p)) => {
                warn!(token = %p.token, "alert queue full, dropping alert");
            }
            Err(mpsc::error::TrySendError::Closed(p)) => {
                warn!(token = %p.token, "alert worker stopped, dropping alert");
            }
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<AlertPayload>, sinks: Arc<Vec<Arc<dyn AlertSink>>>) {
    let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));

    while let Some(payload) = rx.recv().await {
        if sinks.is_empty() {
            debug!(token = %payload.token, "no alert sinks configured");
            continue;
        }

        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let sinks = sinks.clone();
        tokio::spawn(async move {
            deliver_all(&sinks, &payload).await;
            drop(permit);
        });
    }
}

/// Try every sink in order; one failing never stops the next.
pub async fn deliver_all(sinks: &[Arc<dyn AlertSink>], payload: &AlertPayload) -> usize {
    let mut delivered = 0;
    for sink in sinks {
        if sink.deliver(payload).await {
            debug!(sink = sink.name(), token = %payload.token, "alert delivered");
            delivered += 1;
        } else {
            warn!(sink = sink.name(), token = %payload.token, "alert delivery failed");
        }
    }
    delivered
}
