use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded interaction with a canary URL. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    /// Token as it appeared in the URL; need not match an issued token.
    pub token: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body_preview: String,
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub suspicious: bool,
    /// Audit snapshot of the request as captured. Stored, not listed.
    #[serde(skip_serializing, default)]
    pub raw: serde_json::Value,
}

/// Event fields before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub token: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body_preview: String,
    pub remote_addr: Option<String>,
    pub remote_host: Option<String>,
    pub suspicious: bool,
    pub raw: serde_json::Value,
}

impl NewEvent {
    pub fn into_event(self, id: i64) -> Event {
        Event {
            id,
            token: self.token,
            timestamp: self.timestamp,
            method: self.method,
            path: self.path,
            headers: self.headers,
            body_preview: self.body_preview,
            remote_addr: self.remote_addr,
            remote_host: self.remote_host,
            suspicious: self.suspicious,
            raw: self.raw,
        }
    }
}

/// Lenient decode of the stored header text. Corrupt rows read back as empty.
pub fn headers_from_text(text: Option<&str>) -> BTreeMap<String, String> {
    text.and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_default()
}
