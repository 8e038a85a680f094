use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An issued canary token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    #[serde(skip_serializing)]
    pub id: i64,
    pub token: String,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub meta: Option<serde_json::Value>,
}

impl Token {
    /// A token resolves when it is active and not past its expiry.
    pub fn is_resolved(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// Input for issuing a token.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub token: String,
    pub owner: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

/// Generate a fresh 32-hex-char token value.
pub fn generate_token_value() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
