use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    /// Only refresh tokens are persisted, so stored rows default to this.
    #[default]
    Refresh,
}

/// A signed token and its bookkeeping. Access tokens live only in memory;
/// refresh tokens are rows in `<kind>_refresh_tokens`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Token {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    #[sqlx(skip)]
    pub token_type: TokenType,
    pub version: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Token {
    pub fn new(user_id: i64, token_type: TokenType, version: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            token: String::new(),
            token_type,
            version,
            expires_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the signed value in place; id and version are kept.
    pub fn set_token(&mut self, token: String, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.token = token;
        self.expires_at = expires_at;
        self.updated_at = now;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
