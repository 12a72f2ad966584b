use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-user revocation counter. Every refresh token carries the version it
/// was minted under and is only honoured while the two are equal.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SessionVersion {
    pub id: i64,
    pub user_id: i64,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionVersion {
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn increment(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}
