//! Cache-aside data providers, one per credential family.
//!
//! Providers are the only code that touches both stores. Ordering rules:
//! reads try the cache, fall back to the database and repopulate; writes go
//! to the database first and only then to the cache; deletes evict the cache
//! before removing the row. Cache failures never fail an operation: a read
//! error is a miss and a write error is logged.

mod code;
mod password;
mod token;
mod version;

pub use code::CodeProvider;
pub use password::PasswordProvider;
pub use token::TokenProvider;
pub use version::VersionProvider;

use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use crate::services::CacheStore;

async fn cache_get<T: DeserializeOwned>(cache: &dyn CacheStore, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Cache read failed, falling back to database");
            None
        }
    }
}

async fn cache_set<T: Serialize>(cache: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
            return;
        }
    };
    if let Err(e) = cache.set(key, &raw, ttl).await {
        tracing::warn!(key = %key, error = %e, "Cache write failed");
    }
}

async fn cache_delete(cache: &dyn CacheStore, key: &str) {
    if let Err(e) = cache.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Cache eviction failed");
    }
}

/// Remaining lifetime of an entity, clamped at zero.
fn ttl_until(expires_at: chrono::DateTime<chrono::Utc>) -> Duration {
    (expires_at - chrono::Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}
