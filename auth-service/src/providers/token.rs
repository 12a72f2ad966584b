use std::sync::Arc;

use super::{cache_delete, cache_get, cache_set, ttl_until};
use crate::db::UnitOfWork;
use crate::models::{Token, UserKind};
use crate::services::error::StoreError;
use crate::services::CacheStore;

/// Refresh tokens, cached under `refresh:<kind>:<user_id>:<token>` until they
/// expire. Keying by user lets "logout everywhere" purge a user's entries.
#[derive(Clone)]
pub struct TokenProvider {
    cache: Arc<dyn CacheStore>,
}

impl TokenProvider {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache_key(kind: UserKind, user_id: i64, token: &str) -> String {
        format!("{}{}", Self::user_prefix(kind, user_id), token)
    }

    pub fn user_prefix(kind: UserKind, user_id: i64) -> String {
        format!("refresh:{}:{}:", kind, user_id)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        token: &str,
    ) -> Result<Option<Token>, StoreError> {
        let key = Self::cache_key(kind, user_id, token);
        if let Some(row) = cache_get::<Token>(self.cache.as_ref(), &key).await {
            return Ok(Some(row));
        }

        let found = uow.find_refresh_token(kind, token).await?;
        if let Some(row) = &found {
            if row.user_id == user_id {
                cache_set(self.cache.as_ref(), &key, row, ttl_until(row.expires_at)).await;
            }
        }
        Ok(found)
    }

    pub async fn insert(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        token: &mut Token,
    ) -> Result<(), StoreError> {
        token.id = uow.insert_refresh_token(kind, token).await?;

        let key = Self::cache_key(kind, token.user_id, &token.token);
        cache_set(self.cache.as_ref(), &key, token, ttl_until(token.expires_at)).await;
        Ok(())
    }

    /// Swaps `previous` for the new value of the same row. The stale entry is
    /// evicted before the database is touched so it can never be served
    /// after the swap. Returns `false` if `previous` was already replaced.
    pub async fn rotate(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        token: &Token,
        previous: &str,
    ) -> Result<bool, StoreError> {
        cache_delete(
            self.cache.as_ref(),
            &Self::cache_key(kind, token.user_id, previous),
        )
        .await;

        if !uow.rotate_refresh_token(kind, token, previous).await? {
            return Ok(false);
        }

        let key = Self::cache_key(kind, token.user_id, &token.token);
        cache_set(self.cache.as_ref(), &key, token, ttl_until(token.expires_at)).await;
        Ok(true)
    }

    /// `user_id` is unknown when the presented value could not be decoded;
    /// such a value was never cached.
    pub async fn delete(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: Option<i64>,
        token: &str,
    ) -> Result<(), StoreError> {
        if let Some(user_id) = user_id {
            cache_delete(self.cache.as_ref(), &Self::cache_key(kind, user_id, token)).await;
        }
        uow.delete_refresh_token(kind, token).await
    }

    /// Drops every cached refresh token of one user.
    pub async fn evict_user(&self, kind: UserKind, user_id: i64) {
        let prefix = Self::user_prefix(kind, user_id);
        match self.cache.delete_by_prefix(&prefix).await {
            Ok(removed) => {
                tracing::debug!(kind = %kind, user_id, removed, "Evicted cached refresh tokens")
            }
            Err(e) => {
                tracing::warn!(kind = %kind, user_id, error = %e, "Failed to evict cached refresh tokens")
            }
        }
    }
}
