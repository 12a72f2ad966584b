use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::{cache_delete, cache_get, cache_set};
use crate::db::UnitOfWork;
use crate::models::{SessionVersion, UserKind};
use crate::services::error::StoreError;
use crate::services::CacheStore;

const VERSION_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Clone)]
pub struct VersionProvider {
    cache: Arc<dyn CacheStore>,
}

impl VersionProvider {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache_key(kind: UserKind, user_id: i64) -> String {
        format!("user_version:{}:user_id:{}", kind, user_id)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<SessionVersion>, StoreError> {
        let key = Self::cache_key(kind, user_id);
        if let Some(version) = cache_get::<SessionVersion>(self.cache.as_ref(), &key).await {
            return Ok(Some(version));
        }

        let found = uow.find_version(kind, user_id).await?;
        if let Some(version) = &found {
            cache_set(self.cache.as_ref(), &key, version, VERSION_TTL).await;
        }
        Ok(found)
    }

    pub async fn create(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        version: &mut SessionVersion,
    ) -> Result<(), StoreError> {
        version.id = uow.insert_version(kind, version).await?;
        self.remember(kind, version).await;
        Ok(())
    }

    /// The increment happens in the store, so a stale cached row can never
    /// hold the new value back.
    pub async fn bump(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionVersion, StoreError> {
        let version = uow.bump_version(kind, user_id, now).await?;
        self.remember(kind, &version).await;
        Ok(version)
    }

    async fn remember(&self, kind: UserKind, version: &SessionVersion) {
        let key = Self::cache_key(kind, version.user_id);
        cache_set(self.cache.as_ref(), &key, version, VERSION_TTL).await;
    }

    pub async fn evict(&self, kind: UserKind, user_id: i64) {
        cache_delete(self.cache.as_ref(), &Self::cache_key(kind, user_id)).await;
    }
}
