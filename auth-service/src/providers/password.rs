use std::sync::Arc;
use std::time::Duration;

use super::{cache_delete, cache_get, cache_set};
use crate::db::UnitOfWork;
use crate::models::{Password, UserKind};
use crate::services::error::StoreError;
use crate::services::CacheStore;

const PASSWORD_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
pub struct PasswordProvider {
    cache: Arc<dyn CacheStore>,
}

impl PasswordProvider {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache_key(kind: UserKind, user_id: i64) -> String {
        format!("password:{}:user_id:{}", kind, user_id)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<Password>, StoreError> {
        let key = Self::cache_key(kind, user_id);
        if let Some(password) = cache_get::<Password>(self.cache.as_ref(), &key).await {
            return Ok(Some(password));
        }

        let found = uow.find_password(kind, user_id).await?;
        if let Some(password) = &found {
            cache_set(self.cache.as_ref(), &key, password, PASSWORD_TTL).await;
        }
        Ok(found)
    }

    /// Inserts when `id == 0`, updates otherwise, then refreshes the cache.
    pub async fn save(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        password: &mut Password,
    ) -> Result<(), StoreError> {
        if password.id == 0 {
            password.id = uow.insert_password(kind, password).await?;
        } else {
            uow.update_password(kind, password).await?;
        }

        let key = Self::cache_key(kind, password.user_id);
        cache_set(self.cache.as_ref(), &key, password, PASSWORD_TTL).await;
        Ok(())
    }

    pub async fn evict(&self, kind: UserKind, user_id: i64) {
        cache_delete(self.cache.as_ref(), &Self::cache_key(kind, user_id)).await;
    }
}
