use std::sync::Arc;

use super::{cache_delete, cache_get, cache_set, ttl_until};
use crate::db::UnitOfWork;
use crate::models::{CodePurpose, UserKind, VerificationCode};
use crate::services::error::StoreError;
use crate::services::CacheStore;

/// Codes are cached until they expire.
#[derive(Clone)]
pub struct CodeProvider {
    cache: Arc<dyn CacheStore>,
}

impl CodeProvider {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn cache_key(kind: UserKind, purpose: CodePurpose, user_id: i64) -> String {
        format!("code:{}:{}:user_id:{}", purpose, kind, user_id)
    }

    pub async fn get(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let key = Self::cache_key(kind, purpose, user_id);
        if let Some(code) = cache_get::<VerificationCode>(self.cache.as_ref(), &key).await {
            return Ok(Some(code));
        }

        let found = uow.find_code(kind, purpose, user_id).await?;
        if let Some(code) = &found {
            cache_set(self.cache.as_ref(), &key, code, ttl_until(code.expires_at)).await;
        }
        Ok(found)
    }

    pub async fn save(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        code: &mut VerificationCode,
    ) -> Result<(), StoreError> {
        if code.id == 0 {
            code.id = uow.insert_code(kind, purpose, code).await?;
        } else {
            uow.update_code(kind, purpose, code).await?;
        }

        let key = Self::cache_key(kind, purpose, code.user_id);
        cache_set(self.cache.as_ref(), &key, code, ttl_until(code.expires_at)).await;
        Ok(())
    }

    pub async fn delete(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), StoreError> {
        cache_delete(self.cache.as_ref(), &Self::cache_key(kind, purpose, code.user_id)).await;
        uow.delete_code(kind, purpose, code.id).await
    }

    pub async fn evict(&self, kind: UserKind, purpose: CodePurpose, user_id: i64) {
        cache_delete(self.cache.as_ref(), &Self::cache_key(kind, purpose, user_id)).await;
    }
}
