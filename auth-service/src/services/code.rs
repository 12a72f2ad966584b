use chrono::Utc;
use std::sync::Arc;

use crate::config::CodePolicy;
use crate::db::UnitOfWork;
use crate::models::{CodePurpose, UserKind, VerificationCode};
use crate::providers::CodeProvider;
use crate::services::error::ServiceError;
use crate::services::CacheStore;

/// Issues and checks one-time verification codes for both purposes.
#[derive(Clone)]
pub struct CodeService {
    provider: CodeProvider,
    policy: CodePolicy,
}

impl CodeService {
    pub fn new(cache: Arc<dyn CacheStore>, policy: CodePolicy) -> Self {
        Self {
            provider: CodeProvider::new(cache),
            policy,
        }
    }

    /// Starts a fresh code with a full resend budget. Used at registration,
    /// where no throttling applies.
    pub async fn issue(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<VerificationCode, ServiceError> {
        let now = Utc::now();
        let mut code = VerificationCode::new(user_id, &self.policy, now);
        if let Some(existing) = self.provider.get(uow, kind, purpose, user_id).await? {
            code.id = existing.id;
            code.created_at = existing.created_at;
        }
        code.generate_code(&self.policy, now)?;
        self.provider.save(uow, kind, purpose, &mut code).await?;

        tracing::info!(kind = %kind, purpose = %purpose, user_id, "Verification code issued");
        Ok(code)
    }

    /// Generates a new value for the user's code, spending one unit of its
    /// resend budget. Fails with `CodeResendExhausted` while throttled.
    pub async fn regenerate(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<VerificationCode, ServiceError> {
        let now = Utc::now();
        let mut code = match self.provider.get(uow, kind, purpose, user_id).await? {
            Some(existing) => existing,
            None => VerificationCode::new(user_id, &self.policy, now),
        };
        code.generate_code(&self.policy, now)?;
        self.provider.save(uow, kind, purpose, &mut code).await?;

        tracing::info!(
            kind = %kind,
            purpose = %purpose,
            user_id,
            generations_left = code.generations_left,
            "Verification code regenerated"
        );
        Ok(code)
    }

    /// Returns `true` and consumes the code when `raw` matches. A missing
    /// code is a mismatch; an expired one is `CodeExpired`.
    pub async fn check(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
        raw: &str,
    ) -> Result<bool, ServiceError> {
        let Some(code) = self.provider.get(uow, kind, purpose, user_id).await? else {
            return Ok(false);
        };
        if !code.check_code(raw, Utc::now())? {
            return Ok(false);
        }

        if let Err(e) = self.provider.delete(uow, kind, purpose, &code).await {
            tracing::warn!(
                kind = %kind,
                purpose = %purpose,
                user_id,
                error = %e,
                "Failed to delete consumed verification code"
            );
        }
        Ok(true)
    }

    pub async fn evict(&self, kind: UserKind, purpose: CodePurpose, user_id: i64) {
        self.provider.evict(kind, purpose, user_id).await;
    }
}
