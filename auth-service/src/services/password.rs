use chrono::Utc;
use std::sync::Arc;

use crate::config::PasswordPolicy;
use crate::db::UnitOfWork;
use crate::models::{Password, UserKind};
use crate::providers::PasswordProvider;
use crate::services::error::{PolicyError, ServiceError};
use crate::services::CacheStore;

#[derive(Clone)]
pub struct PasswordService {
    provider: PasswordProvider,
    policy: PasswordPolicy,
}

impl PasswordService {
    pub fn new(cache: Arc<dyn CacheStore>, policy: PasswordPolicy) -> Self {
        Self {
            provider: PasswordProvider::new(cache),
            policy,
        }
    }

    /// Strength rules only, no cooldown. Cheap enough to run before any
    /// external call is made.
    pub fn validate(&self, raw: &str) -> Result<(), PolicyError> {
        Password::validate(raw, &self.policy)
    }

    /// Sets the first password of a user. An existing row is overwritten in
    /// place, without the change cooldown, so a retried registration neither
    /// trips the unique constraint nor waits out the cooldown.
    pub async fn create(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        raw: &str,
    ) -> Result<Password, ServiceError> {
        let now = Utc::now();
        let mut password = match self.provider.get(uow, kind, user_id).await? {
            Some(existing) => existing,
            None => Password::new(user_id, now),
        };
        password.replace_password(raw, &self.policy, now)?;
        self.provider.save(uow, kind, &mut password).await?;

        tracing::debug!(kind = %kind, user_id, "Password created");
        Ok(password)
    }

    /// `false` when the user has no password or it does not match.
    pub async fn check(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        raw: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self
            .provider
            .get(uow, kind, user_id)
            .await?
            .is_some_and(|password| password.check(raw)))
    }

    /// Replaces the password, honouring the change cooldown.
    pub async fn update(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        raw: &str,
    ) -> Result<Password, ServiceError> {
        let mut password = self
            .provider
            .get(uow, kind, user_id)
            .await?
            .ok_or(ServiceError::NotFound("password"))?;
        password.set_password(raw, &self.policy, Utc::now())?;
        self.provider.save(uow, kind, &mut password).await?;

        tracing::info!(kind = %kind, user_id, "Password updated");
        Ok(password)
    }

    pub async fn evict(&self, kind: UserKind, user_id: i64) {
        self.provider.evict(kind, user_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MockDatabase, UnitOfWorkFactory};
    use crate::services::MockCache;

    fn service() -> (MockDatabase, PasswordService) {
        let db = MockDatabase::new();
        let service = PasswordService::new(Arc::new(MockCache::new()), PasswordPolicy::default());
        (db, service)
    }

    #[tokio::test]
    async fn created_password_checks_out() {
        let (db, service) = service();
        let mut uow = db.create();

        service
            .create(uow.as_mut(), UserKind::Applicant, 1, "Secret#42")
            .await
            .expect("create");

        assert!(service
            .check(uow.as_mut(), UserKind::Applicant, 1, "Secret#42")
            .await
            .expect("check"));
        assert!(!service
            .check(uow.as_mut(), UserKind::Applicant, 1, "Secret#43")
            .await
            .expect("check"));
        assert!(!service
            .check(uow.as_mut(), UserKind::Employer, 1, "Secret#42")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn create_again_overwrites_the_same_row() {
        let (db, service) = service();
        let mut uow = db.create();

        let first = service
            .create(uow.as_mut(), UserKind::Applicant, 4, "Secret#42")
            .await
            .expect("first create");
        let second = service
            .create(uow.as_mut(), UserKind::Applicant, 4, "Other#42x")
            .await
            .expect("second create is not throttled");
        assert_eq!(first.id, second.id);

        assert!(service
            .check(uow.as_mut(), UserKind::Applicant, 4, "Other#42x")
            .await
            .expect("check"));
        assert!(!service
            .check(uow.as_mut(), UserKind::Applicant, 4, "Secret#42")
            .await
            .expect("check"));
    }

    #[tokio::test]
    async fn check_rejects_every_single_character_mutation() {
        let (db, service) = service();
        let mut uow = db.create();
        let raw = "Secret#42";
        service
            .create(uow.as_mut(), UserKind::Employer, 5, raw)
            .await
            .expect("create");

        for (idx, original) in raw.char_indices() {
            let replacement = if original == '0' { '1' } else { '0' };
            let mut mutated = raw.to_string();
            mutated.replace_range(idx..idx + 1, &replacement.to_string());
            assert!(
                !service
                    .check(uow.as_mut(), UserKind::Employer, 5, &mutated)
                    .await
                    .expect("check"),
                "{} should not match",
                mutated
            );
        }
    }

    #[tokio::test]
    async fn weak_password_is_not_stored() {
        let (db, service) = service();
        let mut uow = db.create();

        let err = service
            .create(uow.as_mut(), UserKind::Employer, 2, "short")
            .await
            .expect_err("too weak");
        assert!(matches!(
            err,
            ServiceError::Policy(PolicyError::PasswordTooShort { min: 8 })
        ));
        assert!(db.password(UserKind::Employer, 2).is_none());
    }

    #[tokio::test]
    async fn update_right_after_create_hits_cooldown() {
        let (db, service) = service();
        let mut uow = db.create();
        service
            .create(uow.as_mut(), UserKind::Applicant, 3, "Secret#42")
            .await
            .expect("create");

        let err = service
            .update(uow.as_mut(), UserKind::Applicant, 3, "Other#42x")
            .await
            .expect_err("cooldown");
        assert!(matches!(
            err,
            ServiceError::Policy(PolicyError::PasswordCooldown { hours: 24 })
        ));
    }

    #[tokio::test]
    async fn update_of_unknown_user_is_not_found() {
        let (db, service) = service();
        let mut uow = db.create();
        let err = service
            .update(uow.as_mut(), UserKind::Applicant, 99, "Secret#42")
            .await
            .expect_err("missing");
        assert!(matches!(err, ServiceError::NotFound("password")));
    }
}
