use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{CredentialStore, UnitOfWork, UnitOfWorkFactory};
use crate::models::{CodePurpose, Password, SessionVersion, Token, UserKind, VerificationCode};
use crate::services::error::StoreError;

#[derive(Clone, Default)]
struct Tables {
    next_id: i64,
    passwords: HashMap<(UserKind, i64), Password>,
    codes: HashMap<(UserKind, CodePurpose, i64), VerificationCode>,
    refresh_tokens: HashMap<(UserKind, i64), Token>,
    versions: HashMap<(UserKind, i64), SessionVersion>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory credential store with transaction semantics: a unit of work
/// stages a copy on `begin` and publishes it on `commit`.
#[derive(Clone, Default)]
pub struct MockDatabase {
    tables: Arc<Mutex<Tables>>,
    fail_writes: Arc<AtomicBool>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("mock database mutex poisoned: {}", e)))
    }

    pub fn password(&self, kind: UserKind, user_id: i64) -> Option<Password> {
        self.lock()
            .ok()
            .and_then(|t| t.passwords.get(&(kind, user_id)).cloned())
    }

    pub fn code(
        &self,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Option<VerificationCode> {
        self.lock()
            .ok()
            .and_then(|t| t.codes.get(&(kind, purpose, user_id)).cloned())
    }

    pub fn version(&self, kind: UserKind, user_id: i64) -> Option<i32> {
        self.lock()
            .ok()
            .and_then(|t| t.versions.get(&(kind, user_id)).map(|v| v.version))
    }

    pub fn refresh_tokens(&self, kind: UserKind, user_id: i64) -> Vec<Token> {
        self.lock()
            .map(|t| {
                t.refresh_tokens
                    .iter()
                    .filter(|((k, _), token)| *k == kind && token.user_id == user_id)
                    .map(|(_, token)| token.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl UnitOfWorkFactory for MockDatabase {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(MockUnitOfWork {
            db: self.clone(),
            staged: None,
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

pub struct MockUnitOfWork {
    db: MockDatabase,
    staged: Option<Tables>,
}

impl MockUnitOfWork {
    fn read<R>(&mut self, f: impl FnOnce(&Tables) -> R) -> Result<R, StoreError> {
        if let Some(tables) = self.staged.as_ref() {
            return Ok(f(tables));
        }
        let guard = self.db.lock()?;
        Ok(f(&guard))
    }

    fn write<R>(&mut self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StoreError> {
        if self.db.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        if let Some(tables) = self.staged.as_mut() {
            return Ok(f(tables));
        }
        let mut guard = self.db.lock()?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl UnitOfWork for MockUnitOfWork {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::UnitOfWork("transaction already started"));
        }
        let snapshot = self.db.lock()?.clone();
        self.staged = Some(snapshot);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .take()
            .ok_or(StoreError::UnitOfWork("no transaction in progress"))?;
        *self.db.lock()? = staged;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged = None;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MockUnitOfWork {
    async fn find_password(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<Password>, StoreError> {
        self.read(|t| t.passwords.get(&(kind, user_id)).cloned())
    }

    async fn insert_password(
        &mut self,
        kind: UserKind,
        password: &Password,
    ) -> Result<i64, StoreError> {
        self.write(|t| {
            let mut row = password.clone();
            row.id = t.next_id();
            let id = row.id;
            t.passwords.insert((kind, row.user_id), row);
            id
        })
    }

    async fn update_password(
        &mut self,
        kind: UserKind,
        password: &Password,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            if let Some(row) = t.passwords.get_mut(&(kind, password.user_id)) {
                if row.id == password.id {
                    row.password_hash = password.password_hash.clone();
                    row.updated_at = password.updated_at;
                }
            }
        })
    }

    async fn find_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<Option<VerificationCode>, StoreError> {
        self.read(|t| t.codes.get(&(kind, purpose, user_id)).cloned())
    }

    async fn insert_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<i64, StoreError> {
        self.write(|t| {
            let mut row = code.clone();
            row.id = t.next_id();
            let id = row.id;
            t.codes.insert((kind, purpose, row.user_id), row);
            id
        })
    }

    async fn update_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            if let Some(row) = t.codes.get_mut(&(kind, purpose, code.user_id)) {
                if row.id == code.id {
                    row.code = code.code.clone();
                    row.generations_left = code.generations_left;
                    row.expires_at = code.expires_at;
                    row.updated_at = code.updated_at;
                }
            }
        })
    }

    async fn delete_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        id: i64,
    ) -> Result<(), StoreError> {
        self.write(|t| {
            t.codes
                .retain(|(k, p, _), row| !(*k == kind && *p == purpose && row.id == id));
        })
    }

    async fn find_refresh_token(
        &mut self,
        kind: UserKind,
        token: &str,
    ) -> Result<Option<Token>, StoreError> {
        self.read(|t| {
            t.refresh_tokens
                .iter()
                .find(|((k, _), row)| *k == kind && row.token == token)
                .map(|(_, row)| row.clone())
        })
    }

    async fn insert_refresh_token(
        &mut self,
        kind: UserKind,
        token: &Token,
    ) -> Result<i64, StoreError> {
        self.write(|t| {
            let mut row = token.clone();
            row.id = t.next_id();
            let id = row.id;
            t.refresh_tokens.insert((kind, id), row);
            id
        })
    }

    async fn rotate_refresh_token(
        &mut self,
        kind: UserKind,
        token: &Token,
        previous: &str,
    ) -> Result<bool, StoreError> {
        self.write(|t| match t.refresh_tokens.get_mut(&(kind, token.id)) {
            Some(row) if row.token == previous => {
                row.token = token.token.clone();
                row.expires_at = token.expires_at;
                row.updated_at = token.updated_at;
                true
            }
            _ => false,
        })
    }

    async fn delete_refresh_token(&mut self, kind: UserKind, token: &str) -> Result<(), StoreError> {
        self.write(|t| {
            t.refresh_tokens
                .retain(|(k, _), row| !(*k == kind && row.token == token));
        })
    }

    async fn find_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<SessionVersion>, StoreError> {
        self.read(|t| t.versions.get(&(kind, user_id)).cloned())
    }

    async fn insert_version(
        &mut self,
        kind: UserKind,
        version: &SessionVersion,
    ) -> Result<i64, StoreError> {
        self.write(|t| {
            let mut row = version.clone();
            row.id = t.next_id();
            let id = row.id;
            t.versions.insert((kind, row.user_id), row);
            id
        })
    }

    async fn bump_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionVersion, StoreError> {
        self.write(|t| {
            let fresh_id = if t.versions.contains_key(&(kind, user_id)) {
                0
            } else {
                t.next_id()
            };
            let row = t.versions.entry((kind, user_id)).or_insert_with(|| SessionVersion {
                id: fresh_id,
                ..SessionVersion::new(user_id, now)
            });
            row.increment(now);
            row.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn commit_publishes_and_rollback_discards() {
        let db = MockDatabase::new();

        let mut uow = db.create();
        uow.begin().await.expect("begin");
        uow.insert_version(UserKind::Applicant, &SessionVersion::new(1, Utc::now()))
            .await
            .expect("insert");
        assert_eq!(db.version(UserKind::Applicant, 1), None);
        uow.commit().await.expect("commit");
        assert_eq!(db.version(UserKind::Applicant, 1), Some(1));

        let mut uow = db.create();
        uow.begin().await.expect("begin");
        uow.insert_version(UserKind::Applicant, &SessionVersion::new(2, Utc::now()))
            .await
            .expect("insert");
        uow.rollback().await.expect("rollback");
        assert_eq!(db.version(UserKind::Applicant, 2), None);
    }

    #[tokio::test]
    async fn dropping_an_open_transaction_discards_it() {
        let db = MockDatabase::new();
        {
            let mut uow = db.create();
            uow.begin().await.expect("begin");
            uow.insert_version(UserKind::Employer, &SessionVersion::new(5, Utc::now()))
                .await
                .expect("insert");
        }
        assert_eq!(db.version(UserKind::Employer, 5), None);
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let db = MockDatabase::new();
        let mut uow = db.create();
        uow.insert_version(UserKind::Applicant, &SessionVersion::new(9, Utc::now()))
            .await
            .expect("insert");

        assert!(uow
            .find_version(UserKind::Employer, 9)
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn commit_without_begin_is_misuse() {
        let db = MockDatabase::new();
        let mut uow = db.create();
        assert!(matches!(
            uow.commit().await,
            Err(StoreError::UnitOfWork(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_reject_writes() {
        let db = MockDatabase::new();
        db.set_fail_writes(true);
        let mut uow = db.create();
        let result = uow
            .insert_version(UserKind::Applicant, &SessionVersion::new(1, Utc::now()))
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
