use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::{
    code_table, password_table, refresh_token_table, version_table, CredentialStore, UnitOfWork,
    UnitOfWorkFactory,
};
use crate::models::{CodePurpose, Password, SessionVersion, Token, UserKind, VerificationCode};
use crate::services::error::StoreError;

#[derive(Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    fn create(&self) -> Box<dyn UnitOfWork> {
        Box::new(PgUnitOfWork::new(self.pool.clone()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        super::health_check(&self.pool).await?;
        Ok(())
    }
}

enum State {
    Idle,
    Connection(PoolConnection<Postgres>),
    Transaction(Transaction<'static, Postgres>),
}

pub struct PgUnitOfWork {
    pool: PgPool,
    state: State,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: State::Idle,
        }
    }

    async fn conn(&mut self) -> Result<&mut PgConnection, StoreError> {
        if matches!(self.state, State::Idle) {
            self.state = State::Connection(self.pool.acquire().await?);
        }
        match &mut self.state {
            State::Connection(conn) => Ok(&mut **conn),
            State::Transaction(tx) => Ok(&mut **tx),
            State::Idle => Err(StoreError::UnitOfWork("connection was not acquired")),
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if matches!(self.state, State::Transaction(_)) {
            return Err(StoreError::UnitOfWork("transaction already started"));
        }
        // A plain connection goes back to the pool; the transaction takes its own.
        self.state = State::Idle;
        self.state = State::Transaction(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Transaction(tx) => {
                tx.commit().await?;
                Ok(())
            }
            other => {
                self.state = other;
                Err(StoreError::UnitOfWork("no transaction in progress"))
            }
        }
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Transaction(tx) => {
                tx.rollback().await?;
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CredentialStore for PgUnitOfWork {
    async fn find_password(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<Password>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, password_hash, created_at, updated_at FROM {} WHERE user_id = $1",
            password_table(kind)
        );
        let row = sqlx::query_as::<_, Password>(&sql)
            .bind(user_id)
            .fetch_optional(self.conn().await?)
            .await?;
        Ok(row)
    }

    async fn insert_password(
        &mut self,
        kind: UserKind,
        password: &Password,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, password_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
            password_table(kind)
        );
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(password.user_id)
            .bind(&password.password_hash)
            .bind(password.created_at)
            .bind(password.updated_at)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(id)
    }

    async fn update_password(
        &mut self,
        kind: UserKind,
        password: &Password,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET password_hash = $2, updated_at = $3 WHERE id = $1",
            password_table(kind)
        );
        sqlx::query(&sql)
            .bind(password.id)
            .bind(&password.password_hash)
            .bind(password.updated_at)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    async fn find_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, code, generations_left, expires_at, created_at, updated_at \
             FROM {} WHERE user_id = $1",
            code_table(kind, purpose)
        );
        let row = sqlx::query_as::<_, VerificationCode>(&sql)
            .bind(user_id)
            .fetch_optional(self.conn().await?)
            .await?;
        Ok(row)
    }

    async fn insert_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, code, generations_left, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            code_table(kind, purpose)
        );
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(code.user_id)
            .bind(&code.code)
            .bind(code.generations_left)
            .bind(code.expires_at)
            .bind(code.created_at)
            .bind(code.updated_at)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(id)
    }

    async fn update_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE {} SET code = $2, generations_left = $3, expires_at = $4, updated_at = $5 \
             WHERE id = $1",
            code_table(kind, purpose)
        );
        sqlx::query(&sql)
            .bind(code.id)
            .bind(&code.code)
            .bind(code.generations_left)
            .bind(code.expires_at)
            .bind(code.updated_at)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    async fn delete_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        id: i64,
    ) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = $1", code_table(kind, purpose));
        sqlx::query(&sql)
            .bind(id)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    async fn find_refresh_token(
        &mut self,
        kind: UserKind,
        token: &str,
    ) -> Result<Option<Token>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, token, version, expires_at, created_at, updated_at \
             FROM {} WHERE token = $1",
            refresh_token_table(kind)
        );
        let row = sqlx::query_as::<_, Token>(&sql)
            .bind(token)
            .fetch_optional(self.conn().await?)
            .await?;
        Ok(row)
    }

    async fn insert_refresh_token(
        &mut self,
        kind: UserKind,
        token: &Token,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, token, version, expires_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            refresh_token_table(kind)
        );
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(token.user_id)
            .bind(&token.token)
            .bind(token.version)
            .bind(token.expires_at)
            .bind(token.created_at)
            .bind(token.updated_at)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(id)
    }

    async fn rotate_refresh_token(
        &mut self,
        kind: UserKind,
        token: &Token,
        previous: &str,
    ) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET token = $3, expires_at = $4, updated_at = $5 \
             WHERE id = $1 AND token = $2",
            refresh_token_table(kind)
        );
        let result = sqlx::query(&sql)
            .bind(token.id)
            .bind(previous)
            .bind(&token.token)
            .bind(token.expires_at)
            .bind(token.updated_at)
            .execute(self.conn().await?)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_refresh_token(&mut self, kind: UserKind, token: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {} WHERE token = $1", refresh_token_table(kind));
        sqlx::query(&sql)
            .bind(token)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    async fn find_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<SessionVersion>, StoreError> {
        let sql = format!(
            "SELECT id, user_id, version, created_at, updated_at FROM {} WHERE user_id = $1",
            version_table(kind)
        );
        let row = sqlx::query_as::<_, SessionVersion>(&sql)
            .bind(user_id)
            .fetch_optional(self.conn().await?)
            .await?;
        Ok(row)
    }

    async fn insert_version(
        &mut self,
        kind: UserKind,
        version: &SessionVersion,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (user_id, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
            version_table(kind)
        );
        let id = sqlx::query_scalar::<_, i64>(&sql)
            .bind(version.user_id)
            .bind(version.version)
            .bind(version.created_at)
            .bind(version.updated_at)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(id)
    }

    async fn bump_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionVersion, StoreError> {
        let table = version_table(kind);
        let sql = format!(
            "INSERT INTO {table} (user_id, version, created_at, updated_at) \
             VALUES ($1, 2, $2, $2) \
             ON CONFLICT (user_id) DO UPDATE \
             SET version = {table}.version + 1, updated_at = EXCLUDED.updated_at \
             RETURNING id, user_id, version, created_at, updated_at"
        );
        let row = sqlx::query_as::<_, SessionVersion>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(row)
    }
}
