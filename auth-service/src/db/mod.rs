//! Relational store access: connection pool, migrations and the unit of work
//! every use case runs inside.

mod memory;
mod postgres;

pub use memory::{MockDatabase, MockUnitOfWork};
pub use postgres::{PgUnitOfWork, PgUnitOfWorkFactory};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::models::{CodePurpose, Password, SessionVersion, Token, UserKind, VerificationCode};
use crate::services::error::StoreError;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check database health.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Row-level access to the credential tables of one kind.
///
/// Inserts return the generated id. Nothing here touches the cache.
#[async_trait]
pub trait CredentialStore: Send {
    async fn find_password(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<Password>, StoreError>;
    async fn insert_password(&mut self, kind: UserKind, password: &Password)
        -> Result<i64, StoreError>;
    async fn update_password(&mut self, kind: UserKind, password: &Password)
        -> Result<(), StoreError>;

    async fn find_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        user_id: i64,
    ) -> Result<Option<VerificationCode>, StoreError>;
    async fn insert_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<i64, StoreError>;
    async fn update_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), StoreError>;
    async fn delete_code(
        &mut self,
        kind: UserKind,
        purpose: CodePurpose,
        id: i64,
    ) -> Result<(), StoreError>;

    async fn find_refresh_token(
        &mut self,
        kind: UserKind,
        token: &str,
    ) -> Result<Option<Token>, StoreError>;
    async fn insert_refresh_token(&mut self, kind: UserKind, token: &Token)
        -> Result<i64, StoreError>;
    /// Replaces the value of row `token.id` only if it still holds `previous`.
    /// Returns `false` when another rotation got there first.
    async fn rotate_refresh_token(
        &mut self,
        kind: UserKind,
        token: &Token,
        previous: &str,
    ) -> Result<bool, StoreError>;
    async fn delete_refresh_token(&mut self, kind: UserKind, token: &str)
        -> Result<(), StoreError>;

    async fn find_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
    ) -> Result<Option<SessionVersion>, StoreError>;
    async fn insert_version(
        &mut self,
        kind: UserKind,
        version: &SessionVersion,
    ) -> Result<i64, StoreError>;
    /// Increments the stored version in place and returns the new row. A
    /// user without a row gets one at version 2, as if created and bumped.
    async fn bump_version(
        &mut self,
        kind: UserKind,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionVersion, StoreError>;
}

/// One connection, and optionally one transaction, owned by a single use case.
///
/// The connection is acquired on first use. Dropping the unit of work
/// releases it and rolls back any transaction that was not committed.
#[async_trait]
pub trait UnitOfWork: CredentialStore {
    async fn begin(&mut self) -> Result<(), StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    /// No-op when no transaction is open.
    async fn rollback(&mut self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    fn create(&self) -> Box<dyn UnitOfWork>;
    async fn health_check(&self) -> Result<(), StoreError>;
}

pub(crate) fn password_table(kind: UserKind) -> &'static str {
    match kind {
        UserKind::Applicant => "applicant_passwords",
        UserKind::Employer => "employer_passwords",
    }
}

pub(crate) fn code_table(kind: UserKind, purpose: CodePurpose) -> &'static str {
    match (kind, purpose) {
        (UserKind::Applicant, CodePurpose::Activation) => "applicant_activation_codes",
        (UserKind::Applicant, CodePurpose::ResetPassword) => "applicant_reset_password_codes",
        (UserKind::Employer, CodePurpose::Activation) => "employer_activation_codes",
        (UserKind::Employer, CodePurpose::ResetPassword) => "employer_reset_password_codes",
    }
}

pub(crate) fn refresh_token_table(kind: UserKind) -> &'static str {
    match kind {
        UserKind::Applicant => "applicant_refresh_tokens",
        UserKind::Employer => "employer_refresh_tokens",
    }
}

pub(crate) fn version_table(kind: UserKind) -> &'static str {
    match kind {
        UserKind::Applicant => "applicant_version",
        UserKind::Employer => "employer_version",
    }
}
