use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::db::UnitOfWork;
use crate::models::{Identity, SessionVersion, Token, TokenType, UserKind};
use crate::providers::{TokenProvider, VersionProvider};
use crate::services::error::ServiceError;
use crate::services::jwt::{Claims, JwtService};
use crate::services::CacheStore;

/// Signed values handed back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Where the refresh half of a new pair comes from.
#[derive(Debug)]
pub enum RefreshSource {
    /// Re-sign an existing row in place, keeping its id and version.
    Rotate(Token),
    /// Mint a new row under the given session version.
    Fresh(i32),
}

/// A pair that has been signed but not yet persisted.
#[derive(Debug)]
pub struct GeneratedTokens {
    pub access: Token,
    pub refresh: Token,
    previous: Option<String>,
}

/// A refresh token that passed every check, with the state it was checked
/// against.
#[derive(Debug)]
pub struct ValidatedRefresh {
    pub token: Token,
    pub version: SessionVersion,
    pub claims: Claims,
}

#[derive(Clone)]
pub struct TokenService {
    jwt: JwtService,
    tokens: TokenProvider,
    versions: VersionProvider,
}

impl TokenService {
    pub fn new(jwt: JwtService, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            jwt,
            tokens: TokenProvider::new(cache.clone()),
            versions: VersionProvider::new(cache),
        }
    }

    pub fn generate(
        &self,
        identity: &Identity,
        source: RefreshSource,
    ) -> Result<GeneratedTokens, ServiceError> {
        let now = Utc::now();

        let (mut refresh, previous) = match source {
            RefreshSource::Rotate(token) => {
                let previous = token.token.clone();
                (token, Some(previous))
            }
            RefreshSource::Fresh(version) => {
                (Token::new(identity.id, TokenType::Refresh, version, now), None)
            }
        };
        let (value, expires_at) = self
            .jwt
            .issue(identity, refresh.version, TokenType::Refresh, now)?;
        refresh.set_token(value, expires_at, now);

        let mut access = Token::new(identity.id, TokenType::Access, refresh.version, now);
        let (value, expires_at) = self
            .jwt
            .issue(identity, refresh.version, TokenType::Access, now)?;
        access.set_token(value, expires_at, now);

        Ok(GeneratedTokens {
            access,
            refresh,
            previous,
        })
    }

    /// Stores the refresh half. A rotation whose previous value is no longer
    /// current lost a race with another refresh and fails with `InvalidToken`.
    pub async fn persist(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        mut generated: GeneratedTokens,
    ) -> Result<TokenPair, ServiceError> {
        match generated.previous.as_deref() {
            Some(previous) => {
                if !self
                    .tokens
                    .rotate(uow, kind, &generated.refresh, previous)
                    .await?
                {
                    tracing::warn!(
                        kind = %kind,
                        user_id = generated.refresh.user_id,
                        "Refresh token was rotated concurrently"
                    );
                    return Err(ServiceError::InvalidToken);
                }
            }
            None => {
                self.tokens
                    .insert(uow, kind, &mut generated.refresh)
                    .await?
            }
        }

        Ok(TokenPair {
            access_token: generated.access.token,
            refresh_token: generated.refresh.token,
        })
    }

    /// Full refresh token check: signature and lifetime, a matching stored
    /// row of the same user and version, and a session version that has not
    /// moved since. Every failure is `InvalidToken`.
    pub async fn validate_refresh(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        raw: &str,
    ) -> Result<ValidatedRefresh, ServiceError> {
        let claims = self.jwt.decode(raw, TokenType::Refresh)?;
        if claims.kind != kind {
            return Err(reject(kind, "kind mismatch"));
        }
        let user_id = claims.user_id()?;

        let token = self
            .tokens
            .get(uow, kind, user_id, raw)
            .await?
            .ok_or_else(|| reject(kind, "not persisted"))?;
        if token.user_id != user_id || token.version != claims.ver {
            return Err(reject(kind, "stored row does not match claims"));
        }
        if token.is_expired(Utc::now()) {
            return Err(reject(kind, "stored row expired"));
        }

        let version = self
            .versions
            .get(uow, kind, user_id)
            .await?
            .ok_or_else(|| reject(kind, "no session version"))?;
        if version.version != token.version {
            return Err(reject(kind, "session version moved on"));
        }

        Ok(ValidatedRefresh {
            token,
            version,
            claims,
        })
    }

    /// Stateless check of an access token for `kind`.
    pub fn validate_access(&self, kind: UserKind, raw: &str) -> Result<Claims, ServiceError> {
        let claims = self.jwt.decode(raw, TokenType::Access)?;
        if claims.kind != kind {
            return Err(reject(kind, "kind mismatch"));
        }
        claims.user_id()?;
        Ok(claims)
    }

    /// The user a refresh token was signed for, expired or not.
    pub fn owner_of(&self, raw: &str) -> Option<i64> {
        self.jwt
            .decode_ignoring_expiry(raw, TokenType::Refresh)
            .ok()
            .and_then(|claims| claims.user_id().ok())
    }

    /// Deletes a refresh token. Expired or unverifiable values are still
    /// removed from the database.
    pub async fn invalidate(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        raw: &str,
    ) -> Result<(), ServiceError> {
        let user_id = self.owner_of(raw);
        self.tokens.delete(uow, kind, user_id, raw).await?;
        Ok(())
    }

    /// The user's session version, created at 1 if missing.
    pub async fn current_version(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
    ) -> Result<SessionVersion, ServiceError> {
        if let Some(version) = self.versions.get(uow, kind, user_id).await? {
            return Ok(version);
        }
        let mut version = SessionVersion::new(user_id, Utc::now());
        self.versions.create(uow, kind, &mut version).await?;
        Ok(version)
    }

    /// Increments the session version, which invalidates every refresh token
    /// minted before. A missing version is created first.
    pub async fn bump_version(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
    ) -> Result<SessionVersion, ServiceError> {
        let version = self.versions.bump(uow, kind, user_id, Utc::now()).await?;

        tracing::info!(kind = %kind, user_id, version = version.version, "Session version bumped");
        Ok(version)
    }

    pub async fn evict_version(&self, kind: UserKind, user_id: i64) {
        self.versions.evict(kind, user_id).await;
    }

    pub async fn evict_refresh_tokens(&self, kind: UserKind, user_id: i64) {
        self.tokens.evict_user(kind, user_id).await;
    }
}

fn reject(kind: UserKind, reason: &'static str) -> ServiceError {
    tracing::debug!(kind = %kind, reason, "Refresh token rejected");
    ServiceError::InvalidToken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, TokenPolicy};
    use crate::db::{MockDatabase, UnitOfWorkFactory};
    use crate::models::Profile;
    use crate::services::MockCache;

    fn setup() -> (MockDatabase, TokenService) {
        let (db, _, service) = setup_with_cache();
        (db, service)
    }

    fn setup_with_cache() -> (MockDatabase, Arc<MockCache>, TokenService) {
        let jwt = JwtService::new(&AuthConfig::local().jwt, TokenPolicy::default());
        let cache = Arc::new(MockCache::new());
        (
            MockDatabase::new(),
            cache.clone(),
            TokenService::new(jwt, cache),
        )
    }

    fn employer(id: i64) -> Identity {
        Identity {
            id,
            email: "hr@example.com".to_string(),
            is_active: true,
            is_deleted: false,
            profile: Profile::Employer {
                company_name: "Acme".to_string(),
            },
        }
    }

    async fn login(
        service: &TokenService,
        uow: &mut dyn UnitOfWork,
        identity: &Identity,
    ) -> TokenPair {
        let version = service
            .current_version(uow, UserKind::Employer, identity.id)
            .await
            .expect("version");
        let generated = service
            .generate(identity, RefreshSource::Fresh(version.version))
            .expect("generate");
        service
            .persist(uow, UserKind::Employer, generated)
            .await
            .expect("persist")
    }

    #[tokio::test]
    async fn fresh_pair_validates() {
        let (db, service) = setup();
        let mut uow = db.create();
        let pair = login(&service, uow.as_mut(), &employer(1)).await;

        let validated = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &pair.refresh_token)
            .await
            .expect("valid");
        assert_eq!(validated.token.user_id, 1);
        assert_eq!(validated.version.version, 1);

        let claims = service
            .validate_access(UserKind::Employer, &pair.access_token)
            .expect("access");
        assert_eq!(claims.company_name.as_deref(), Some("Acme"));
    }

    #[tokio::test]
    async fn wrong_kind_is_rejected() {
        let (db, service) = setup();
        let mut uow = db.create();
        let pair = login(&service, uow.as_mut(), &employer(2)).await;

        assert!(service
            .validate_access(UserKind::Applicant, &pair.access_token)
            .is_err());
        assert!(service
            .validate_refresh(uow.as_mut(), UserKind::Applicant, &pair.refresh_token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rotation_supersedes_previous_value() {
        let (db, service) = setup();
        let mut uow = db.create();
        let identity = employer(3);
        let first = login(&service, uow.as_mut(), &identity).await;

        let validated = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &first.refresh_token)
            .await
            .expect("valid");
        let row_id = validated.token.id;
        let generated = service
            .generate(&identity, RefreshSource::Rotate(validated.token))
            .expect("generate");
        let second = service
            .persist(uow.as_mut(), UserKind::Employer, generated)
            .await
            .expect("rotate");

        assert!(service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &first.refresh_token)
            .await
            .is_err());
        let current = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &second.refresh_token)
            .await
            .expect("rotated value is valid");
        assert_eq!(current.token.id, row_id);
        assert_eq!(db.refresh_tokens(UserKind::Employer, 3).len(), 1);
    }

    #[tokio::test]
    async fn losing_a_rotation_race_is_invalid_token() {
        let (db, service) = setup();
        let mut uow = db.create();
        let identity = employer(4);
        let pair = login(&service, uow.as_mut(), &identity).await;

        let validated = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &pair.refresh_token)
            .await
            .expect("valid");
        let winner = service
            .generate(&identity, RefreshSource::Rotate(validated.token.clone()))
            .expect("generate");
        let loser = service
            .generate(&identity, RefreshSource::Rotate(validated.token))
            .expect("generate");

        service
            .persist(uow.as_mut(), UserKind::Employer, winner)
            .await
            .expect("first rotation wins");
        let err = service
            .persist(uow.as_mut(), UserKind::Employer, loser)
            .await
            .expect_err("second rotation loses");
        assert!(matches!(err, ServiceError::InvalidToken));
    }

    #[tokio::test]
    async fn version_bump_revokes_refresh_tokens() {
        let (db, service) = setup();
        let mut uow = db.create();
        let pair = login(&service, uow.as_mut(), &employer(5)).await;

        let bumped = service
            .bump_version(uow.as_mut(), UserKind::Employer, 5)
            .await
            .expect("bump");
        assert_eq!(bumped.version, 2);
        assert_eq!(db.version(UserKind::Employer, 5), Some(2));

        assert!(service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &pair.refresh_token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn bump_increments_the_stored_row_even_when_the_cache_lags() {
        let (db, cache, service) = setup_with_cache();
        let mut uow = db.create();
        let identity = employer(7);
        login(&service, uow.as_mut(), &identity).await;

        // The first bump cannot reach the cache, which keeps version 1.
        cache.set_unavailable(true);
        let first = service
            .bump_version(uow.as_mut(), UserKind::Employer, 7)
            .await
            .expect("first bump");
        assert_eq!(first.version, 2);
        let generated = service
            .generate(&identity, RefreshSource::Fresh(first.version))
            .expect("generate");
        let issued_at_two = service
            .persist(uow.as_mut(), UserKind::Employer, generated)
            .await
            .expect("persist");
        cache.set_unavailable(false);

        let second = service
            .bump_version(uow.as_mut(), UserKind::Employer, 7)
            .await
            .expect("second bump");
        assert_eq!(second.version, 3);
        assert_eq!(db.version(UserKind::Employer, 7), Some(3));

        assert!(service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &issued_at_two.refresh_token)
            .await
            .is_err());

        let generated = service
            .generate(&identity, RefreshSource::Fresh(second.version))
            .expect("generate");
        let current = service
            .persist(uow.as_mut(), UserKind::Employer, generated)
            .await
            .expect("persist");
        let validated = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &current.refresh_token)
            .await
            .expect("token at the bumped version");
        assert_eq!(validated.version.version, 3);
    }

    #[tokio::test]
    async fn bump_without_a_stored_version_starts_from_one() {
        let (db, service) = setup();
        let mut uow = db.create();

        let bumped = service
            .bump_version(uow.as_mut(), UserKind::Applicant, 11)
            .await
            .expect("bump");
        assert_eq!(bumped.version, 2);
        assert_eq!(db.version(UserKind::Applicant, 11), Some(2));
    }

    #[tokio::test]
    async fn invalidate_removes_the_row() {
        let (db, service) = setup();
        let mut uow = db.create();
        let pair = login(&service, uow.as_mut(), &employer(6)).await;

        service
            .invalidate(uow.as_mut(), UserKind::Employer, &pair.refresh_token)
            .await
            .expect("invalidate");
        assert!(db.refresh_tokens(UserKind::Employer, 6).is_empty());
        assert!(service
            .validate_refresh(uow.as_mut(), UserKind::Employer, &pair.refresh_token)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn garbage_is_invalid_token() {
        let (db, service) = setup();
        let mut uow = db.create();
        let err = service
            .validate_refresh(uow.as_mut(), UserKind::Employer, "not-a-jwt")
            .await
            .expect_err("garbage");
        assert!(matches!(err, ServiceError::InvalidToken));
    }
}
