use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AuthConfig;
use crate::db::{UnitOfWork, UnitOfWorkFactory};
use crate::dtos::auth::{
    ActivateRequest, ChangePasswordRequest, LoginRequest, MessageResponse, RegisterRequest,
    ResetCodeRequest, ResetPasswordRequest, UserResponse,
};
use crate::models::{CodePurpose, Identity, NewIdentity, UserKind, VerificationCode};
use crate::services::code::CodeService;
use crate::services::error::{AuthError, PolicyError, ServiceError};
use crate::services::jwt::{Claims, JwtService};
use crate::services::notifier::CodeNotifier;
use crate::services::password::PasswordService;
use crate::services::token::{RefreshSource, TokenPair, TokenService};
use crate::services::user_client::{DirectoryError, UserDirectory};
use crate::services::CacheStore;

const ACTIVATION_CODE_SENT: &str = "A new activation code has been sent";
const RESET_CODE_SENT: &str = "If the account exists, a reset code has been sent";
const LOGGED_OUT: &str = "Logged out";

/// Composes the lifecycle services and the user directory into the public
/// use cases. Every mutating use case runs in one transaction; on failure the
/// transaction is rolled back and the user's cached credentials are evicted
/// so the cache cannot hold values the database never committed.
#[derive(Clone)]
pub struct AuthService {
    uow: Arc<dyn UnitOfWorkFactory>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn CodeNotifier>,
    passwords: PasswordService,
    codes: CodeService,
    tokens: TokenService,
    request_timeout: Duration,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        uow: Arc<dyn UnitOfWorkFactory>,
        cache: Arc<dyn CacheStore>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn CodeNotifier>,
    ) -> Self {
        let jwt = JwtService::new(&config.jwt, config.policy.token.clone());
        Self {
            uow,
            users,
            notifier,
            passwords: PasswordService::new(cache.clone(), config.policy.password.clone()),
            codes: CodeService::new(cache.clone(), config.policy.code.clone()),
            tokens: TokenService::new(jwt, cache),
            request_timeout: config.request_timeout,
        }
    }

    /// Creates the identity, its password, session version and activation
    /// code, and signs the first token pair.
    pub async fn register(
        &self,
        kind: UserKind,
        req: RegisterRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline("register", kind, None, self.register_inner(kind, req))
            .await
    }

    async fn register_inner(
        &self,
        kind: UserKind,
        req: RegisterRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        let profile = req.profile(kind)?;
        self.passwords.validate(&req.password)?;

        if self
            .users
            .get_by_email(kind, &req.email)
            .await
            .map_err(directory_error)?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let identity = self
            .users
            .create(
                kind,
                &NewIdentity {
                    email: req.email,
                    profile,
                },
            )
            .await
            .map_err(directory_error)?;

        let mut uow = self.begin().await?;
        let result = self
            .register_tx(uow.as_mut(), kind, &identity, &req.password)
            .await;
        let (code, pair) = self
            .finish(uow, "register", kind, Some(identity.id), result)
            .await?;

        tracing::info!(kind = %kind, user_id = identity.id, "User registered");
        self.notify(&identity, CodePurpose::Activation, &code).await;
        Ok((UserResponse::from(&identity), pair))
    }

    async fn register_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        identity: &Identity,
        password: &str,
    ) -> Result<(VerificationCode, TokenPair), AuthError> {
        self.passwords
            .create(uow, kind, identity.id, password)
            .await?;
        let version = self
            .tokens
            .current_version(uow, kind, identity.id)
            .await?;
        let code = self
            .codes
            .issue(uow, kind, CodePurpose::Activation, identity.id)
            .await?;
        let generated = self
            .tokens
            .generate(identity, RefreshSource::Fresh(version.version))?;
        let pair = self.tokens.persist(uow, kind, generated).await?;
        Ok((code, pair))
    }

    /// Regenerates the caller's activation code. Throttling is reported as a
    /// validation error on `code`.
    pub async fn get_new_activation_code(
        &self,
        kind: UserKind,
        claims: &Claims,
    ) -> Result<MessageResponse, AuthError> {
        self.within_deadline(
            "get_new_activation_code",
            kind,
            claims.user_id().ok(),
            self.get_new_activation_code_inner(kind, claims),
        )
        .await
    }

    async fn get_new_activation_code_inner(
        &self,
        kind: UserKind,
        claims: &Claims,
    ) -> Result<MessageResponse, AuthError> {
        let identity = self.caller(kind, claims).await?;
        if identity.is_active {
            return Err(AuthError::AlreadyActivated);
        }

        let mut uow = self.uow.create();
        let code = self
            .codes
            .regenerate(uow.as_mut(), kind, CodePurpose::Activation, identity.id)
            .await?;

        self.notify(&identity, CodePurpose::Activation, &code).await;
        Ok(MessageResponse::new(ACTIVATION_CODE_SENT))
    }

    /// Sends a password reset code. The response is the same whether or not
    /// the address belongs to a live account and whether or not the resend
    /// budget is spent.
    pub async fn get_reset_code(
        &self,
        kind: UserKind,
        req: ResetCodeRequest,
    ) -> Result<MessageResponse, AuthError> {
        self.within_deadline("get_reset_code", kind, None, self.get_reset_code_inner(kind, req))
            .await
    }

    async fn get_reset_code_inner(
        &self,
        kind: UserKind,
        req: ResetCodeRequest,
    ) -> Result<MessageResponse, AuthError> {
        let identity = match self
            .users
            .get_by_email(kind, &req.email)
            .await
            .map_err(directory_error)?
        {
            Some(identity) if !identity.is_deleted => identity,
            _ => {
                tracing::debug!(kind = %kind, "Reset code requested for unknown or deleted account");
                return Ok(MessageResponse::new(RESET_CODE_SENT));
            }
        };

        let mut uow = self.uow.create();
        match self
            .codes
            .regenerate(uow.as_mut(), kind, CodePurpose::ResetPassword, identity.id)
            .await
        {
            Ok(code) => self.notify(&identity, CodePurpose::ResetPassword, &code).await,
            Err(ServiceError::Policy(PolicyError::CodeResendExhausted)) => {
                tracing::info!(kind = %kind, user_id = identity.id, "Reset code throttled");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(MessageResponse::new(RESET_CODE_SENT))
    }

    /// Consumes the activation code, activates the identity and starts a new
    /// session version.
    pub async fn activate(
        &self,
        kind: UserKind,
        claims: &Claims,
        req: ActivateRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline(
            "activate",
            kind,
            claims.user_id().ok(),
            self.activate_inner(kind, claims, req),
        )
        .await
    }

    async fn activate_inner(
        &self,
        kind: UserKind,
        claims: &Claims,
        req: ActivateRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        let identity = self.caller(kind, claims).await?;
        if identity.is_active {
            return Err(AuthError::AlreadyActivated);
        }

        let mut uow = self.begin().await?;
        let result = self
            .activate_tx(uow.as_mut(), kind, &identity, &req.code)
            .await;
        let (identity, pair) = self
            .finish(uow, "activate", kind, Some(identity.id), result)
            .await?;

        tracing::info!(kind = %kind, user_id = identity.id, "User activated");
        Ok((UserResponse::from(&identity), pair))
    }

    async fn activate_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        identity: &Identity,
        code: &str,
    ) -> Result<(Identity, TokenPair), AuthError> {
        if !self
            .codes
            .check(uow, kind, CodePurpose::Activation, identity.id, code)
            .await?
        {
            return Err(invalid_code());
        }

        let version = self.tokens.bump_version(uow, kind, identity.id).await?;
        let activated = Identity {
            is_active: true,
            ..identity.clone()
        };
        let generated = self
            .tokens
            .generate(&activated, RefreshSource::Fresh(version.version))?;
        let pair = self.tokens.persist(uow, kind, generated).await?;

        // The directory cannot roll back, so it goes last.
        let identity = self
            .users
            .activate(kind, identity.id)
            .await
            .map_err(directory_error)?;
        Ok((identity, pair))
    }

    /// Password login. A still-valid refresh token presented by the same user
    /// is rotated rather than replaced.
    pub async fn login(
        &self,
        kind: UserKind,
        req: LoginRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline("login", kind, None, self.login_inner(kind, req))
            .await
    }

    async fn login_inner(
        &self,
        kind: UserKind,
        req: LoginRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        let identity = self
            .users
            .get_by_email(kind, &req.email)
            .await
            .map_err(directory_error)?
            .filter(|identity| !identity.is_deleted)
            .ok_or(AuthError::InvalidCredentials)?;

        let mut uow = self.begin().await?;
        let result = self.login_tx(uow.as_mut(), kind, &identity, &req).await;
        let pair = self
            .finish(uow, "login", kind, Some(identity.id), result)
            .await?;

        tracing::info!(kind = %kind, user_id = identity.id, "User logged in");
        Ok((UserResponse::from(&identity), pair))
    }

    async fn login_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        identity: &Identity,
        req: &LoginRequest,
    ) -> Result<TokenPair, AuthError> {
        if !self
            .passwords
            .check(uow, kind, identity.id, &req.password)
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        let version = self
            .tokens
            .current_version(uow, kind, identity.id)
            .await?;
        let source = match req.refresh_token.as_deref() {
            Some(raw) => match self.tokens.validate_refresh(uow, kind, raw).await {
                Ok(validated) if validated.token.user_id == identity.id => {
                    RefreshSource::Rotate(validated.token)
                }
                Ok(_) | Err(ServiceError::InvalidToken) => {
                    RefreshSource::Fresh(version.version)
                }
                Err(e) => return Err(e.into()),
            },
            None => RefreshSource::Fresh(version.version),
        };

        let generated = self.tokens.generate(identity, source)?;
        Ok(self.tokens.persist(uow, kind, generated).await?)
    }

    /// Exchanges a valid refresh token for a new pair, rotating it in place.
    pub async fn refresh(
        &self,
        kind: UserKind,
        refresh_token: &str,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline(
            "refresh",
            kind,
            self.tokens.owner_of(refresh_token),
            self.refresh_inner(kind, refresh_token),
        )
        .await
    }

    async fn refresh_inner(
        &self,
        kind: UserKind,
        refresh_token: &str,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        let owner = self.tokens.owner_of(refresh_token);

        let mut uow = self.begin().await?;
        let result = self.refresh_tx(uow.as_mut(), kind, refresh_token).await;
        let (identity, pair) = self.finish(uow, "refresh", kind, owner, result).await?;

        tracing::debug!(kind = %kind, user_id = identity.id, "Tokens refreshed");
        Ok((UserResponse::from(&identity), pair))
    }

    async fn refresh_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        refresh_token: &str,
    ) -> Result<(Identity, TokenPair), AuthError> {
        let validated = self
            .tokens
            .validate_refresh(uow, kind, refresh_token)
            .await?;

        let identity = self
            .users
            .get_by_id(kind, validated.token.user_id)
            .await
            .map_err(directory_error)?
            .filter(|identity| !identity.is_deleted)
            .ok_or(AuthError::InvalidToken)?;

        let generated = self
            .tokens
            .generate(&identity, RefreshSource::Rotate(validated.token))?;
        let pair = self.tokens.persist(uow, kind, generated).await?;
        Ok((identity, pair))
    }

    /// Deletes the presented refresh token. Never fails: the caller is logged
    /// out client-side regardless.
    pub async fn logout(&self, kind: UserKind, refresh_token: Option<&str>) -> MessageResponse {
        let Some(raw) = refresh_token else {
            return MessageResponse::new(LOGGED_OUT);
        };

        let result = self
            .within_deadline("logout", kind, self.tokens.owner_of(raw), async {
                let mut uow = self.uow.create();
                self.tokens
                    .invalidate(uow.as_mut(), kind, raw)
                    .await
                    .map_err(AuthError::from)
            })
            .await;
        if let Err(e) = result {
            tracing::warn!(kind = %kind, error = %e, "Failed to delete refresh token on logout");
        }

        MessageResponse::new(LOGGED_OUT)
    }

    /// Revokes every refresh token of the caller by bumping the session
    /// version, and deletes the presented one if it is theirs.
    pub async fn logout_all(
        &self,
        kind: UserKind,
        claims: &Claims,
        refresh_token: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        self.within_deadline(
            "logout_all",
            kind,
            claims.user_id().ok(),
            self.logout_all_inner(kind, claims, refresh_token),
        )
        .await
    }

    async fn logout_all_inner(
        &self,
        kind: UserKind,
        claims: &Claims,
        refresh_token: Option<&str>,
    ) -> Result<MessageResponse, AuthError> {
        let user_id = claims.user_id()?;

        let mut uow = self.begin().await?;
        let result = self
            .logout_all_tx(uow.as_mut(), kind, user_id, refresh_token)
            .await;
        self.finish(uow, "logout_all", kind, Some(user_id), result)
            .await?;
        self.tokens.evict_refresh_tokens(kind, user_id).await;

        tracing::info!(kind = %kind, user_id, "User logged out everywhere");
        Ok(MessageResponse::new(LOGGED_OUT))
    }

    async fn logout_all_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        user_id: i64,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        self.tokens.bump_version(uow, kind, user_id).await?;
        if let Some(raw) = refresh_token {
            if self.tokens.owner_of(raw) == Some(user_id) {
                self.tokens.invalidate(uow, kind, raw).await?;
            }
        }
        Ok(())
    }

    /// Sets a new password using a reset code and starts a new session
    /// version.
    pub async fn reset_password(
        &self,
        kind: UserKind,
        req: ResetPasswordRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline(
            "reset_password",
            kind,
            None,
            self.reset_password_inner(kind, req),
        )
        .await
    }

    async fn reset_password_inner(
        &self,
        kind: UserKind,
        req: ResetPasswordRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.passwords
            .validate(&req.new_password)
            .map_err(|e| AuthError::validation("new_password", e.to_string()))?;

        let identity = self
            .users
            .get_by_email(kind, &req.email)
            .await
            .map_err(directory_error)?
            .filter(|identity| !identity.is_deleted)
            .ok_or_else(invalid_code)?;

        let mut uow = self.begin().await?;
        let result = self
            .reset_password_tx(uow.as_mut(), kind, &identity, &req)
            .await;
        let pair = self
            .finish(uow, "reset_password", kind, Some(identity.id), result)
            .await?;

        tracing::info!(kind = %kind, user_id = identity.id, "Password reset");
        Ok((UserResponse::from(&identity), pair))
    }

    async fn reset_password_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        identity: &Identity,
        req: &ResetPasswordRequest,
    ) -> Result<TokenPair, AuthError> {
        if !self
            .codes
            .check(uow, kind, CodePurpose::ResetPassword, identity.id, &req.code)
            .await?
        {
            return Err(invalid_code());
        }

        self.passwords
            .update(uow, kind, identity.id, &req.new_password)
            .await
            .map_err(new_password_error)?;
        let version = self.tokens.bump_version(uow, kind, identity.id).await?;
        let generated = self
            .tokens
            .generate(identity, RefreshSource::Fresh(version.version))?;
        Ok(self.tokens.persist(uow, kind, generated).await?)
    }

    /// Replaces the caller's password after checking the old one, and starts
    /// a new session version.
    pub async fn change_password(
        &self,
        kind: UserKind,
        claims: &Claims,
        req: ChangePasswordRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        self.within_deadline(
            "change_password",
            kind,
            claims.user_id().ok(),
            self.change_password_inner(kind, claims, req),
        )
        .await
    }

    async fn change_password_inner(
        &self,
        kind: UserKind,
        claims: &Claims,
        req: ChangePasswordRequest,
    ) -> Result<(UserResponse, TokenPair), AuthError> {
        if req.old_password == req.new_password {
            return Err(AuthError::validation(
                "new_password",
                "new password must differ from the old one",
            ));
        }
        self.passwords
            .validate(&req.new_password)
            .map_err(|e| AuthError::validation("new_password", e.to_string()))?;

        let identity = self.caller(kind, claims).await?;

        let mut uow = self.begin().await?;
        let result = self
            .change_password_tx(uow.as_mut(), kind, &identity, &req)
            .await;
        let pair = self
            .finish(uow, "change_password", kind, Some(identity.id), result)
            .await?;

        tracing::info!(kind = %kind, user_id = identity.id, "Password changed");
        Ok((UserResponse::from(&identity), pair))
    }

    async fn change_password_tx(
        &self,
        uow: &mut dyn UnitOfWork,
        kind: UserKind,
        identity: &Identity,
        req: &ChangePasswordRequest,
    ) -> Result<TokenPair, AuthError> {
        if !self
            .passwords
            .check(uow, kind, identity.id, &req.old_password)
            .await?
        {
            return Err(AuthError::validation("old_password", "invalid password"));
        }

        self.passwords
            .update(uow, kind, identity.id, &req.new_password)
            .await
            .map_err(new_password_error)?;
        let version = self.tokens.bump_version(uow, kind, identity.id).await?;
        let generated = self
            .tokens
            .generate(identity, RefreshSource::Fresh(version.version))?;
        Ok(self.tokens.persist(uow, kind, generated).await?)
    }

    /// Validates an access token issued for `kind`.
    pub fn authenticate(&self, kind: UserKind, access_token: &str) -> Result<Claims, AuthError> {
        Ok(self.tokens.validate_access(kind, access_token)?)
    }

    /// Re-reads the caller's identity. Access tokens outlive deletion, so the
    /// flags in the claims are not trusted.
    async fn caller(&self, kind: UserKind, claims: &Claims) -> Result<Identity, AuthError> {
        let identity = self
            .users
            .get_by_id(kind, claims.user_id()?)
            .await
            .map_err(directory_error)?
            .ok_or(AuthError::InvalidToken)?;
        if identity.is_deleted {
            return Err(AuthError::AccountDeleted);
        }
        Ok(identity)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, AuthError> {
        let mut uow = self.uow.create();
        uow.begin().await?;
        Ok(uow)
    }

    /// Commits on success, rolls back on failure. Any failure, including a
    /// failed commit, evicts the user's cached credentials.
    async fn finish<T>(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        op: &'static str,
        kind: UserKind,
        user_id: Option<i64>,
        result: Result<T, AuthError>,
    ) -> Result<T, AuthError> {
        let outcome = match result {
            Ok(value) => uow.commit().await.map(|()| value).map_err(AuthError::from),
            Err(err) => {
                if let Err(e) = uow.rollback().await {
                    tracing::error!(op, kind = %kind, error = %e, "Rollback failed");
                }
                Err(err)
            }
        };

        if let Err(err) = &outcome {
            if let Some(user_id) = user_id {
                self.forget(kind, user_id).await;
            }
            match err {
                AuthError::Internal(e) => {
                    tracing::error!(op, kind = %kind, user_id, error = %e, "Use case failed")
                }
                other => {
                    tracing::info!(op, kind = %kind, user_id, reason = %other, "Use case rejected")
                }
            }
        }
        outcome
    }

    async fn forget(&self, kind: UserKind, user_id: i64) {
        self.passwords.evict(kind, user_id).await;
        self.codes
            .evict(kind, CodePurpose::Activation, user_id)
            .await;
        self.codes
            .evict(kind, CodePurpose::ResetPassword, user_id)
            .await;
        self.tokens.evict_version(kind, user_id).await;
        self.tokens.evict_refresh_tokens(kind, user_id).await;
    }

    async fn notify(&self, identity: &Identity, purpose: CodePurpose, code: &VerificationCode) {
        if let Err(e) = self.notifier.code_issued(identity, purpose, code).await {
            tracing::warn!(
                kind = %identity.kind(),
                user_id = identity.id,
                purpose = %purpose,
                error = %e,
                "Failed to deliver verification code"
            );
        }
    }

    /// Bounds a use case by the request timeout. A use case cut short skips
    /// `finish`, so the known user's cached credentials are evicted here.
    async fn within_deadline<T, F>(
        &self,
        op: &'static str,
        kind: UserKind,
        user_id: Option<i64>,
        fut: F,
    ) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    op,
                    kind = %kind,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Use case timed out"
                );
                if let Some(user_id) = user_id {
                    self.forget(kind, user_id).await;
                }
                Err(AuthError::Internal(anyhow::anyhow!("{} timed out", op)))
            }
        }
    }
}

fn directory_error(err: DirectoryError) -> AuthError {
    match err {
        DirectoryError::EmailTaken => AuthError::EmailTaken,
        other => AuthError::Internal(anyhow::Error::new(other)),
    }
}

fn new_password_error(err: ServiceError) -> AuthError {
    match err {
        ServiceError::Policy(e) => AuthError::validation("new_password", e.to_string()),
        other => other.into(),
    }
}

fn invalid_code() -> AuthError {
    AuthError::validation("code", "invalid code")
}
