use axum::{
    extract::{FromRequestParts, Path},
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use service_core::error::AppError;

use crate::models::UserKind;
use crate::services::Claims;
use crate::AppState;

/// The `:kind` segment of `/auth/:kind/...`. Unknown kinds are a 404.
#[derive(Debug, Clone, Copy)]
pub struct Kind(pub UserKind);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Kind
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(kind) = Path::<UserKind>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::NotFound(anyhow::anyhow!("Unknown user kind: {}", e)))?;
        Ok(Kind(kind))
    }
}

/// The authenticated caller. The bearer access token must have been issued
/// for the kind named in the path.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub kind: UserKind,
    pub claims: Claims,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Kind(kind) = Kind::from_request_parts(parts, state).await?;

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AppError::Unauthorized(anyhow::anyhow!(
                        "Missing or invalid Authorization header"
                    ))
                })?;

        let claims = state.auth_service.authenticate(kind, bearer.token())?;
        Ok(AuthUser { kind, claims })
    }
}
