//! `/auth/:kind/...` routes. Handlers unpack the request, call one
//! orchestrator use case and put any issued tokens into response headers.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;

use crate::dtos::auth::{
    ActivateRequest, ChangePasswordRequest, LoginRequest, RefreshRequest, RegisterRequest,
    ResetCodeRequest, ResetPasswordRequest,
};
use crate::middleware::{AuthUser, Kind};
use crate::services::TokenPair;
use crate::utils::ValidatedJson;
use crate::AppState;

pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";
pub const REFRESH_TOKEN_HEADER: &str = "x-refresh-token";

/// Body plus token headers. An absent pair clears both headers.
fn respond<T: Serialize>(
    status: StatusCode,
    body: T,
    tokens: Option<&TokenPair>,
) -> Result<Response, AppError> {
    let (access, refresh) = match tokens {
        Some(pair) => (
            header_value(&pair.access_token)?,
            header_value(&pair.refresh_token)?,
        ),
        None => (HeaderValue::from_static(""), HeaderValue::from_static("")),
    };

    let headers = [
        (HeaderName::from_static(ACCESS_TOKEN_HEADER), access),
        (HeaderName::from_static(REFRESH_TOKEN_HEADER), refresh),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
    ];
    Ok((status, headers, Json(body)).into_response())
}

fn header_value(token: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(token)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Token is not a valid header value: {}", e)))
}

/// Refresh token from the body, falling back to the `x-refresh-token` header.
fn presented_refresh_token(headers: &HeaderMap, body: Option<String>) -> Option<String> {
    body.filter(|t| !t.is_empty()).or_else(|| {
        headers
            .get(REFRESH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

pub async fn register(
    State(state): State<AppState>,
    Kind(kind): Kind,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<Response, AppError> {
    let (user, tokens) = state.auth_service.register(kind, req).await?;
    respond(StatusCode::CREATED, user, Some(&tokens))
}

pub async fn login(
    State(state): State<AppState>,
    Kind(kind): Kind,
    headers: HeaderMap,
    ValidatedJson(mut req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    req.refresh_token = presented_refresh_token(&headers, req.refresh_token.take());
    let (user, tokens) = state.auth_service.login(kind, req).await?;
    respond(StatusCode::OK, user, Some(&tokens))
}

pub async fn refresh(
    State(state): State<AppState>,
    Kind(kind): Kind,
    headers: HeaderMap,
    body: Option<ValidatedJson<RefreshRequest>>,
) -> Result<Response, AppError> {
    let token = presented_refresh_token(&headers, body.and_then(|b| b.0.refresh_token))
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing refresh token")))?;
    let (user, tokens) = state.auth_service.refresh(kind, &token).await?;
    respond(StatusCode::OK, user, Some(&tokens))
}

pub async fn logout(
    State(state): State<AppState>,
    Kind(kind): Kind,
    headers: HeaderMap,
    body: Option<ValidatedJson<RefreshRequest>>,
) -> Result<Response, AppError> {
    let token = presented_refresh_token(&headers, body.and_then(|b| b.0.refresh_token));
    let message = state.auth_service.logout(kind, token.as_deref()).await;
    respond(StatusCode::OK, message, None)
}

pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthUser,
    headers: HeaderMap,
    body: Option<ValidatedJson<RefreshRequest>>,
) -> Result<Response, AppError> {
    let token = presented_refresh_token(&headers, body.and_then(|b| b.0.refresh_token));
    let message = state
        .auth_service
        .logout_all(user.kind, &user.claims, token.as_deref())
        .await?;
    respond(StatusCode::OK, message, None)
}

pub async fn activate(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ActivateRequest>,
) -> Result<Response, AppError> {
    let (user, tokens) = state
        .auth_service
        .activate(user.kind, &user.claims, req)
        .await?;
    respond(StatusCode::OK, user, Some(&tokens))
}

pub async fn activation_code(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let message = state
        .auth_service
        .get_new_activation_code(user.kind, &user.claims)
        .await?;
    Ok((StatusCode::OK, Json(message)))
}

pub async fn reset_code(
    State(state): State<AppState>,
    Kind(kind): Kind,
    ValidatedJson(req): ValidatedJson<ResetCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.auth_service.get_reset_code(kind, req).await?;
    Ok((StatusCode::OK, Json(message)))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Kind(kind): Kind,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> Result<Response, AppError> {
    let (user, tokens) = state.auth_service.reset_password(kind, req).await?;
    respond(StatusCode::OK, user, Some(&tokens))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<ChangePasswordRequest>,
) -> Result<Response, AppError> {
    let (user, tokens) = state
        .auth_service
        .change_password(user.kind, &user.claims, req)
        .await?;
    respond(StatusCode::OK, user, Some(&tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_token_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(REFRESH_TOKEN_HEADER, HeaderValue::from_static("from-header"));

        assert_eq!(
            presented_refresh_token(&headers, Some("from-body".to_string())).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            presented_refresh_token(&headers, Some(String::new())).as_deref(),
            Some("from-header")
        );
        assert_eq!(presented_refresh_token(&HeaderMap::new(), None), None);
    }

    #[test]
    fn response_without_tokens_clears_headers() {
        let response = respond(StatusCode::OK, serde_json::json!({}), None).expect("response");
        assert_eq!(response.headers()[ACCESS_TOKEN_HEADER], "");
        assert_eq!(response.headers()[REFRESH_TOKEN_HEADER], "");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }
}
