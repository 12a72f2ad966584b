//! Shared setup for auth-service integration tests.
//!
//! Every collaborator is an in-memory mock, so these tests need neither
//! PostgreSQL nor Redis.

#![allow(dead_code)]

use auth_service::{
    build_router,
    config::AuthConfig,
    db::MockDatabase,
    dtos::{ActivateRequest, LoginRequest, RegisterRequest, UserResponse},
    models::{CodePurpose, UserKind},
    services::{MockCache, MockNotifier, MockUserDirectory, TokenPair},
    AppState,
};
use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "Str0ng!Pass";
pub const NEW_PASSWORD: &str = "N3w!Password";

pub struct TestApp {
    pub state: AppState,
    pub db: MockDatabase,
    pub cache: Arc<MockCache>,
    pub users: Arc<MockUserDirectory>,
    pub notifier: Arc<MockNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::with_config(AuthConfig::local())
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let db = MockDatabase::new();
        let cache = Arc::new(MockCache::new());
        let users = Arc::new(MockUserDirectory::new());
        let notifier = Arc::new(MockNotifier::new());

        let state = AppState::new(
            config,
            Arc::new(db.clone()),
            cache.clone(),
            users.clone(),
            notifier.clone(),
        );

        TestApp {
            state,
            db,
            cache,
            users,
            notifier,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Registers an applicant and returns the response with its first pair.
    pub async fn register_applicant(&self, email: &str) -> (UserResponse, TokenPair) {
        self.state
            .auth_service
            .register(UserKind::Applicant, applicant(email))
            .await
            .expect("registration failed")
    }

    /// Registers and activates an applicant, returning the post-activation pair.
    pub async fn active_applicant(&self, email: &str) -> (UserResponse, TokenPair) {
        let (user, tokens) = self.register_applicant(email).await;
        self.activate_applicant(&user, &tokens).await
    }

    /// Activates a registered applicant with the code the notifier received.
    pub async fn activate_applicant(
        &self,
        user: &UserResponse,
        tokens: &TokenPair,
    ) -> (UserResponse, TokenPair) {
        let claims = self
            .state
            .auth_service
            .authenticate(UserKind::Applicant, &tokens.access_token)
            .expect("fresh access token rejected");
        let code = self
            .code_for(UserKind::Applicant, user.id, CodePurpose::Activation)
            .expect("no activation code sent");

        self.state
            .auth_service
            .activate(UserKind::Applicant, &claims, ActivateRequest { code })
            .await
            .expect("activation failed")
    }

    pub fn code_for(&self, kind: UserKind, user_id: i64, purpose: CodePurpose) -> Option<String> {
        self.notifier.latest(kind, user_id, purpose)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}

pub fn applicant(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        first_name: Some("Anna".to_string()),
        last_name: Some("Sokolova".to_string()),
        patronymic: None,
        company_name: None,
    }
}

pub fn employer(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        password: PASSWORD.to_string(),
        first_name: None,
        last_name: None,
        patronymic: None,
        company_name: Some("Acme Logistics".to_string()),
    }
}

pub fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
        refresh_token: None,
    }
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub fn bearer_request(uri: &str, access_token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("readable body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("JSON body")
}

pub fn header_str<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
