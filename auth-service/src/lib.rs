pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod providers;
pub mod services;
pub mod utils;

use service_core::axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::tracing::{request_id_middleware, REQUEST_ID_HEADER};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AuthConfig;
use crate::db::UnitOfWorkFactory;
use crate::services::{AuthService, CacheStore, CodeNotifier, UserDirectory};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub uow: Arc<dyn UnitOfWorkFactory>,
    pub cache: Arc<dyn CacheStore>,
    pub auth_service: AuthService,
}

impl AppState {
    pub fn new(
        config: AuthConfig,
        uow: Arc<dyn UnitOfWorkFactory>,
        cache: Arc<dyn CacheStore>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn CodeNotifier>,
    ) -> Self {
        let auth_service = AuthService::new(&config, uow.clone(), cache.clone(), users, notifier);
        Self {
            config: Arc::new(config),
            uow,
            cache,
            auth_service,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/:kind/register", post(handlers::register))
        .route("/auth/:kind/login", post(handlers::login))
        .route("/auth/:kind/refresh", post(handlers::refresh))
        .route("/auth/:kind/logout", post(handlers::logout))
        .route("/auth/:kind/logout-all", post(handlers::logout_all))
        .route("/auth/:kind/activate", post(handlers::activate))
        .route("/auth/:kind/activation-code", post(handlers::activation_code))
        .route("/auth/:kind/reset-code", post(handlers::reset_code))
        .route("/auth/:kind/reset-password", post(handlers::reset_password))
        .route("/auth/:kind/change-password", post(handlers::change_password));

    Router::new()
        .route("/health", get(handlers::health_check))
        .merge(auth_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}
