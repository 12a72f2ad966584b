//! Lifecycle services and the orchestrator built on them, plus the clients
//! for the cache and the user service.

mod auth;
mod code;
pub mod error;
pub mod jwt;
mod notifier;
mod password;
pub mod redis;
mod token;
mod user_client;

pub use auth::AuthService;
pub use code::CodeService;
pub use error::{AuthError, PolicyError, ServiceError, StoreError};
pub use jwt::{Claims, JwtService};
pub use notifier::{CodeNotifier, LogNotifier, MockNotifier, SentCode};
pub use password::PasswordService;
pub use redis::{CacheStore, MockCache, RedisService};
pub use token::{GeneratedTokens, RefreshSource, TokenPair, TokenService, ValidatedRefresh};
pub use user_client::{DirectoryError, MockUserDirectory, UserDirectory, UserServiceClient};
