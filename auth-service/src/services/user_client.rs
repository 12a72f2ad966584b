//! Client for the user service, which owns identities (email, profile and the
//! active/deleted flags). This service only stores credentials against the
//! ids it hands out.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use service_core::retry::{retry_call, RetryConfig, Transient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::UserServiceConfig;
use crate::models::{Identity, NewIdentity, UserKind};

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Email already registered")]
    EmailTaken,

    #[error("User service unavailable: {0}")]
    Unavailable(String),

    #[error("User service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed user service response: {0}")]
    Malformed(String),
}

impl Transient for DirectoryError {
    fn is_transient(&self) -> bool {
        match self {
            DirectoryError::Unavailable(_) => true,
            DirectoryError::Rejected { status, .. } => {
                matches!(status, 408 | 429 | 502 | 503 | 504)
            }
            DirectoryError::EmailTaken | DirectoryError::Malformed(_) => false,
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create(&self, kind: UserKind, new: &NewIdentity) -> Result<Identity, DirectoryError>;
    async fn get_by_id(&self, kind: UserKind, id: i64) -> Result<Option<Identity>, DirectoryError>;
    async fn get_by_email(
        &self,
        kind: UserKind,
        email: &str,
    ) -> Result<Option<Identity>, DirectoryError>;
    async fn activate(&self, kind: UserKind, id: i64) -> Result<Identity, DirectoryError>;
    async fn mark_deleted(&self, kind: UserKind, id: i64) -> Result<(), DirectoryError>;
}

/// HTTP/JSON client. Identities live under `/<kind>s`, e.g.
/// `GET {base_url}/applicants/42`.
#[derive(Clone)]
pub struct UserServiceClient {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl UserServiceClient {
    pub fn new(config: &UserServiceConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build user service client: {}", e))?;

        tracing::info!(base_url = %config.base_url, "User service client configured");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
        })
    }

    fn url(&self, kind: UserKind, suffix: &str) -> String {
        format!("{}/{}s{}", self.base_url, kind, suffix)
    }

    /// Sends with retries. `None` means 404.
    async fn send<F>(&self, operation: &str, build: F) -> Result<Option<Response>, DirectoryError>
    where
        F: Fn() -> RequestBuilder,
    {
        retry_call(&self.retry, operation, || {
            let request = build();
            async move {
                let response = request.send().await.map_err(|e| {
                    tracing::error!(error = %e, "User service request failed");
                    DirectoryError::Unavailable(e.to_string())
                })?;

                match response.status() {
                    status if status.is_success() => Ok(Some(response)),
                    StatusCode::NOT_FOUND => Ok(None),
                    StatusCode::CONFLICT => Err(DirectoryError::EmailTaken),
                    status => Err(DirectoryError::Rejected {
                        status: status.as_u16(),
                        message: response.text().await.unwrap_or_default(),
                    }),
                }
            }
        })
        .await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, DirectoryError> {
        response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))
    }

    fn expect_found(
        operation: &str,
        kind: UserKind,
        id: i64,
        response: Option<Response>,
    ) -> Result<Response, DirectoryError> {
        response.ok_or_else(|| {
            tracing::warn!(operation, kind = %kind, user_id = id, "User disappeared from user service");
            DirectoryError::Rejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("{} {} not found", kind, id),
            }
        })
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn create(&self, kind: UserKind, new: &NewIdentity) -> Result<Identity, DirectoryError> {
        let url = self.url(kind, "");
        let response = self
            .send("user_service.create", || self.client.post(&url).json(new))
            .await?
            .ok_or_else(|| DirectoryError::Rejected {
                status: StatusCode::NOT_FOUND.as_u16(),
                message: format!("no such endpoint: {}", url),
            })?;
        let identity: Identity = Self::parse(response).await?;

        tracing::info!(kind = %kind, user_id = identity.id, "Identity created in user service");
        Ok(identity)
    }

    async fn get_by_id(&self, kind: UserKind, id: i64) -> Result<Option<Identity>, DirectoryError> {
        let url = self.url(kind, &format!("/{}", id));
        match self
            .send("user_service.get_by_id", || self.client.get(&url))
            .await?
        {
            Some(response) => Self::parse(response).await.map(Some),
            None => Ok(None),
        }
    }

    async fn get_by_email(
        &self,
        kind: UserKind,
        email: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        let url = self.url(kind, "");
        match self
            .send("user_service.get_by_email", || {
                self.client.get(&url).query(&[("email", email)])
            })
            .await?
        {
            Some(response) => Self::parse(response).await.map(Some),
            None => Ok(None),
        }
    }

    async fn activate(&self, kind: UserKind, id: i64) -> Result<Identity, DirectoryError> {
        let url = self.url(kind, &format!("/{}/activate", id));
        let response = self
            .send("user_service.activate", || self.client.post(&url))
            .await?;
        let response = Self::expect_found("activate", kind, id, response)?;
        Self::parse(response).await
    }

    async fn mark_deleted(&self, kind: UserKind, id: i64) -> Result<(), DirectoryError> {
        let url = self.url(kind, &format!("/{}", id));
        let response = self
            .send("user_service.mark_deleted", || self.client.delete(&url))
            .await?;
        Self::expect_found("mark_deleted", kind, id, response)?;
        Ok(())
    }
}

/// In-memory directory for tests. Email uniqueness is enforced per kind.
#[derive(Default)]
pub struct MockUserDirectory {
    identities: Mutex<HashMap<(UserKind, i64), Identity>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
    activation_delay_ms: AtomicU64,
}

impl MockUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out ids above `last_id`, for tests sharing a persistent store.
    pub fn starting_after(last_id: i64) -> Self {
        Self {
            next_id: AtomicI64::new(last_id),
            ..Self::default()
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Holds every `activate` call back by `delay` before it takes effect.
    pub fn set_activation_delay(&self, delay: Duration) {
        self.activation_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn identities(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(UserKind, i64), Identity>>, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("mock directory offline".to_string()));
        }
        self.identities
            .lock()
            .map_err(|e| DirectoryError::Unavailable(format!("mock directory mutex poisoned: {}", e)))
    }

    fn update(
        &self,
        kind: UserKind,
        id: i64,
        f: impl FnOnce(&mut Identity),
    ) -> Result<Identity, DirectoryError> {
        let mut identities = self.identities()?;
        let identity = identities
            .get_mut(&(kind, id))
            .ok_or_else(|| DirectoryError::Rejected {
                status: 404,
                message: format!("{} {} not found", kind, id),
            })?;
        f(identity);
        Ok(identity.clone())
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn create(&self, kind: UserKind, new: &NewIdentity) -> Result<Identity, DirectoryError> {
        let mut identities = self.identities()?;
        if identities
            .iter()
            .any(|((k, _), i)| *k == kind && i.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(DirectoryError::EmailTaken);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let identity = Identity {
            id,
            email: new.email.clone(),
            is_active: false,
            is_deleted: false,
            profile: new.profile.clone(),
        };
        identities.insert((kind, id), identity.clone());
        Ok(identity)
    }

    async fn get_by_id(&self, kind: UserKind, id: i64) -> Result<Option<Identity>, DirectoryError> {
        Ok(self.identities()?.get(&(kind, id)).cloned())
    }

    async fn get_by_email(
        &self,
        kind: UserKind,
        email: &str,
    ) -> Result<Option<Identity>, DirectoryError> {
        Ok(self
            .identities()?
            .iter()
            .find(|((k, _), i)| *k == kind && i.email.eq_ignore_ascii_case(email))
            .map(|(_, i)| i.clone()))
    }

    async fn activate(&self, kind: UserKind, id: i64) -> Result<Identity, DirectoryError> {
        let delay = self.activation_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.update(kind, id, |identity| identity.is_active = true)
    }

    async fn mark_deleted(&self, kind: UserKind, id: i64) -> Result<(), DirectoryError> {
        self.update(kind, id, |identity| identity.is_deleted = true)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Profile;

    fn applicant(email: &str) -> NewIdentity {
        NewIdentity {
            email: email.to_string(),
            profile: Profile::Applicant {
                first_name: "Ivan".to_string(),
                last_name: "Petrov".to_string(),
                patronymic: None,
            },
        }
    }

    #[test]
    fn only_gateway_style_failures_are_retried() {
        assert!(DirectoryError::Unavailable("timeout".into()).is_transient());
        for status in [408, 429, 502, 503, 504] {
            assert!(DirectoryError::Rejected {
                status,
                message: String::new()
            }
            .is_transient());
        }
        assert!(!DirectoryError::Rejected {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!DirectoryError::EmailTaken.is_transient());
        assert!(!DirectoryError::Malformed("eof".into()).is_transient());
    }

    #[test]
    fn urls_are_pluralised_by_kind() {
        let client = UserServiceClient::new(&UserServiceConfig {
            base_url: "http://users:8081/".to_string(),
            timeout: std::time::Duration::from_secs(1),
            retry: RetryConfig::no_retry(),
        })
        .expect("client");
        assert_eq!(
            client.url(UserKind::Employer, "/7/activate"),
            "http://users:8081/employers/7/activate"
        );
        assert_eq!(client.url(UserKind::Applicant, ""), "http://users:8081/applicants");
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let client = UserServiceClient::new(&UserServiceConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout: std::time::Duration::from_millis(200),
            retry: RetryConfig::no_retry(),
        })
        .expect("client");

        let result = client.get_by_id(UserKind::Applicant, 1).await;
        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn mock_enforces_email_uniqueness_per_kind() {
        let directory = MockUserDirectory::new();
        directory
            .create(UserKind::Applicant, &applicant("a@example.com"))
            .await
            .expect("first");
        let err = directory
            .create(UserKind::Applicant, &applicant("A@example.com"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, DirectoryError::EmailTaken));

        let found = directory
            .get_by_email(UserKind::Applicant, "a@example.com")
            .await
            .expect("lookup");
        assert!(found.is_some());
        assert!(directory
            .get_by_email(UserKind::Employer, "a@example.com")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn mock_flags_are_sticky() {
        let directory = MockUserDirectory::new();
        let identity = directory
            .create(UserKind::Applicant, &applicant("b@example.com"))
            .await
            .expect("create");

        let activated = directory
            .activate(UserKind::Applicant, identity.id)
            .await
            .expect("activate");
        assert!(activated.is_active);

        directory
            .mark_deleted(UserKind::Applicant, identity.id)
            .await
            .expect("delete");
        let stored = directory
            .get_by_id(UserKind::Applicant, identity.id)
            .await
            .expect("get")
            .expect("present");
        assert!(stored.is_deleted);
    }
}
