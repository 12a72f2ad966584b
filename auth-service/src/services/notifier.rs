use async_trait::async_trait;
use std::sync::Mutex;

use crate::models::{CodePurpose, Identity, UserKind, VerificationCode};

/// Delivers verification codes to their owner. Called only after the code
/// has been committed; a delivery failure never undoes the use case.
#[async_trait]
pub trait CodeNotifier: Send + Sync {
    async fn code_issued(
        &self,
        identity: &Identity,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), anyhow::Error>;
}

/// Records that a code went out without revealing it. Used when no delivery
/// channel is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl CodeNotifier for LogNotifier {
    async fn code_issued(
        &self,
        identity: &Identity,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(
            kind = %identity.kind(),
            user_id = identity.id,
            purpose = %purpose,
            expires_at = %code.expires_at,
            "Verification code ready for delivery"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentCode {
    pub kind: UserKind,
    pub user_id: i64,
    pub email: String,
    pub purpose: CodePurpose,
    pub code: String,
}

/// Keeps every delivered code in memory so tests can read them back.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SentCode>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent code sent to `user_id` for `purpose`.
    pub fn latest(&self, kind: UserKind, user_id: i64, purpose: CodePurpose) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|s| s.kind == kind && s.user_id == user_id && s.purpose == purpose)
                .map(|s| s.code.clone())
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }
}

#[async_trait]
impl CodeNotifier for MockNotifier {
    async fn code_issued(
        &self,
        identity: &Identity,
        purpose: CodePurpose,
        code: &VerificationCode,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("mock notifier mutex poisoned: {}", e))?
            .push(SentCode {
                kind: identity.kind(),
                user_id: identity.id,
                email: identity.email.clone(),
                purpose,
                code: code.code.clone(),
            });
        Ok(())
    }
}
