//! One-time numeric verification codes for activation and password reset.

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use subtle::ConstantTimeEq;

use crate::config::CodePolicy;
use crate::services::error::{PolicyError, ServiceError};

const CODE_SPACE: u32 = 1_000_000;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VerificationCode {
    pub id: i64,
    pub user_id: i64,
    pub code: String,
    pub generations_left: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VerificationCode {
    /// An unsaved code with a full generation budget and no value yet.
    pub fn new(user_id: i64, policy: &CodePolicy, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            code: String::new(),
            generations_left: policy.max_generations,
            expires_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Draws a fresh 6-digit value and spends one generation.
    ///
    /// Once the budget is spent, a persisted code refuses to regenerate until
    /// `resend_cooldown` has passed since its last generation; after that the
    /// budget refills.
    pub fn generate_code(
        &mut self,
        policy: &CodePolicy,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        if self.generations_left <= 0 {
            if self.id != 0 && now - self.updated_at < policy.resend_cooldown {
                return Err(PolicyError::CodeResendExhausted);
            }
            self.generations_left = policy.max_generations;
        }

        self.generations_left -= 1;
        self.code = format!("{:06}", OsRng.gen_range(0..CODE_SPACE));
        self.expires_at = now + policy.ttl;
        self.updated_at = now;
        Ok(())
    }

    /// Compares `raw` to the stored value in constant time.
    /// An expired code is an error, not a mismatch.
    pub fn check_code(&self, raw: &str, now: DateTime<Utc>) -> Result<bool, ServiceError> {
        if now > self.expires_at {
            return Err(ServiceError::CodeExpired);
        }
        Ok(bool::from(self.code.as_bytes().ct_eq(raw.as_bytes())))
    }
}
