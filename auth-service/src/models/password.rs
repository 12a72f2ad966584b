//! Password entity: complexity policy, change cooldown, hash lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

use crate::config::PasswordPolicy;
use crate::services::error::{PolicyError, ServiceError};
use crate::utils::password::{hash_password, verify_password, PasswordHashString, RawPassword};

#[derive(Clone, FromRow, Serialize, Deserialize)]
pub struct Password {
    pub id: i64,
    pub user_id: i64,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("password_hash", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl Password {
    /// An unsaved password row; `id == 0` until the store assigns one.
    pub fn new(user_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            user_id,
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks complexity rules in a fixed order and reports the first violation.
    pub fn validate(raw: &str, policy: &PasswordPolicy) -> Result<(), PolicyError> {
        if raw.chars().count() < policy.min_length {
            return Err(PolicyError::PasswordTooShort {
                min: policy.min_length,
            });
        }
        if !raw.chars().any(|c| c.is_uppercase()) {
            return Err(PolicyError::MissingUppercase);
        }
        if !raw.chars().any(|c| c.is_lowercase()) {
            return Err(PolicyError::MissingLowercase);
        }
        if !raw.chars().any(|c| c.is_ascii_digit()) {
            return Err(PolicyError::MissingDigit);
        }
        if !raw
            .chars()
            .any(|c| c.is_ascii_punctuation() || (!c.is_alphanumeric() && !c.is_whitespace()))
        {
            return Err(PolicyError::MissingSpecial);
        }
        Ok(())
    }

    /// Validates and hashes `raw`. A persisted password may change at most
    /// once per `policy.change_cooldown`, measured from `updated_at`.
    pub fn set_password(
        &mut self,
        raw: &str,
        policy: &PasswordPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if self.id != 0 && now - self.updated_at < policy.change_cooldown {
            return Err(PolicyError::PasswordCooldown {
                hours: policy.change_cooldown.num_hours(),
            }
            .into());
        }
        self.replace_password(raw, policy, now)
    }

    /// Validates and hashes `raw` without consulting the cooldown.
    pub fn replace_password(
        &mut self,
        raw: &str,
        policy: &PasswordPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        Self::validate(raw, policy)?;

        let hash = hash_password(&RawPassword::new(raw.to_string()))?;
        self.password_hash = hash.into_string();
        self.updated_at = now;
        Ok(())
    }

    pub fn check(&self, raw: &str) -> bool {
        verify_password(
            &RawPassword::new(raw.to_string()),
            &PasswordHashString::new(self.password_hash.clone()),
        )
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const VALID: &str = "Str0ng!pass";

    fn policy() -> PasswordPolicy {
        PasswordPolicy::default()
    }

    #[test]
    fn accepts_password_with_every_class() {
        assert_eq!(Password::validate(VALID, &policy()), Ok(()));
    }

    #[test]
    fn reports_each_missing_class() {
        let p = policy();
        assert_eq!(
            Password::validate("Sh0rt!", &p),
            Err(PolicyError::PasswordTooShort { min: 8 })
        );
        assert_eq!(
            Password::validate("str0ng!pass", &p),
            Err(PolicyError::MissingUppercase)
        );
        assert_eq!(
            Password::validate("STR0NG!PASS", &p),
            Err(PolicyError::MissingLowercase)
        );
        assert_eq!(
            Password::validate("Strong!pass", &p),
            Err(PolicyError::MissingDigit)
        );
        assert_eq!(
            Password::validate("Str0ngpass", &p),
            Err(PolicyError::MissingSpecial)
        );
    }

    #[test]
    fn removing_the_only_member_of_a_class_fails() {
        // One character per class; the spaces belong to none of them.
        let p = policy();
        let base = "Ab1!    ";
        assert!(Password::validate(base, &p).is_ok());
        for (idx, _) in base.char_indices().take(4) {
            let mut mutated: String = base.to_string();
            mutated.replace_range(idx..idx + 1, " ");
            assert!(
                Password::validate(&mutated, &p).is_err(),
                "{} should be rejected",
                mutated
            );
        }
    }

    #[test]
    fn symbols_outside_ascii_punctuation_count_as_special() {
        assert!(Password::validate("Str0ng€pass", &policy()).is_ok());
    }

    #[test]
    fn new_password_ignores_cooldown() {
        let now = Utc::now();
        let mut password = Password::new(7, now);
        password
            .set_password(VALID, &policy(), now)
            .expect("first password is accepted");
        assert!(password.password_hash.starts_with("$argon2"));
        assert!(password.check(VALID));
        assert!(!password.check("Wr0ng!pass"));
    }

    #[test]
    fn any_single_character_change_fails_the_check() {
        let now = Utc::now();
        let mut password = Password::new(7, now);
        password.set_password(VALID, &policy(), now).expect("set");

        let chars: Vec<char> = VALID.chars().collect();
        for idx in 0..chars.len() {
            let mut mutated = chars.clone();
            mutated[idx] = if chars[idx] == 'x' { 'y' } else { 'x' };
            let mutated: String = mutated.into_iter().collect();
            assert!(!password.check(&mutated), "{} should not match", mutated);
        }
        assert!(!password.check(&VALID[1..]));
        assert!(!password.check(&format!("{}x", VALID)));
    }

    #[test]
    fn replace_skips_the_cooldown() {
        let now = Utc::now();
        let mut password = Password::new(7, now);
        password.set_password(VALID, &policy(), now).expect("set");
        password.id = 1;

        password
            .replace_password("An0ther!pass", &policy(), now)
            .expect("no cooldown on replace");
        assert!(password.check("An0ther!pass"));
    }

    #[test]
    fn persisted_password_honours_cooldown() {
        let created = Utc::now() - Duration::hours(30);
        let mut password = Password::new(7, created);
        password
            .set_password(VALID, &policy(), created)
            .expect("initial set");
        password.id = 1;

        let too_soon = created + Duration::hours(23) + Duration::minutes(59);
        let err = password
            .set_password("An0ther!pass", &policy(), too_soon)
            .expect_err("cooldown applies");
        assert!(matches!(
            err,
            ServiceError::Policy(PolicyError::PasswordCooldown { hours: 24 })
        ));
        assert!(password.check(VALID));

        let later = created + Duration::hours(24);
        password
            .set_password("An0ther!pass", &policy(), later)
            .expect("cooldown elapsed");
        assert!(password.check("An0ther!pass"));
        assert_eq!(password.updated_at, later);
    }

    #[test]
    fn debug_output_redacts_hash() {
        let now = Utc::now();
        let mut password = Password::new(1, now);
        password.set_password(VALID, &policy(), now).expect("set");
        let rendered = format!("{:?}", password);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("$argon2"));
    }
}
