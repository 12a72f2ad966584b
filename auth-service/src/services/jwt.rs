use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{JwtConfig, TokenPolicy};
use crate::models::{Identity, Profile, TokenType, UserKind};
use crate::services::error::ServiceError;

/// Claims carried by both token types. Access and refresh tokens differ only
/// in lifetime and signing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    pub kind: UserKind,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patronymic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    /// Session version the token was minted under.
    pub ver: i32,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, ServiceError> {
        self.sub.parse().map_err(|_| ServiceError::InvalidToken)
    }
}

/// HS256 signer/verifier with one key pair per token type.
#[derive(Clone)]
pub struct JwtService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    policy: TokenPolicy,
}

impl JwtService {
    pub fn new(config: &JwtConfig, policy: TokenPolicy) -> Self {
        let access = config.access_secret.expose_secret().as_bytes();
        let refresh = config.refresh_secret.expose_secret().as_bytes();

        Self {
            access_encoding: EncodingKey::from_secret(access),
            access_decoding: DecodingKey::from_secret(access),
            refresh_encoding: EncodingKey::from_secret(refresh),
            refresh_decoding: DecodingKey::from_secret(refresh),
            policy,
        }
    }

    /// Signs a token for `identity` and returns it with its expiry.
    pub fn issue(
        &self,
        identity: &Identity,
        version: i32,
        token_type: TokenType,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), ServiceError> {
        let ttl = match token_type {
            TokenType::Access => self.policy.access_ttl,
            TokenType::Refresh => self.policy.refresh_ttl,
        };
        let expires_at = now + ttl;

        let (first_name, last_name, patronymic, company_name) = match &identity.profile {
            Profile::Applicant {
                first_name,
                last_name,
                patronymic,
            } => (
                Some(first_name.clone()),
                Some(last_name.clone()),
                patronymic.clone(),
                None,
            ),
            Profile::Employer { company_name } => (None, None, None, Some(company_name.clone())),
        };

        let claims = Claims {
            sub: identity.id.to_string(),
            kind: identity.kind(),
            email: identity.email.clone(),
            first_name,
            last_name,
            patronymic,
            company_name,
            is_active: identity.is_active,
            is_deleted: identity.is_deleted,
            ver: version,
            iat: now.timestamp(),
            nbf: (now - self.policy.clock_skew).timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let key = match token_type {
            TokenType::Access => &self.access_encoding,
            TokenType::Refresh => &self.refresh_encoding,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {:?} token: {}", token_type, e))?;

        Ok((token, expires_at))
    }

    /// Verifies signature, expiry and not-before.
    pub fn decode(&self, token: &str, token_type: TokenType) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_nbf = true;
        self.decode_with(token, token_type, &validation)
    }

    /// Verifies the signature only. Used to locate a token the caller wants
    /// gone even if it has already expired.
    pub fn decode_ignoring_expiry(
        &self,
        token: &str,
        token_type: TokenType,
    ) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        self.decode_with(token, token_type, &validation)
    }

    fn decode_with(
        &self,
        token: &str,
        token_type: TokenType,
        validation: &Validation,
    ) -> Result<Claims, ServiceError> {
        let key = match token_type {
            TokenType::Access => &self.access_decoding,
            TokenType::Refresh => &self.refresh_decoding,
        };
        decode::<Claims>(token, key, validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, token_type = ?token_type, "Token rejected");
                ServiceError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use chrono::Duration;
    use secrecy::Secret;

    fn service() -> JwtService {
        JwtService::new(&AuthConfig::local().jwt, TokenPolicy::default())
    }

    fn applicant() -> Identity {
        Identity {
            id: 17,
            email: "anna@example.com".to_string(),
            is_active: false,
            is_deleted: false,
            profile: Profile::Applicant {
                first_name: "Anna".to_string(),
                last_name: "Ivanova".to_string(),
                patronymic: Some("Sergeevna".to_string()),
            },
        }
    }

    #[test]
    fn test_issue_and_decode_access_token() -> Result<(), anyhow::Error> {
        let jwt = service();
        let now = Utc::now();
        let (token, expires_at) = jwt.issue(&applicant(), 3, TokenType::Access, now)?;
        assert_eq!(expires_at, now + Duration::minutes(15));

        let claims = jwt.decode(&token, TokenType::Access)?;
        assert_eq!(claims.user_id()?, 17);
        assert_eq!(claims.kind, UserKind::Applicant);
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.patronymic.as_deref(), Some("Sergeevna"));
        assert!(claims.company_name.is_none());
        assert_eq!(claims.nbf, claims.iat - 10);
        Ok(())
    }

    #[test]
    fn test_token_types_do_not_cross_verify() -> Result<(), anyhow::Error> {
        let jwt = service();
        let (access, _) = jwt.issue(&applicant(), 1, TokenType::Access, Utc::now())?;
        let (refresh, _) = jwt.issue(&applicant(), 1, TokenType::Refresh, Utc::now())?;

        assert!(matches!(
            jwt.decode(&access, TokenType::Refresh),
            Err(ServiceError::InvalidToken)
        ));
        assert!(matches!(
            jwt.decode(&refresh, TokenType::Access),
            Err(ServiceError::InvalidToken)
        ));
        Ok(())
    }

    #[test]
    fn test_expired_token_is_rejected_but_still_locatable() -> Result<(), anyhow::Error> {
        let jwt = service();
        let issued = Utc::now() - Duration::days(2);
        let (refresh, _) = jwt.issue(&applicant(), 1, TokenType::Refresh, issued)?;

        assert!(jwt.decode(&refresh, TokenType::Refresh).is_err());
        let claims = jwt.decode_ignoring_expiry(&refresh, TokenType::Refresh)?;
        assert_eq!(claims.user_id()?, 17);
        Ok(())
    }

    #[test]
    fn test_token_from_the_future_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = service();
        let (access, _) = jwt.issue(
            &applicant(),
            1,
            TokenType::Access,
            Utc::now() + Duration::minutes(5),
        )?;
        assert!(jwt.decode(&access, TokenType::Access).is_err());
        Ok(())
    }

    #[test]
    fn test_foreign_secret_is_rejected() -> Result<(), anyhow::Error> {
        let jwt = service();
        let other = JwtService::new(
            &JwtConfig {
                access_secret: Secret::new("someone-else".to_string()),
                refresh_secret: Secret::new("someone-else-too".to_string()),
            },
            TokenPolicy::default(),
        );
        let (access, _) = other.issue(&applicant(), 1, TokenType::Access, Utc::now())?;
        assert!(jwt.decode(&access, TokenType::Access).is_err());
        Ok(())
    }

    #[test]
    fn test_tokens_are_unique_per_issue() -> Result<(), anyhow::Error> {
        let jwt = service();
        let now = Utc::now();
        let (a, _) = jwt.issue(&applicant(), 1, TokenType::Refresh, now)?;
        let (b, _) = jwt.issue(&applicant(), 1, TokenType::Refresh, now)?;
        assert_ne!(a, b);
        Ok(())
    }
}
