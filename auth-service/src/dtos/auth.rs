use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{Identity, Profile, UserKind};
use crate::services::error::AuthError;
use crate::utils::sanitize::{trim_in_place, trim_opt_in_place, Sanitize};

/// Registration payload for either kind. Applicants send first/last name
/// (patronymic optional); employers send a company name.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Last name must be 1-100 characters"))]
    pub last_name: Option<String>,

    #[validate(length(min = 1, max = 100, message = "Patronymic must be 1-100 characters"))]
    pub patronymic: Option<String>,

    #[validate(length(min = 1, max = 200, message = "Company name must be 1-200 characters"))]
    pub company_name: Option<String>,
}

impl RegisterRequest {
    /// Builds the profile the user service expects for `kind`.
    pub fn profile(&self, kind: UserKind) -> Result<Profile, AuthError> {
        match kind {
            UserKind::Applicant => Ok(Profile::Applicant {
                first_name: self
                    .first_name
                    .clone()
                    .ok_or_else(|| AuthError::validation("first_name", "First name is required"))?,
                last_name: self
                    .last_name
                    .clone()
                    .ok_or_else(|| AuthError::validation("last_name", "Last name is required"))?,
                patronymic: self.patronymic.clone(),
            }),
            UserKind::Employer => Ok(Profile::Employer {
                company_name: self.company_name.clone().ok_or_else(|| {
                    AuthError::validation("company_name", "Company name is required")
                })?,
            }),
        }
    }
}

impl Sanitize for RegisterRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.email);
        trim_in_place(&mut self.password);
        trim_opt_in_place(&mut self.first_name);
        trim_opt_in_place(&mut self.last_name);
        trim_opt_in_place(&mut self.patronymic);
        trim_opt_in_place(&mut self.company_name);
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    /// The client's current refresh token, rotated instead of minting a new
    /// one when it is still valid.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Sanitize for LoginRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.email);
        trim_in_place(&mut self.password);
        trim_opt_in_place(&mut self.refresh_token);
    }
}

/// Body for refresh and logout. The token may instead arrive in the
/// `x-refresh-token` header.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl Sanitize for RefreshRequest {
    fn sanitize(&mut self) {
        trim_opt_in_place(&mut self.refresh_token);
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ActivateRequest {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,
}

impl Sanitize for ActivateRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.code);
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetCodeRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

impl Sanitize for ResetCodeRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.email);
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

impl Sanitize for ResetPasswordRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.email);
        trim_in_place(&mut self.code);
        trim_in_place(&mut self.new_password);
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Old password is required"))]
    pub old_password: String,

    #[validate(length(min = 1, message = "New password is required"))]
    pub new_password: String,
}

impl Sanitize for ChangePasswordRequest {
    fn sanitize(&mut self) {
        trim_in_place(&mut self.old_password);
        trim_in_place(&mut self.new_password);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub kind: UserKind,
    pub email: String,
    pub is_active: bool,
    #[serde(flatten)]
    pub profile: Profile,
}

impl From<&Identity> for UserResponse {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            kind: identity.kind(),
            email: identity.email.clone(),
            is_active: identity.is_active,
            profile: identity.profile.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(json: serde_json::Value) -> RegisterRequest {
        let mut req: RegisterRequest = serde_json::from_value(json).expect("json");
        req.sanitize();
        req
    }

    #[test]
    fn applicant_profile_requires_names() {
        let req = register(serde_json::json!({
            "email": "a@example.com",
            "password": "Secret#42",
            "first_name": "Ivan"
        }));
        let err = req.profile(UserKind::Applicant).expect_err("last name missing");
        assert!(matches!(err, AuthError::Validation { field: "last_name", .. }));
    }

    #[test]
    fn employer_profile_ignores_applicant_fields() {
        let req = register(serde_json::json!({
            "email": "hr@example.com",
            "password": "Secret#42",
            "first_name": "Ivan",
            "company_name": "  Acme  "
        }));
        assert_eq!(
            req.profile(UserKind::Employer).expect("profile"),
            Profile::Employer {
                company_name: "Acme".to_string()
            }
        );
    }

    #[test]
    fn sanitized_email_validates() {
        let req = register(serde_json::json!({
            "email": "  a@example.com ",
            "password": " Secret#42 ",
            "company_name": "Acme"
        }));
        assert!(req.validate().is_ok());
        assert_eq!(req.password, "Secret#42");
    }

    #[test]
    fn code_must_be_six_characters() {
        let mut req = ActivateRequest {
            code: " 12345 ".to_string(),
        };
        req.sanitize();
        assert!(req.validate().is_err());
    }
}
