use service_core::error::AppError;
use thiserror::Error;

/// Rule violations a caller can fix by changing their input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("password must be at least {min} characters long")]
    PasswordTooShort { min: usize },

    #[error("password must contain at least one uppercase letter")]
    MissingUppercase,

    #[error("password must contain at least one lowercase letter")]
    MissingLowercase,

    #[error("password must contain at least one digit")]
    MissingDigit,

    #[error("password must contain at least one special character")]
    MissingSpecial,

    #[error("password can be changed only once per {hours} hours")]
    PasswordCooldown { hours: i64 },

    #[error("the number of code resends has been exhausted")]
    CodeResendExhausted,
}

impl PolicyError {
    pub fn field(&self) -> &'static str {
        match self {
            PolicyError::CodeResendExhausted => "code",
            _ => "password",
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unit of work misuse: {0}")]
    UnitOfWork(&'static str),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the lifecycle services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("code has been expired")]
    CodeExpired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Errors surfaced by the orchestrator. Each variant maps to exactly one
/// client-visible outcome; internal detail is logged, never returned.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Account is already activated")]
    AlreadyActivated,

    #[error("Account has been deleted")]
    AccountDeleted,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AuthError::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<PolicyError> for AuthError {
    fn from(err: PolicyError) -> Self {
        AuthError::validation(err.field(), err.to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(anyhow::Error::new(err))
    }
}

impl From<ServiceError> for AuthError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Policy(e) => e.into(),
            ServiceError::CodeExpired => AuthError::validation("code", "code has been expired"),
            ServiceError::InvalidToken => AuthError::InvalidToken,
            ServiceError::NotFound(what) => {
                AuthError::Internal(anyhow::anyhow!("{} not found", what))
            }
            ServiceError::Store(e) => e.into(),
            ServiceError::Internal(e) => AuthError::Internal(e),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation { field, message } => AppError::field(field, message),
            AuthError::InvalidCredentials => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid credentials"))
            }
            AuthError::InvalidToken => AppError::Unauthorized(anyhow::anyhow!("Invalid token")),
            AuthError::AlreadyActivated => {
                AppError::Conflict(anyhow::anyhow!("Account is already activated"))
            }
            AuthError::AccountDeleted => {
                AppError::Forbidden(anyhow::anyhow!("Account has been deleted"))
            }
            AuthError::EmailTaken => AppError::Conflict(anyhow::anyhow!("Email already registered")),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
