pub mod password;
pub mod sanitize;
pub mod validation;

pub use password::{hash_password, verify_password, PasswordHashString, RawPassword};
pub use sanitize::Sanitize;
pub use validation::ValidatedJson;
