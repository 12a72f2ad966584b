pub mod code;
pub mod identity;
pub mod kind;
pub mod password;
pub mod token;
pub mod version;

pub use code::VerificationCode;
pub use identity::{Identity, NewIdentity, Profile};
pub use kind::{CodePurpose, UserKind};
pub use password::Password;
pub use token::{Token, TokenType};
pub use version::SessionVersion;
