//! Partitions shared by every credential table and cache namespace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two account families. Credentials of one kind are never visible to
/// the other: tables, cache keys and token claims are all partitioned by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Applicant,
    Employer,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Applicant => "applicant",
            UserKind::Employer => "employer",
        }
    }
}

impl fmt::Display for UserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applicant" => Ok(UserKind::Applicant),
            "employer" => Ok(UserKind::Employer),
            _ => Err(format!("Unknown user kind: {}", s)),
        }
    }
}

/// What a verification code unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    Activation,
    ResetPassword,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Activation => "activation",
            CodePurpose::ResetPassword => "reset",
        }
    }
}

impl fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_its_path_segment() {
        for kind in [UserKind::Applicant, UserKind::Employer] {
            assert_eq!(kind.as_str().parse::<UserKind>(), Ok(kind));
        }
        assert!("admin".parse::<UserKind>().is_err());
    }
}
