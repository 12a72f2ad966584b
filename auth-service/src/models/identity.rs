//! User identities as owned by the user service.

use serde::{Deserialize, Serialize};

use super::kind::UserKind;

/// Display attributes stamped into token claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Profile {
    Applicant {
        first_name: String,
        last_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        patronymic: Option<String>,
    },
    Employer {
        company_name: String,
    },
}

impl Profile {
    pub fn kind(&self) -> UserKind {
        match self {
            Profile::Applicant { .. } => UserKind::Applicant,
            Profile::Employer { .. } => UserKind::Employer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub is_deleted: bool,
    #[serde(flatten)]
    pub profile: Profile,
}

impl Identity {
    pub fn kind(&self) -> UserKind {
        self.profile.kind()
    }
}

/// Payload for creating an identity.
#[derive(Debug, Clone, Serialize)]
pub struct NewIdentity {
    pub email: String,
    #[serde(flatten)]
    pub profile: Profile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_both_kinds_from_flat_json() {
        let applicant: Identity = serde_json::from_value(serde_json::json!({
            "id": 1,
            "email": "a@example.com",
            "is_active": false,
            "is_deleted": false,
            "first_name": "Ivan",
            "last_name": "Petrov"
        }))
        .expect("applicant json");
        assert_eq!(applicant.kind(), UserKind::Applicant);

        let employer: Identity = serde_json::from_value(serde_json::json!({
            "id": 2,
            "email": "hr@example.com",
            "is_active": true,
            "is_deleted": false,
            "company_name": "Acme"
        }))
        .expect("employer json");
        assert_eq!(employer.kind(), UserKind::Employer);
    }
}
