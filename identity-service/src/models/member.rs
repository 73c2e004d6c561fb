//! Member model - durable accounts keyed by case-folded email.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::ValidateEmail;

use super::{Role, RoleSet};

/// A trimmed, lowercased, syntactically valid email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let folded = raw.trim().to_lowercase();
        if folded.len() > 254 || !folded.validate_email() {
            return Err("Invalid email address".to_string());
        }
        Ok(Self(folded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Member lifecycle state codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    Active,
    Deactivated,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Active => "active",
            MemberState::Deactivated => "deactivated",
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "active" => MemberState::Active,
            _ => MemberState::Deactivated,
        }
    }
}

/// Member entity.
#[derive(Debug, Clone, Serialize)]
pub struct Member {
    pub member_id: Uuid,
    pub email: EmailAddress,
    pub roles: RoleSet,
    pub state: MemberState,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub deactivated_utc: Option<DateTime<Utc>>,
}

impl Member {
    /// A first-contact member: active, holding only `unverified`.
    pub fn new(email: EmailAddress) -> Self {
        let now = Utc::now();
        Self {
            member_id: Uuid::new_v4(),
            email,
            roles: RoleSet::single(Role::Unverified),
            state: MemberState::Active,
            created_utc: now,
            updated_utc: now,
            deactivated_utc: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == MemberState::Active
    }
}
