//! Challenge model - one-time passkey ceremony values.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::EmailAddress;

/// Which ceremony a challenge belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengePurpose {
    Registration,
    Authentication,
    /// Long-lived one-time token letting a privileged member enrol a first device.
    Enrolment,
}

impl ChallengePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengePurpose::Registration => "registration",
            ChallengePurpose::Authentication => "authentication",
            ChallengePurpose::Enrolment => "enrolment",
        }
    }
}

/// A challenge as stored: value plus its validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub value: String,
    pub email: EmailAddress,
    pub purpose: ChallengePurpose,
    pub issued_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl Challenge {
    pub fn new(value: String, email: EmailAddress, purpose: ChallengePurpose, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            value,
            email,
            purpose,
            issued_utc: now,
            expiry_utc: now + ttl,
        }
    }

    /// Storage key; one live challenge per (email, purpose).
    pub fn key_for(email: &EmailAddress, purpose: ChallengePurpose) -> String {
        format!("challenge:{}:{}", purpose.as_str(), email.as_str())
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.email, self.purpose)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }
}
