//! Passkey credential model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A registered authenticator.
///
/// `sign_counter` only ever moves forward; an assertion that does not raise it
/// came from a cloned or replayed authenticator.
#[derive(Debug, Clone)]
pub struct PasskeyCredential {
    pub credential_id: String,
    pub member_id: Uuid,
    /// Base64url-encoded public key.
    pub public_key: String,
    pub sign_counter: u32,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
}

impl PasskeyCredential {
    pub fn new(credential_id: String, member_id: Uuid, public_key: String, sign_counter: u32) -> Self {
        Self {
            credential_id,
            member_id,
            public_key,
            sign_counter,
            created_utc: Utc::now(),
            last_used_utc: None,
        }
    }
}

/// Credential listing for the owning member.
#[derive(Debug, Serialize)]
pub struct CredentialInfo {
    pub credential_id: String,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
}

impl From<&PasskeyCredential> for CredentialInfo {
    fn from(c: &PasskeyCredential) -> Self {
        Self {
            credential_id: c.credential_id.clone(),
            created_utc: c.created_utc,
            last_used_utc: c.last_used_utc,
        }
    }
}
