//! Session model - one authenticated device or browser context.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity. Only the token digest is stored, never the token.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub member_id: Uuid,
    pub token_hash_text: String,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(member_id: Uuid, token_hash: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            member_id,
            token_hash_text: token_hash,
            created_utc: now,
            expiry_utc: now + ttl,
            revoked_utc: None,
        }
    }

    /// Not expired and not revoked at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }
}

/// Session metadata safe to show the owning member.
#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub created_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
}

impl From<&Session> for SessionInfo {
    fn from(s: &Session) -> Self {
        Self {
            session_id: s.session_id,
            created_utc: s.created_utc,
            expiry_utc: s.expiry_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usability_tracks_expiry_and_revocation() {
        let mut session = Session::new(Uuid::new_v4(), "h".into(), Duration::minutes(5));
        let now = Utc::now();
        assert!(session.is_usable_at(now));
        assert!(!session.is_usable_at(now + Duration::minutes(10)));

        session.revoked_utc = Some(now);
        assert!(!session.is_usable_at(now));
    }
}
