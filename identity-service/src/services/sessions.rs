//! Opaque session issuance and resolution.
//!
//! The client holds a random token; only its digest is stored. Every request
//! re-resolves the owning member from storage, so role changes and
//! deactivation take effect on the next request.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use super::audit::AuditService;
use super::error::CoreError;
use super::store::IdentityStore;
use crate::models::{AuditAction, AuditEvent, EmailAddress, Member, RoleSet, Session};
use crate::utils::{generate_token, hash_token, is_well_formed};

/// A trusted identity, produced only by resolving a session token.
///
/// Fields are private and there is no public constructor: handlers can read
/// an identity but never build one from request data.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    member_id: Uuid,
    email: EmailAddress,
    roles: RoleSet,
    session_id: Uuid,
}

impl ResolvedIdentity {
    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    pub fn email(&self) -> &EmailAddress {
        &self.email
    }

    pub fn roles(&self) -> &RoleSet {
        &self.roles
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// A freshly created session; `token` is shown to the client exactly once.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn IdentityStore>,
    audit: AuditService,
    ttl: Duration,
}

impl SessionService {
    pub fn new(store: Arc<dyn IdentityStore>, audit: AuditService, ttl: Duration) -> Self {
        Self { store, audit, ttl }
    }

    #[tracing::instrument(skip(self, member), fields(member_id = %member.member_id))]
    pub async fn create_session(&self, member: &Member) -> Result<IssuedSession, CoreError> {
        if !member.is_active() {
            return Err(CoreError::Unauthenticated);
        }

        let token = generate_token();
        let session = Session::new(member.member_id, hash_token(&token), self.ttl);
        self.store.insert_session(&session).await?;

        self.audit
            .record(
                AuditEvent::member(
                    member.member_id,
                    member.email.as_str(),
                    AuditAction::SessionCreated,
                    true,
                )
                .with_data(serde_json::json!({ "session_id": session.session_id })),
            )
            .await;

        tracing::info!(session_id = %session.session_id, "Session created");
        Ok(IssuedSession { token, session })
    }

    /// Resolve a presented token. Every failure, including storage errors,
    /// resolves to `None`.
    pub async fn resolve_session(&self, token: &str) -> Option<ResolvedIdentity> {
        if !is_well_formed(token) {
            return None;
        }

        let session = match self.store.find_session_by_hash(&hash_token(token)).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(error = %e, "Session lookup failed; treating as anonymous");
                return None;
            }
        };

        if !session.is_usable_at(Utc::now()) {
            return None;
        }

        let member = match self.store.find_member_by_id(session.member_id).await {
            Ok(Some(member)) => member,
            Ok(None) => {
                tracing::warn!(session_id = %session.session_id, "Session owner no longer exists");
                return None;
            }
            Err(e) => {
                tracing::error!(error = %e, "Member lookup failed; treating as anonymous");
                return None;
            }
        };

        if !member.is_active() {
            return None;
        }

        Some(ResolvedIdentity {
            member_id: member.member_id,
            email: member.email,
            roles: member.roles,
            session_id: session.session_id,
        })
    }

    /// Revoke the session behind `token`. Unknown or already revoked tokens are a no-op.
    pub async fn revoke_session(&self, token: &str) -> Result<bool, CoreError> {
        if !is_well_formed(token) {
            return Ok(false);
        }
        let Some(session) = self.store.find_session_by_hash(&hash_token(token)).await? else {
            return Ok(false);
        };

        let revoked = self
            .store
            .revoke_session(session.session_id, Utc::now())
            .await?;
        if revoked {
            let mut event = AuditEvent::anonymous(AuditAction::SessionRevoked, true)
                .with_reason("logout")
                .with_data(serde_json::json!({ "session_id": session.session_id }));
            event.actor_member_id = Some(session.member_id);
            self.audit.record(event).await;
        }
        Ok(revoked)
    }

    /// Revoke every live session of a member.
    pub async fn revoke_member_sessions(
        &self,
        member_id: Uuid,
        reason: &str,
    ) -> Result<u64, CoreError> {
        let count = self
            .store
            .revoke_member_sessions(member_id, Utc::now())
            .await?;
        if count > 0 {
            let mut event = AuditEvent::anonymous(AuditAction::SessionRevoked, true)
                .with_reason(reason)
                .with_data(serde_json::json!({ "revoked": count }));
            event.actor_member_id = Some(member_id);
            event.actor_label = "system".to_string();
            self.audit.record(event).await;
        }
        tracing::info!(member_id = %member_id, count, reason, "Member sessions revoked");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::MemoryAuditSink;
    use crate::services::memory::MemoryStore;

    async fn fixture() -> (Arc<MemoryStore>, SessionService, Member) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(Arc::new(MemoryAuditSink::new()));
        let sessions = SessionService::new(store.clone(), audit, Duration::days(60));
        let member = Member::new(EmailAddress::parse("pat@example.com").unwrap());
        store.insert_member(&member).await.unwrap();
        (store, sessions, member)
    }

    #[tokio::test]
    async fn token_resolves_to_its_member() {
        let (_, sessions, member) = fixture().await;
        let issued = sessions.create_session(&member).await.unwrap();
        let identity = sessions.resolve_session(&issued.token).await.unwrap();
        assert_eq!(identity.member_id(), member.member_id);
        assert_eq!(identity.session_id(), issued.session.session_id);
    }

    #[tokio::test]
    async fn raw_token_is_never_stored() {
        let (store, sessions, member) = fixture().await;
        let issued = sessions.create_session(&member).await.unwrap();
        assert_ne!(issued.session.token_hash_text, issued.token);
        assert!(store.find_session_by_hash(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revocation_is_idempotent() {
        let (_, sessions, member) = fixture().await;
        let issued = sessions.create_session(&member).await.unwrap();
        assert!(sessions.revoke_session(&issued.token).await.unwrap());
        assert!(!sessions.revoke_session(&issued.token).await.unwrap());
        assert!(sessions.resolve_session(&issued.token).await.is_none());
    }

    #[tokio::test]
    async fn expired_session_resolves_to_none() {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditService::new(Arc::new(MemoryAuditSink::new()));
        let sessions = SessionService::new(store.clone(), audit, Duration::seconds(-1));
        let member = Member::new(EmailAddress::parse("old@example.com").unwrap());
        store.insert_member(&member).await.unwrap();

        let issued = sessions.create_session(&member).await.unwrap();
        assert!(sessions.resolve_session(&issued.token).await.is_none());
    }
}
