//! Member lifecycle: first contact, deactivation and role revocation.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::audit::AuditService;
use super::error::{CoreError, StoreError};
use super::sessions::{ResolvedIdentity, SessionService};
use super::store::IdentityStore;
use crate::models::{AuditAction, AuditEvent, EmailAddress, Member, Role};

#[derive(Clone)]
pub struct MemberService {
    store: Arc<dyn IdentityStore>,
    sessions: SessionService,
    audit: AuditService,
}

impl MemberService {
    pub fn new(store: Arc<dyn IdentityStore>, sessions: SessionService, audit: AuditService) -> Self {
        Self {
            store,
            sessions,
            audit,
        }
    }

    pub async fn find(&self, member_id: Uuid) -> Result<Option<Member>, CoreError> {
        Ok(self.store.find_member_by_id(member_id).await?)
    }

    pub async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<Member>, CoreError> {
        Ok(self.store.find_member_by_email(email).await?)
    }

    /// Fetch the member for `email`, creating an `unverified` one on first contact.
    ///
    /// Two concurrent first contacts race on the unique email index; the
    /// loser re-reads the winner's row.
    pub async fn ensure_member(&self, email: &EmailAddress) -> Result<Member, CoreError> {
        if let Some(member) = self.store.find_member_by_email(email).await? {
            return Ok(member);
        }

        let member = Member::new(email.clone());
        match self.store.insert_member(&member).await {
            Ok(()) => {
                tracing::info!(member_id = %member.member_id, "Member created");
                Ok(member)
            }
            Err(StoreError::Conflict(_)) => self
                .store
                .find_member_by_email(email)
                .await?
                .ok_or_else(|| CoreError::NotFound("member".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Deactivate a member and revoke all of their sessions.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.member_id()))]
    pub async fn deactivate(&self, actor: &ResolvedIdentity, member_id: Uuid) -> Result<bool, CoreError> {
        let changed = self.store.deactivate_member(member_id, Utc::now()).await?;
        self.sessions
            .revoke_member_sessions(member_id, "member_deactivated")
            .await?;

        if changed {
            self.audit
                .record(
                    AuditEvent::member(
                        actor.member_id(),
                        actor.email().as_str(),
                        AuditAction::MemberDeactivated,
                        true,
                    )
                    .with_data(serde_json::json!({ "member_id": member_id })),
                )
                .await;
        }
        Ok(changed)
    }

    /// Remove one role. Sessions stay valid; the next resolution sees the new role set.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.member_id()))]
    pub async fn revoke_role(
        &self,
        actor: &ResolvedIdentity,
        member_id: Uuid,
        role: Role,
    ) -> Result<bool, CoreError> {
        if role == Role::Unverified {
            return Err(CoreError::InvalidRequest(
                "The unverified role cannot be revoked".to_string(),
            ));
        }

        let removed = self.store.remove_member_role(member_id, role).await?;
        if removed {
            self.audit
                .record(
                    AuditEvent::member(
                        actor.member_id(),
                        actor.email().as_str(),
                        AuditAction::RoleRevoked,
                        true,
                    )
                    .with_data(serde_json::json!({ "member_id": member_id, "role": role })),
                )
                .await;
        }
        Ok(removed)
    }
}
