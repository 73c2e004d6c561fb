//! Storage seam for the identity core.
//!
//! `Database` implements this over Postgres; `MemoryStore` backs tests and
//! local runs without infrastructure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::StoreError;
use crate::models::{
    EmailAddress, Member, PasskeyCredential, RejectionReason, Role, Session, StepResult,
    VerificationRecord,
};

/// Result of applying a commit to a verification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The record was verified and the role granted just now.
    Committed,
    /// The record was already verified; nothing changed.
    AlreadyCommitted,
    /// The record is rejected and can never be committed.
    Rejected,
    /// The step log is empty or holds a failed step; nothing changed.
    Unproven,
    /// The owning member is deactivated; nothing changed.
    MemberInactive,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ===== Members =====

    /// Fails with `Conflict` when the email is already taken.
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError>;
    async fn find_member_by_id(&self, member_id: Uuid) -> Result<Option<Member>, StoreError>;
    async fn find_member_by_email(&self, email: &EmailAddress)
        -> Result<Option<Member>, StoreError>;
    /// Returns false when the member was already deactivated.
    async fn deactivate_member(&self, member_id: Uuid, at: DateTime<Utc>)
        -> Result<bool, StoreError>;
    /// Removes one role. A member left with no roles falls back to `unverified`.
    async fn remove_member_role(&self, member_id: Uuid, role: Role) -> Result<bool, StoreError>;

    // ===== Sessions =====

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn find_session_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError>;
    /// Returns true only if a live session was revoked by this call.
    async fn revoke_session(&self, session_id: Uuid, at: DateTime<Utc>)
        -> Result<bool, StoreError>;
    /// Returns the number of sessions revoked.
    async fn revoke_member_sessions(&self, member_id: Uuid, at: DateTime<Utc>)
        -> Result<u64, StoreError>;

    // ===== Credentials =====

    async fn insert_credential(&self, credential: &PasskeyCredential) -> Result<(), StoreError>;
    async fn find_credential(&self, credential_id: &str)
        -> Result<Option<PasskeyCredential>, StoreError>;
    async fn list_credentials(&self, member_id: Uuid) -> Result<Vec<PasskeyCredential>, StoreError>;
    /// Compare-and-set: moves the counter to `new_counter` only if that is
    /// strictly greater than the stored value.
    async fn advance_sign_counter(
        &self,
        credential_id: &str,
        new_counter: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ===== Verification =====

    /// Fails with `Conflict` when the member already has an active record.
    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), StoreError>;
    async fn find_verification(&self, record_id: Uuid)
        -> Result<Option<VerificationRecord>, StoreError>;
    async fn find_active_verification(&self, member_id: Uuid)
        -> Result<Option<VerificationRecord>, StoreError>;
    /// Newest first.
    async fn list_verifications(&self, member_id: Uuid)
        -> Result<Vec<VerificationRecord>, StoreError>;
    /// Moves a `pending` record to `in_progress`.
    async fn mark_in_progress(&self, record_id: Uuid) -> Result<bool, StoreError>;
    /// Appends to an active record's step log.
    async fn append_step(&self, record_id: Uuid, step: &StepResult) -> Result<(), StoreError>;
    /// Rejects an active record. Returns false when it was already final.
    async fn reject_verification(
        &self,
        record_id: Uuid,
        reason: RejectionReason,
    ) -> Result<bool, StoreError>;
    /// Atomically verifies the record, grants its target role and drops `unverified`.
    async fn commit_verification(&self, record_id: Uuid) -> Result<CommitOutcome, StoreError>;
}
