//! In-process `IdentityStore` for tests and local runs.
//!
//! One mutex guards all state, so every operation is a serialization point;
//! this is what stands in for Postgres' unique indexes and transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::error::StoreError;
use super::store::{CommitOutcome, IdentityStore};
use crate::models::{
    EmailAddress, Member, MemberState, PasskeyCredential, RejectionReason, Role, Session,
    StepResult, VerificationRecord, VerificationStatus,
};

#[derive(Default)]
struct Inner {
    members: HashMap<Uuid, Member>,
    member_emails: HashMap<String, Uuid>,
    sessions: HashMap<Uuid, Session>,
    session_hashes: HashMap<String, Uuid>,
    credentials: HashMap<String, PasskeyCredential>,
    verifications: HashMap<Uuid, VerificationRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a backend error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "memory store marked unavailable"
            )));
        }
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

fn not_found(what: &str) -> StoreError {
    StoreError::NotFound(what.to_string())
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.member_emails.contains_key(member.email.as_str()) {
            return Err(StoreError::Conflict("members_email_key".to_string()));
        }
        inner
            .member_emails
            .insert(member.email.as_str().to_string(), member.member_id);
        inner.members.insert(member.member_id, member.clone());
        Ok(())
    }

    async fn find_member_by_id(&self, member_id: Uuid) -> Result<Option<Member>, StoreError> {
        Ok(self.lock()?.members.get(&member_id).cloned())
    }

    async fn find_member_by_email(
        &self,
        email: &EmailAddress,
    ) -> Result<Option<Member>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .member_emails
            .get(email.as_str())
            .and_then(|id| inner.members.get(id))
            .cloned())
    }

    async fn deactivate_member(
        &self,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let member = inner
            .members
            .get_mut(&member_id)
            .ok_or_else(|| not_found("member"))?;
        if !member.is_active() {
            return Ok(false);
        }
        member.state = MemberState::Deactivated;
        member.deactivated_utc = Some(at);
        member.updated_utc = at;
        Ok(true)
    }

    async fn remove_member_role(&self, member_id: Uuid, role: Role) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let member = inner
            .members
            .get_mut(&member_id)
            .ok_or_else(|| not_found("member"))?;
        let removed = member.roles.remove(role);
        if member.roles.is_empty() {
            member.roles.insert(Role::Unverified);
        }
        if removed {
            member.updated_utc = Utc::now();
        }
        Ok(removed)
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.session_hashes.contains_key(&session.token_hash_text) {
            return Err(StoreError::Conflict("sessions_token_hash_key".to_string()));
        }
        inner
            .session_hashes
            .insert(session.token_hash_text.clone(), session.session_id);
        inner.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    async fn find_session_by_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .session_hashes
            .get(token_hash)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.sessions.get_mut(&session_id) {
            Some(session) if session.revoked_utc.is_none() => {
                session.revoked_utc = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_member_sessions(
        &self,
        member_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        let mut count = 0;
        for session in inner.sessions.values_mut() {
            if session.member_id == member_id && session.revoked_utc.is_none() {
                session.revoked_utc = Some(at);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn insert_credential(&self, credential: &PasskeyCredential) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.credentials.contains_key(&credential.credential_id) {
            return Err(StoreError::Conflict(
                "passkey_credentials_pkey".to_string(),
            ));
        }
        inner
            .credentials
            .insert(credential.credential_id.clone(), credential.clone());
        Ok(())
    }

    async fn find_credential(
        &self,
        credential_id: &str,
    ) -> Result<Option<PasskeyCredential>, StoreError> {
        Ok(self.lock()?.credentials.get(credential_id).cloned())
    }

    async fn list_credentials(&self, member_id: Uuid) -> Result<Vec<PasskeyCredential>, StoreError> {
        let inner = self.lock()?;
        let mut creds: Vec<PasskeyCredential> = inner
            .credentials
            .values()
            .filter(|c| c.member_id == member_id)
            .cloned()
            .collect();
        creds.sort_by_key(|c| c.created_utc);
        Ok(creds)
    }

    async fn advance_sign_counter(
        &self,
        credential_id: &str,
        new_counter: u32,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        match inner.credentials.get_mut(credential_id) {
            Some(cred) if cred.sign_counter < new_counter => {
                cred.sign_counter = new_counter;
                cred.last_used_utc = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(not_found("credential")),
        }
    }

    async fn insert_verification(&self, record: &VerificationRecord) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let active = inner
            .verifications
            .values()
            .any(|r| r.member_id == record.member_id && r.status.is_active());
        if active && record.status.is_active() {
            return Err(StoreError::Conflict(
                "verification_records_one_active".to_string(),
            ));
        }
        inner.verifications.insert(record.record_id, record.clone());
        Ok(())
    }

    async fn find_verification(
        &self,
        record_id: Uuid,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        Ok(self.lock()?.verifications.get(&record_id).cloned())
    }

    async fn find_active_verification(
        &self,
        member_id: Uuid,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        Ok(self
            .lock()?
            .verifications
            .values()
            .find(|r| r.member_id == member_id && r.status.is_active())
            .cloned())
    }

    async fn list_verifications(
        &self,
        member_id: Uuid,
    ) -> Result<Vec<VerificationRecord>, StoreError> {
        let inner = self.lock()?;
        let mut records: Vec<VerificationRecord> = inner
            .verifications
            .values()
            .filter(|r| r.member_id == member_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_utc.cmp(&a.created_utc));
        Ok(records)
    }

    async fn mark_in_progress(&self, record_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .verifications
            .get_mut(&record_id)
            .ok_or_else(|| not_found("verification record"))?;
        if record.status != VerificationStatus::Pending {
            return Ok(false);
        }
        record.status = VerificationStatus::InProgress;
        record.updated_utc = Utc::now();
        Ok(true)
    }

    async fn append_step(&self, record_id: Uuid, step: &StepResult) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .verifications
            .get_mut(&record_id)
            .ok_or_else(|| not_found("verification record"))?;
        if record.status.is_final() {
            return Err(StoreError::Conflict("verification record is final".to_string()));
        }
        record.steps.push(step.clone());
        record.updated_utc = Utc::now();
        Ok(())
    }

    async fn reject_verification(
        &self,
        record_id: Uuid,
        reason: RejectionReason,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let record = inner
            .verifications
            .get_mut(&record_id)
            .ok_or_else(|| not_found("verification record"))?;
        if record.status.is_final() {
            return Ok(false);
        }
        let now = Utc::now();
        record.status = VerificationStatus::Rejected;
        record.rejection_reason = Some(reason);
        record.updated_utc = now;
        record.finalized_utc = Some(now);
        Ok(true)
    }

    async fn commit_verification(&self, record_id: Uuid) -> Result<CommitOutcome, StoreError> {
        let mut inner = self.lock()?;
        let (member_id, role) = {
            let record = inner
                .verifications
                .get(&record_id)
                .ok_or_else(|| not_found("verification record"))?;
            match record.status {
                VerificationStatus::Verified => return Ok(CommitOutcome::AlreadyCommitted),
                VerificationStatus::Rejected => return Ok(CommitOutcome::Rejected),
                _ => {}
            }
            if record.steps.is_empty() || record.steps.iter().any(|s| !s.verified) {
                return Ok(CommitOutcome::Unproven);
            }
            (record.member_id, record.target_role)
        };
        match inner.members.get(&member_id) {
            None => return Err(not_found("member")),
            Some(member) if !member.is_active() => return Ok(CommitOutcome::MemberInactive),
            Some(_) => {}
        }

        let now = Utc::now();
        if let Some(member) = inner.members.get_mut(&member_id) {
            member.roles.insert(role);
            member.roles.remove(Role::Unverified);
            member.updated_utc = now;
        }
        if let Some(record) = inner.verifications.get_mut(&record_id) {
            record.status = VerificationStatus::Verified;
            record.updated_utc = now;
            record.finalized_utc = Some(now);
        }
        Ok(CommitOutcome::Committed)
    }
}
