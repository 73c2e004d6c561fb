//! Passkey registration and authentication ceremonies.
//!
//! Signature checking sits behind [`PasskeyVerifier`]; the shipped verifier
//! handles raw Ed25519 keys. Challenge single-use and counter monotonicity
//! are enforced here regardless of the verifier.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Serialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

use super::audit::AuditService;
use super::challenge::{check_counter, ChallengeService};
use super::error::{CoreError, StoreError};
use super::members::MemberService;
use super::sessions::{IssuedSession, ResolvedIdentity, SessionService};
use super::store::IdentityStore;
use crate::models::{
    AuditAction, AuditEvent, ChallengePurpose, EmailAddress, Member, PasskeyCredential, Role,
};

#[derive(Debug, Error)]
pub enum PasskeyError {
    #[error("Malformed public key")]
    InvalidKey,
    #[error("Malformed signature")]
    InvalidSignature,
    #[error("Signature does not verify")]
    VerificationFailed,
}

/// Proof-of-possession checks for authenticator signatures.
pub trait PasskeyVerifier: Send + Sync {
    fn verify_registration(
        &self,
        public_key: &str,
        challenge: &str,
        signature: &str,
    ) -> Result<(), PasskeyError>;

    fn verify_assertion(
        &self,
        public_key: &str,
        challenge: &str,
        counter: u32,
        signature: &str,
    ) -> Result<(), PasskeyError>;
}

/// Bytes an authenticator signs when enrolling.
pub fn registration_message(challenge: &str) -> Vec<u8> {
    let mut message = challenge.as_bytes().to_vec();
    message.extend_from_slice(b":register");
    message
}

/// Bytes an authenticator signs when asserting.
pub fn assertion_message(challenge: &str, counter: u32) -> Vec<u8> {
    let mut message = challenge.as_bytes().to_vec();
    message.push(b':');
    message.extend_from_slice(&counter.to_be_bytes());
    message
}

/// Raw Ed25519 keys and signatures, base64url encoded.
#[derive(Debug, Default, Clone)]
pub struct Ed25519PasskeyVerifier;

impl Ed25519PasskeyVerifier {
    fn verify(&self, public_key: &str, message: &[u8], signature: &str) -> Result<(), PasskeyError> {
        let key_bytes: [u8; 32] = URL_SAFE_NO_PAD
            .decode(public_key)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(PasskeyError::InvalidKey)?;
        let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| PasskeyError::InvalidKey)?;

        let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or(PasskeyError::InvalidSignature)?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify_strict(message, &signature)
            .map_err(|_| PasskeyError::VerificationFailed)
    }
}

impl PasskeyVerifier for Ed25519PasskeyVerifier {
    fn verify_registration(
        &self,
        public_key: &str,
        challenge: &str,
        signature: &str,
    ) -> Result<(), PasskeyError> {
        self.verify(public_key, &registration_message(challenge), signature)
    }

    fn verify_assertion(
        &self,
        public_key: &str,
        challenge: &str,
        counter: u32,
        signature: &str,
    ) -> Result<(), PasskeyError> {
        self.verify(public_key, &assertion_message(challenge, counter), signature)
    }
}

/// Options returned when a ceremony begins.
#[derive(Debug, Serialize)]
pub struct CeremonyOptions {
    pub challenge: String,
    pub timeout_seconds: i64,
    /// Credentials the member may answer with; empty for registration.
    pub allow_credentials: Vec<String>,
}

/// A new authenticator presented at the end of registration.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub challenge: String,
    pub credential_id: String,
    pub public_key: String,
    pub signature: String,
    /// Required to enrol the first device of a member who already holds a
    /// role beyond `unverified`.
    pub enrolment_token: Option<String>,
}

/// A signed assertion presented at the end of authentication.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub challenge: String,
    pub credential_id: String,
    pub counter: u32,
    pub signature: String,
}

/// Who may enrol a device for a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enrolment {
    /// Credential-less member holding only `unverified`.
    Open,
    /// The member themselves, signed in.
    SignedIn,
    /// Credential-less member holding a granted role; needs an enrolment token.
    TokenRequired,
}

#[derive(Clone)]
pub struct PasskeyService {
    store: Arc<dyn IdentityStore>,
    members: MemberService,
    sessions: SessionService,
    challenges: ChallengeService,
    verifier: Arc<dyn PasskeyVerifier>,
    audit: AuditService,
}

fn matches_issued(presented: &str, issued: &str) -> bool {
    presented.as_bytes().ct_eq(issued.as_bytes()).into()
}

impl PasskeyService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        members: MemberService,
        sessions: SessionService,
        challenges: ChallengeService,
        verifier: Arc<dyn PasskeyVerifier>,
        audit: AuditService,
    ) -> Self {
        Self {
            store,
            members,
            sessions,
            challenges,
            verifier,
            audit,
        }
    }

    /// First-device enrolment is open only while the member holds nothing
    /// beyond `unverified`. A member with a granted role enrols the first
    /// device with an enrolment token; further devices need their session.
    async fn check_enrolment(
        &self,
        member: &Member,
        caller: Option<&ResolvedIdentity>,
    ) -> Result<Enrolment, CoreError> {
        if !member.is_active() {
            return Err(CoreError::Unauthenticated);
        }
        if caller.map(|c| c.member_id()) == Some(member.member_id) {
            return Ok(Enrolment::SignedIn);
        }
        if !self.store.list_credentials(member.member_id).await?.is_empty() {
            return Err(CoreError::Unauthenticated);
        }
        if member.roles.iter().all(|r| r == Role::Unverified) {
            Ok(Enrolment::Open)
        } else {
            Ok(Enrolment::TokenRequired)
        }
    }

    /// Consume the member's enrolment token and compare it to the presented one.
    async fn redeem_enrolment_token(
        &self,
        email: &EmailAddress,
        presented: Option<&str>,
    ) -> Result<(), CoreError> {
        let Some(presented) = presented else {
            self.reject_ceremony(email, "enrolment_token_required").await;
            return Err(CoreError::Unauthenticated);
        };
        let issued = match self
            .challenges
            .consume_challenge(email, ChallengePurpose::Enrolment)
            .await
        {
            Ok(issued) => issued,
            Err(CoreError::ChallengeExpiredOrConsumed) => {
                self.reject_ceremony(email, "enrolment_token_expired").await;
                return Err(CoreError::Unauthenticated);
            }
            Err(e) => return Err(e),
        };
        if !matches_issued(presented, &issued) {
            self.reject_ceremony(email, "enrolment_token_mismatch").await;
            return Err(CoreError::Unauthenticated);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, caller))]
    pub async fn begin_registration(
        &self,
        email: &EmailAddress,
        caller: Option<&ResolvedIdentity>,
    ) -> Result<CeremonyOptions, CoreError> {
        let member = self.members.ensure_member(email).await?;
        self.check_enrolment(&member, caller).await?;

        let challenge = self
            .challenges
            .issue_challenge(email, ChallengePurpose::Registration)
            .await?;
        Ok(CeremonyOptions {
            challenge: challenge.value,
            timeout_seconds: self.challenges.ttl().num_seconds(),
            allow_credentials: Vec::new(),
        })
    }

    #[tracing::instrument(skip(self, caller, credential), fields(credential_id = %credential.credential_id))]
    pub async fn finish_registration(
        &self,
        email: &EmailAddress,
        credential: NewCredential,
        caller: Option<&ResolvedIdentity>,
    ) -> Result<IssuedSession, CoreError> {
        let issued = self
            .challenges
            .consume_challenge(email, ChallengePurpose::Registration)
            .await?;
        if !matches_issued(&credential.challenge, &issued) {
            self.reject_ceremony(email, "challenge_mismatch").await;
            return Err(CoreError::ChallengeExpiredOrConsumed);
        }

        let member = self
            .members
            .find_by_email(email)
            .await?
            .ok_or(CoreError::Unauthenticated)?;
        let enrolment = self.check_enrolment(&member, caller).await?;

        if let Err(e) = self.verifier.verify_registration(
            &credential.public_key,
            &issued,
            &credential.signature,
        ) {
            tracing::warn!(error = %e, "Registration proof rejected");
            self.reject_ceremony(email, "invalid_registration_proof").await;
            return Err(CoreError::Unauthenticated);
        }
        if enrolment == Enrolment::TokenRequired {
            self.redeem_enrolment_token(email, credential.enrolment_token.as_deref())
                .await?;
        }

        let stored = PasskeyCredential::new(
            credential.credential_id,
            member.member_id,
            credential.public_key,
            0,
        );
        match self.store.insert_credential(&stored).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(CoreError::InvalidRequest(
                    "Credential is already registered".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        self.audit
            .record(
                AuditEvent::member(
                    member.member_id,
                    member.email.as_str(),
                    AuditAction::PasskeyRegistered,
                    true,
                )
                .with_data(serde_json::json!({ "credential_id": stored.credential_id })),
            )
            .await;

        self.sessions.create_session(&member).await
    }

    /// Unknown emails still get a challenge, so the response does not reveal
    /// whether an account exists.
    #[tracing::instrument(skip(self))]
    pub async fn begin_authentication(
        &self,
        email: &EmailAddress,
    ) -> Result<CeremonyOptions, CoreError> {
        let allow_credentials = match self.members.find_by_email(email).await? {
            Some(member) if member.is_active() => self
                .store
                .list_credentials(member.member_id)
                .await?
                .into_iter()
                .map(|c| c.credential_id)
                .collect(),
            _ => Vec::new(),
        };

        let challenge = self
            .challenges
            .issue_challenge(email, ChallengePurpose::Authentication)
            .await?;
        Ok(CeremonyOptions {
            challenge: challenge.value,
            timeout_seconds: self.challenges.ttl().num_seconds(),
            allow_credentials,
        })
    }

    #[tracing::instrument(skip(self, assertion), fields(credential_id = %assertion.credential_id))]
    pub async fn finish_authentication(
        &self,
        email: &EmailAddress,
        assertion: Assertion,
    ) -> Result<IssuedSession, CoreError> {
        let issued = self
            .challenges
            .consume_challenge(email, ChallengePurpose::Authentication)
            .await?;
        if !matches_issued(&assertion.challenge, &issued) {
            self.reject_ceremony(email, "challenge_mismatch").await;
            return Err(CoreError::ChallengeExpiredOrConsumed);
        }

        let member = self
            .members
            .find_by_email(email)
            .await?
            .filter(Member::is_active)
            .ok_or(CoreError::Unauthenticated)?;
        let credential = self
            .store
            .find_credential(&assertion.credential_id)
            .await?
            .filter(|c| c.member_id == member.member_id)
            .ok_or(CoreError::Unauthenticated)?;

        if let Err(e) = self.verifier.verify_assertion(
            &credential.public_key,
            &issued,
            assertion.counter,
            &assertion.signature,
        ) {
            tracing::warn!(error = %e, "Assertion rejected");
            self.reject_ceremony(email, "invalid_assertion").await;
            return Err(CoreError::Unauthenticated);
        }

        if check_counter(credential.sign_counter, assertion.counter).is_err() {
            return Err(self
                .replay_detected(&member, &credential, assertion.counter)
                .await);
        }
        let advanced = self
            .store
            .advance_sign_counter(&credential.credential_id, assertion.counter, Utc::now())
            .await?;
        if !advanced {
            // A concurrent ceremony moved the counter first.
            return Err(self
                .replay_detected(&member, &credential, assertion.counter)
                .await);
        }

        self.sessions.create_session(&member).await
    }

    async fn replay_detected(
        &self,
        member: &Member,
        credential: &PasskeyCredential,
        presented: u32,
    ) -> CoreError {
        metrics::counter!("passkey_replays_total").increment(1);
        self.audit
            .record(
                AuditEvent::member(
                    member.member_id,
                    member.email.as_str(),
                    AuditAction::CounterReplayDetected,
                    false,
                )
                .with_reason("counter_not_advanced")
                .with_data(serde_json::json!({
                    "credential_id": credential.credential_id,
                    "stored_counter": credential.sign_counter,
                    "presented_counter": presented,
                })),
            )
            .await;

        if let Err(e) = self
            .sessions
            .revoke_member_sessions(member.member_id, "counter_replay")
            .await
        {
            tracing::error!(error = %e, member_id = %member.member_id, "Failed to revoke sessions after replay");
        }
        CoreError::ReplayDetected
    }

    async fn reject_ceremony(&self, email: &EmailAddress, reason: &str) {
        let mut event = AuditEvent::anonymous(AuditAction::ChallengeRejected, false).with_reason(reason);
        event.actor_label = email.as_str().to_string();
        self.audit.record(event).await;
    }

    /// Credentials registered by a member, oldest first.
    pub async fn credentials_of(&self, member_id: Uuid) -> Result<Vec<PasskeyCredential>, CoreError> {
        Ok(self.store.list_credentials(member_id).await?)
    }
}
