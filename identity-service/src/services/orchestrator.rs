//! Verification state machine.
//!
//! ```text
//! pending -> in_progress -> (stages) -> verified (commit) | rejected
//! ```
//!
//! Each step result is appended to the record before it is evaluated, so a
//! crash mid-run leaves an accurate log. The only way to gain a role is the
//! commit, which verifies the record and updates the member's roles in one
//! transaction.

use backoff::{future::retry, ExponentialBackoffBuilder};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::agents::{AgentError, AgentRegistry, AgentRequest};
use super::audit::AuditService;
use super::challenge::ChallengeService;
use super::error::{CoreError, StoreError};
use super::members::MemberService;
use super::sessions::ResolvedIdentity;
use super::step_plan::{StepDescriptor, StepPlan};
use super::store::{CommitOutcome, IdentityStore};
use crate::config::{Environment, IdentityConfig, VerificationConfig};
use crate::models::{
    AuditAction, AuditEvent, ChallengePurpose, EmailAddress, Member, RecordOrigin, RejectionReason, Role, StepResult,
    VerificationRecord,
};

/// Proof that the development bypass is enabled. Only obtainable from a dev
/// configuration with the bypass flag set.
#[derive(Debug, Clone)]
pub struct DevBypass {
    _private: (),
}

impl DevBypass {
    pub fn from_config(config: &IdentityConfig) -> Option<Self> {
        if config.environment == Environment::Dev && config.verification.allow_dev_bypass {
            tracing::warn!("Development verification bypass is ENABLED");
            Some(Self { _private: () })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub step_timeout: Duration,
    pub retry_initial_interval: Duration,
    pub retry_max_elapsed: Duration,
    pub abandonment_window: chrono::Duration,
}

impl From<&VerificationConfig> for OrchestratorSettings {
    fn from(config: &VerificationConfig) -> Self {
        Self {
            step_timeout: Duration::from_millis(config.step_timeout_ms),
            retry_initial_interval: Duration::from_millis(config.retry_initial_interval_ms),
            retry_max_elapsed: Duration::from_millis(config.retry_max_elapsed_ms),
            abandonment_window: chrono::Duration::minutes(config.abandonment_minutes),
        }
    }
}

/// A role granted on an operator's authority. A member without a passkey gets
/// a one-time enrolment token; it is the only way to enrol their first device.
#[derive(Debug, Clone)]
pub struct RoleGrant {
    pub record: VerificationRecord,
    pub enrolment_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct AdminSeedReport {
    pub granted: usize,
    /// Seeded admins with no passkey yet, each with a fresh enrolment token.
    pub pending_enrolment: Vec<(EmailAddress, String)>,
}

#[derive(Clone)]
pub struct VerificationOrchestrator {
    store: Arc<dyn IdentityStore>,
    members: MemberService,
    agents: AgentRegistry,
    challenges: ChallengeService,
    audit: AuditService,
    settings: OrchestratorSettings,
    plans: HashMap<Role, StepPlan>,
}

impl VerificationOrchestrator {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        members: MemberService,
        agents: AgentRegistry,
        challenges: ChallengeService,
        audit: AuditService,
        settings: OrchestratorSettings,
    ) -> Self {
        let plans = Role::ALL
            .into_iter()
            .filter_map(|role| StepPlan::for_role(role).map(|plan| (role, plan)))
            .collect();
        Self {
            store,
            members,
            agents,
            challenges,
            audit,
            settings,
            plans,
        }
    }

    /// Replace the plan for one role.
    pub fn with_plan(mut self, role: Role, plan: StepPlan) -> Self {
        self.plans.insert(role, plan);
        self
    }

    /// Run the full pipeline for `target` and commit on success.
    #[tracing::instrument(skip(self, identity, input, request_id), fields(member_id = %identity.member_id(), target = %target))]
    pub async fn start(
        &self,
        identity: &ResolvedIdentity,
        target: Role,
        input: serde_json::Value,
        request_id: Option<String>,
    ) -> Result<VerificationRecord, CoreError> {
        let plan = self
            .plans
            .get(&target)
            .filter(|_| target.is_requestable())
            .cloned()
            .ok_or_else(|| {
                CoreError::InvalidRequest(format!("The {} role cannot be requested", target))
            })?;
        if identity.roles().contains(target) {
            return Err(CoreError::InvalidRequest(format!(
                "The {} role is already held",
                target
            )));
        }

        let record = VerificationRecord::new(identity.member_id(), target, RecordOrigin::Request, input);
        self.insert_exclusive(&record).await?;
        self.audit_record(identity, AuditAction::VerificationStarted, true, &record, None)
            .await;

        self.store.mark_in_progress(record.record_id).await?;

        let mut prior: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        for stage in &plan.stages {
            let results = join_all(
                stage
                    .iter()
                    .map(|step| self.run_step(&record, step, &prior, request_id.clone())),
            )
            .await;

            let mut failed: Vec<&StepDescriptor> = Vec::new();
            for (step, result) in stage.iter().zip(results) {
                if let Err(e) = self.store.append_step(record.record_id, &result).await {
                    return Err(self.interrupted(record.record_id, e));
                }
                self.audit
                    .record(
                        AuditEvent::member(
                            identity.member_id(),
                            identity.email().as_str(),
                            AuditAction::VerificationStep,
                            result.verified,
                        )
                        .with_reason(step.name)
                        .with_data(serde_json::json!({
                            "record_id": record.record_id,
                            "issues": result.issues,
                        })),
                    )
                    .await;

                if result.verified {
                    prior.insert(result.step.clone(), result.evidence.clone());
                } else {
                    failed.push(step);
                }
            }

            if !failed.is_empty() {
                let failed_checks: Vec<String> =
                    failed.iter().map(|s| s.failure_message()).collect();
                self.reject(identity, record.record_id, RejectionReason::StepFailed)
                    .await?;
                metrics::counter!("verification_outcomes_total", "outcome" => "rejected", "role" => target.as_str())
                    .increment(1);
                return Err(CoreError::VerificationStepFailed {
                    record_id: record.record_id,
                    failed_checks,
                });
            }
        }

        self.commit(record.record_id).await?;
        self.audit_record(identity, AuditAction::VerificationCommitted, true, &record, None)
            .await;
        self.load(record.record_id).await
    }

    /// Verify the record and grant its role atomically. Repeating a commit is a no-op.
    /// Only a non-empty, all-passing step log for an active member commits.
    #[tracing::instrument(skip(self))]
    pub async fn commit(&self, record_id: Uuid) -> Result<CommitOutcome, CoreError> {
        let outcome = self.store.commit_verification(record_id).await?;
        match outcome {
            CommitOutcome::Committed => {
                tracing::info!(record_id = %record_id, "Verification committed");
                metrics::counter!("verification_outcomes_total", "outcome" => "verified").increment(1);
                Ok(outcome)
            }
            CommitOutcome::AlreadyCommitted => {
                tracing::info!(record_id = %record_id, "Verification already committed");
                Ok(outcome)
            }
            CommitOutcome::Rejected => Err(CoreError::InvalidRequest(
                "A rejected verification cannot be committed".to_string(),
            )),
            CommitOutcome::Unproven => {
                tracing::warn!(record_id = %record_id, "Commit refused: step log does not pass");
                self.refuse_commit(record_id, RejectionReason::StepFailed).await?;
                Err(CoreError::InvalidRequest(
                    "A verification without passing checks cannot be committed".to_string(),
                ))
            }
            CommitOutcome::MemberInactive => {
                tracing::warn!(record_id = %record_id, "Commit refused: member is deactivated");
                self.refuse_commit(record_id, RejectionReason::MemberDeactivated)
                    .await?;
                Err(CoreError::InvalidRequest(
                    "The member is deactivated".to_string(),
                ))
            }
        }
    }

    /// Withdraw an active attempt so a new one can start.
    pub async fn cancel(
        &self,
        identity: &ResolvedIdentity,
        record_id: Uuid,
    ) -> Result<VerificationRecord, CoreError> {
        let record = self.owned(identity, record_id).await?;
        if record.status.is_final() {
            return Err(CoreError::InvalidRequest(
                "This verification attempt is already finished".to_string(),
            ));
        }
        self.reject(identity, record_id, RejectionReason::Cancelled)
            .await?;
        self.load(record_id).await
    }

    pub async fn get(
        &self,
        identity: &ResolvedIdentity,
        record_id: Uuid,
    ) -> Result<VerificationRecord, CoreError> {
        let record = self.owned(identity, record_id).await?;
        self.expire_if_abandoned(record).await
    }

    /// Any member's record, for reviewers.
    pub async fn get_any(&self, record_id: Uuid) -> Result<VerificationRecord, CoreError> {
        let record = self.load(record_id).await?;
        self.expire_if_abandoned(record).await
    }

    pub async fn list(&self, identity: &ResolvedIdentity) -> Result<Vec<VerificationRecord>, CoreError> {
        let records = self.store.list_verifications(identity.member_id()).await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.expire_if_abandoned(record).await?);
        }
        Ok(out)
    }

    /// Grant `target` without external checks. Development only.
    #[tracing::instrument(skip(self, identity, _proof), fields(member_id = %identity.member_id()))]
    pub async fn bypass(
        &self,
        identity: &ResolvedIdentity,
        target: Role,
        _proof: &DevBypass,
    ) -> Result<VerificationRecord, CoreError> {
        if !target.is_requestable() {
            return Err(CoreError::InvalidRequest(format!(
                "The {} role cannot be requested",
                target
            )));
        }
        let step = StepResult::new(
            "development_bypass",
            true,
            serde_json::json!({ "bypass": true }),
            Vec::new(),
        );
        let record = self
            .grant_through_commit(
                identity.member_id(),
                target,
                RecordOrigin::DevBypass,
                step,
                serde_json::json!({}),
            )
            .await?;
        self.audit_record(identity, AuditAction::VerificationBypassed, true, &record, None)
            .await;
        Ok(record)
    }

    /// Grant `admin` to each listed email that does not hold it yet.
    /// Safe to run on every startup; seeded admins still without a passkey get
    /// a fresh enrolment token each run.
    pub async fn seed_admins(&self, emails: &[String]) -> Result<AdminSeedReport, CoreError> {
        let mut report = AdminSeedReport::default();
        for raw in emails {
            let Ok(email) = EmailAddress::parse(raw) else {
                tracing::warn!(email = %raw, "Skipping invalid admin seed email");
                continue;
            };
            let member = self.members.ensure_member(&email).await?;
            if member.roles.contains(Role::Admin) {
                if let Some(token) = self.enrolment_token(&member).await? {
                    report.pending_enrolment.push((email, token));
                }
                continue;
            }

            let step = StepResult::new(
                "admin_seed",
                true,
                serde_json::json!({ "source": "startup_seed" }),
                Vec::new(),
            );
            match self
                .grant_through_commit(
                    member.member_id,
                    Role::Admin,
                    RecordOrigin::Seed,
                    step,
                    serde_json::json!({}),
                )
                .await
            {
                Ok(record) => {
                    self.audit
                        .record(
                            AuditEvent::system(AuditAction::VerificationCommitted, true)
                                .with_reason("admin_seed")
                                .with_data(serde_json::json!({
                                    "record_id": record.record_id,
                                    "member_id": member.member_id,
                                })),
                        )
                        .await;
                    report.granted += 1;
                    if let Some(token) = self.enrolment_token(&member).await? {
                        report.pending_enrolment.push((email, token));
                    }
                }
                Err(CoreError::ConflictingAttempt { record_id }) => {
                    tracing::warn!(member_id = %member.member_id, record_id = %record_id, "Admin seed skipped: active verification in progress");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            granted = report.granted,
            pending_enrolment = report.pending_enrolment.len(),
            "Admin seed complete"
        );
        Ok(report)
    }

    /// Grant a role on an admin's authority, through the same commit path.
    #[tracing::instrument(skip(self, actor), fields(actor = %actor.member_id()))]
    pub async fn admin_grant(
        &self,
        actor: &ResolvedIdentity,
        member_id: Uuid,
        role: Role,
    ) -> Result<RoleGrant, CoreError> {
        if role == Role::Unverified {
            return Err(CoreError::InvalidRequest(
                "The unverified role cannot be granted".to_string(),
            ));
        }
        let member = self
            .members
            .find(member_id)
            .await?
            .filter(|m| m.is_active())
            .ok_or_else(|| CoreError::NotFound("member".to_string()))?;

        let step = StepResult::new(
            "admin_grant",
            true,
            serde_json::json!({ "granted_by": actor.member_id() }),
            Vec::new(),
        );
        let record = self
            .grant_through_commit(
                member.member_id,
                role,
                RecordOrigin::AdminGrant,
                step,
                serde_json::json!({}),
            )
            .await?;
        self.audit_record(actor, AuditAction::VerificationCommitted, true, &record, Some("admin_grant"))
            .await;
        let enrolment_token = self.enrolment_token(&member).await?;
        Ok(RoleGrant {
            record,
            enrolment_token,
        })
    }

    /// Issue a one-time enrolment token when the member has no passkey yet.
    async fn enrolment_token(&self, member: &Member) -> Result<Option<String>, CoreError> {
        if !self.store.list_credentials(member.member_id).await?.is_empty() {
            return Ok(None);
        }
        let challenge = self
            .challenges
            .issue_challenge(&member.email, ChallengePurpose::Enrolment)
            .await?;
        tracing::info!(member_id = %member.member_id, "Enrolment token issued");
        Ok(Some(challenge.value))
    }

    async fn grant_through_commit(
        &self,
        member_id: Uuid,
        role: Role,
        origin: RecordOrigin,
        step: StepResult,
        input: serde_json::Value,
    ) -> Result<VerificationRecord, CoreError> {
        let record = VerificationRecord::new(member_id, role, origin, input);
        self.insert_exclusive(&record).await?;
        if let Err(e) = self.store.append_step(record.record_id, &step).await {
            return Err(self.interrupted(record.record_id, e));
        }
        self.commit(record.record_id).await?;
        self.load(record.record_id).await
    }

    /// Insert a new active record, mapping the one-active-per-member
    /// constraint to `ConflictingAttempt`.
    async fn insert_exclusive(&self, record: &VerificationRecord) -> Result<(), CoreError> {
        if let Some(active) = self.store.find_active_verification(record.member_id).await? {
            let active = self.expire_if_abandoned(active).await?;
            if active.status.is_active() {
                return Err(CoreError::ConflictingAttempt {
                    record_id: active.record_id,
                });
            }
        }

        match self.store.insert_verification(record).await {
            Ok(()) => Ok(()),
            Err(StoreError::Conflict(_)) => {
                let record_id = self
                    .store
                    .find_active_verification(record.member_id)
                    .await?
                    .map(|r| r.record_id)
                    .unwrap_or(Uuid::nil());
                Err(CoreError::ConflictingAttempt { record_id })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_step(
        &self,
        record: &VerificationRecord,
        step: &StepDescriptor,
        prior: &BTreeMap<String, serde_json::Value>,
        request_id: Option<String>,
    ) -> StepResult {
        let started = Instant::now();
        let request = AgentRequest {
            record_id: record.record_id,
            step: step.name.to_string(),
            target_role: record.target_role,
            idempotency_key: AgentRequest::idempotency_key_for(record.record_id, step.name),
            input: record.input.clone(),
            prior_evidence: prior.clone(),
            request_id,
        };

        let outcome = match self.agents.get(step.agent) {
            Some(agent) => {
                let timeout = self.settings.step_timeout;
                let policy = ExponentialBackoffBuilder::new()
                    .with_initial_interval(self.settings.retry_initial_interval)
                    .with_max_elapsed_time(Some(self.settings.retry_max_elapsed))
                    .build();
                let agent = &agent;
                let request = &request;
                retry(policy, move || async move {
                    match tokio::time::timeout(timeout, agent.verify(request)).await {
                        Ok(Ok(verdict)) => Ok(verdict),
                        Ok(Err(e)) if e.is_permanent() => Err(backoff::Error::permanent(e)),
                        Ok(Err(e)) => {
                            tracing::warn!(step = step.name, error = %e, "Agent call failed; retrying");
                            Err(backoff::Error::transient(e))
                        }
                        Err(_) => {
                            let e = AgentError::Timeout(timeout.as_millis() as u64);
                            tracing::warn!(step = step.name, error = %e, "Agent call timed out; retrying");
                            Err(backoff::Error::transient(e))
                        }
                    }
                })
                .await
            }
            None => Err(AgentError::Unavailable(step.agent.as_str())),
        };

        let result = match outcome {
            Ok(verdict) if verdict.verified && verdict.issues.is_empty() => {
                StepResult::new(step.name, true, verdict.structured_result, Vec::new())
            }
            Ok(verdict) if verdict.verified => {
                let mut issues = verdict.issues;
                issues.push("agent reported verified with outstanding issues".to_string());
                StepResult::new(step.name, false, verdict.structured_result, issues)
            }
            Ok(verdict) => {
                let issues = if verdict.issues.is_empty() {
                    vec!["agent did not verify".to_string()]
                } else {
                    verdict.issues
                };
                StepResult::new(step.name, false, verdict.structured_result, issues)
            }
            Err(e) => {
                tracing::warn!(step = step.name, error = %e, "Verification step failed");
                StepResult::new(step.name, false, serde_json::Value::Null, vec![e.to_string()])
            }
        };

        metrics::histogram!(
            "verification_step_duration_seconds",
            "step" => step.name,
            "outcome" => if result.verified { "passed" } else { "failed" }
        )
        .record(started.elapsed().as_secs_f64());
        result
    }

    async fn reject(
        &self,
        identity: &ResolvedIdentity,
        record_id: Uuid,
        reason: RejectionReason,
    ) -> Result<bool, CoreError> {
        let changed = self.store.reject_verification(record_id, reason).await?;
        if changed {
            self.audit
                .record(
                    AuditEvent::member(
                        identity.member_id(),
                        identity.email().as_str(),
                        AuditAction::VerificationRejected,
                        false,
                    )
                    .with_reason(reason.as_str())
                    .with_data(serde_json::json!({ "record_id": record_id })),
                )
                .await;
        }
        Ok(changed)
    }

    async fn refuse_commit(
        &self,
        record_id: Uuid,
        reason: RejectionReason,
    ) -> Result<(), CoreError> {
        if self.store.reject_verification(record_id, reason).await? {
            metrics::counter!("verification_outcomes_total", "outcome" => "rejected").increment(1);
            self.audit
                .record(
                    AuditEvent::system(AuditAction::VerificationRejected, false)
                        .with_reason(reason.as_str())
                        .with_data(serde_json::json!({ "record_id": record_id })),
                )
                .await;
        }
        Ok(())
    }

    /// Active records untouched past the abandonment window become rejected.
    async fn expire_if_abandoned(
        &self,
        record: VerificationRecord,
    ) -> Result<VerificationRecord, CoreError> {
        if !record.status.is_active()
            || Utc::now() - record.updated_utc <= self.settings.abandonment_window
        {
            return Ok(record);
        }

        if self
            .store
            .reject_verification(record.record_id, RejectionReason::Abandoned)
            .await?
        {
            tracing::info!(record_id = %record.record_id, "Abandoned verification expired");
            metrics::counter!("verification_outcomes_total", "outcome" => "abandoned").increment(1);
            self.audit
                .record(
                    AuditEvent::system(AuditAction::VerificationRejected, false)
                        .with_reason(RejectionReason::Abandoned.as_str())
                        .with_data(serde_json::json!({
                            "record_id": record.record_id,
                            "member_id": record.member_id,
                        })),
                )
                .await;
        }
        self.load(record.record_id).await
    }

    async fn owned(
        &self,
        identity: &ResolvedIdentity,
        record_id: Uuid,
    ) -> Result<VerificationRecord, CoreError> {
        self.store
            .find_verification(record_id)
            .await?
            .filter(|r| r.member_id == identity.member_id())
            .ok_or_else(|| CoreError::NotFound("verification".to_string()))
    }

    async fn load(&self, record_id: Uuid) -> Result<VerificationRecord, CoreError> {
        self.store
            .find_verification(record_id)
            .await?
            .ok_or_else(|| CoreError::NotFound("verification".to_string()))
    }

    /// The record was finalized underneath a running pipeline (cancelled or expired).
    fn interrupted(&self, record_id: Uuid, err: StoreError) -> CoreError {
        match err {
            StoreError::Conflict(_) => {
                tracing::info!(record_id = %record_id, "Verification finalized while running");
                CoreError::InvalidRequest(
                    "This verification attempt was cancelled or expired".to_string(),
                )
            }
            other => other.into(),
        }
    }

    async fn audit_record(
        &self,
        identity: &ResolvedIdentity,
        action: AuditAction,
        success: bool,
        record: &VerificationRecord,
        reason: Option<&str>,
    ) {
        let mut event = AuditEvent::member(
            identity.member_id(),
            identity.email().as_str(),
            action,
            success,
        )
        .with_data(serde_json::json!({
            "record_id": record.record_id,
            "member_id": record.member_id,
            "target_role": record.target_role,
            "bypass": record.bypass,
        }));
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        self.audit.record(event).await;
    }
}
