//! Verification record model - the append-only log of one attempt to earn a role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

/// Record lifecycle. `Verified` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    InProgress,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::InProgress => "in_progress",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "pending" => Some(VerificationStatus::Pending),
            "in_progress" => Some(VerificationStatus::InProgress),
            "verified" => Some(VerificationStatus::Verified),
            "rejected" => Some(VerificationStatus::Rejected),
            _ => None,
        }
    }

    /// Pending and in-progress records count toward the one-per-member limit.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            VerificationStatus::Pending | VerificationStatus::InProgress
        )
    }

    pub fn is_final(&self) -> bool {
        !self.is_active()
    }
}

/// Why a record ended up rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    StepFailed,
    Cancelled,
    Abandoned,
    /// The owning member was deactivated before the commit.
    MemberDeactivated,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::StepFailed => "step_failed",
            RejectionReason::Cancelled => "cancelled",
            RejectionReason::Abandoned => "abandoned",
            RejectionReason::MemberDeactivated => "member_deactivated",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "step_failed" => Some(RejectionReason::StepFailed),
            "cancelled" => Some(RejectionReason::Cancelled),
            "abandoned" => Some(RejectionReason::Abandoned),
            "member_deactivated" => Some(RejectionReason::MemberDeactivated),
            _ => None,
        }
    }
}

/// How the record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// The member asked for the role.
    Request,
    /// Startup admin seed.
    Seed,
    /// An admin granted the role.
    AdminGrant,
    /// Development bypass; never reachable in production.
    DevBypass,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Request => "request",
            RecordOrigin::Seed => "seed",
            RecordOrigin::AdminGrant => "admin_grant",
            RecordOrigin::DevBypass => "dev_bypass",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "request" => Some(RecordOrigin::Request),
            "seed" => Some(RecordOrigin::Seed),
            "admin_grant" => Some(RecordOrigin::AdminGrant),
            "dev_bypass" => Some(RecordOrigin::DevBypass),
            _ => None,
        }
    }
}

/// Outcome of one external verification step, appended before it is evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub verified: bool,
    pub evidence: serde_json::Value,
    pub issues: Vec<String>,
    pub recorded_utc: DateTime<Utc>,
}

impl StepResult {
    pub fn new(
        step: impl Into<String>,
        verified: bool,
        evidence: serde_json::Value,
        issues: Vec<String>,
    ) -> Self {
        Self {
            step: step.into(),
            verified,
            evidence,
            issues,
            recorded_utc: Utc::now(),
        }
    }
}

/// Verification record entity.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationRecord {
    pub record_id: Uuid,
    pub member_id: Uuid,
    pub target_role: Role,
    pub status: VerificationStatus,
    pub origin: RecordOrigin,
    /// Audit-visible marker for records completed without external checks.
    pub bypass: bool,
    pub input: serde_json::Value,
    pub steps: Vec<StepResult>,
    pub rejection_reason: Option<RejectionReason>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    pub finalized_utc: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    pub fn new(
        member_id: Uuid,
        target_role: Role,
        origin: RecordOrigin,
        input: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::new_v4(),
            member_id,
            target_role,
            status: VerificationStatus::Pending,
            origin,
            bypass: origin == RecordOrigin::DevBypass,
            input,
            steps: Vec::new(),
            rejection_reason: None,
            created_utc: now,
            updated_utc: now,
            finalized_utc: None,
        }
    }

    /// Steps that did not pass, in the order they were recorded.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.verified)
    }

    /// Every issue reported by a named step.
    pub fn issues_for(&self, step: &str) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.step == step)
            .flat_map(|s| s.issues.iter().cloned())
            .collect()
    }
}
