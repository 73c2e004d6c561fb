//! Audit event model - security and compliance logging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Action tags written to the audit sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SessionCreated,
    SessionRevoked,
    AuthorizationDenied,
    ChallengeRejected,
    CounterReplayDetected,
    PasskeyRegistered,
    VerificationStarted,
    VerificationStep,
    VerificationCommitted,
    VerificationRejected,
    VerificationBypassed,
    RoleRevoked,
    MemberDeactivated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionRevoked => "session_revoked",
            AuditAction::AuthorizationDenied => "authorization_denied",
            AuditAction::ChallengeRejected => "challenge_rejected",
            AuditAction::CounterReplayDetected => "counter_replay_detected",
            AuditAction::PasskeyRegistered => "passkey_registered",
            AuditAction::VerificationStarted => "verification_started",
            AuditAction::VerificationStep => "verification_step",
            AuditAction::VerificationCommitted => "verification_committed",
            AuditAction::VerificationRejected => "verification_rejected",
            AuditAction::VerificationBypassed => "verification_bypassed",
            AuditAction::RoleRevoked => "role_revoked",
            AuditAction::MemberDeactivated => "member_deactivated",
        }
    }
}

/// Actor label used when no identity was resolved.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Audit event entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub actor_member_id: Option<Uuid>,
    pub actor_label: String,
    pub action: AuditAction,
    pub success: bool,
    pub reason: Option<String>,
    pub event_data: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditEvent {
    /// An event attributed to a known member.
    pub fn member(member_id: Uuid, label: impl Into<String>, action: AuditAction, success: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_member_id: Some(member_id),
            actor_label: label.into(),
            action,
            success,
            reason: None,
            event_data: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    /// An event with no resolved identity behind it.
    pub fn anonymous(action: AuditAction, success: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            actor_member_id: None,
            actor_label: ANONYMOUS_ACTOR.to_string(),
            action,
            success,
            reason: None,
            event_data: serde_json::Value::Null,
            created_utc: Utc::now(),
        }
    }

    /// An event raised by the service itself (startup seed).
    pub fn system(action: AuditAction, success: bool) -> Self {
        Self {
            actor_label: "system".to_string(),
            ..Self::anonymous(action, success)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }
}
