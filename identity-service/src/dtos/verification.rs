use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{RejectionReason, Role, VerificationRecord, VerificationStatus};
use crate::services::StepDescriptor;

#[derive(Debug, Deserialize, Validate)]
pub struct StartVerificationRequest {
    pub target_role: Role,

    /// Role-specific submission forwarded to the agents (license numbers,
    /// document references, intake answers).
    #[serde(default)]
    pub input: serde_json::Value,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BypassRequest {
    pub target_role: Role,
}

#[derive(Debug, Serialize)]
pub struct StepView {
    pub step: String,
    pub verified: bool,
    pub recorded_utc: DateTime<Utc>,
}

/// A verification record as its owner sees it. Agent evidence and raw issues
/// stay server-side; failed checks are reported in plain language.
#[derive(Debug, Serialize)]
pub struct VerificationView {
    pub record_id: Uuid,
    pub target_role: Role,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
    pub bypass: bool,
    pub steps: Vec<StepView>,
    pub failed_checks: Vec<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_utc: Option<DateTime<Utc>>,
}

impl From<&VerificationRecord> for VerificationView {
    fn from(record: &VerificationRecord) -> Self {
        let failed_checks = record
            .failed_steps()
            .map(|s| match StepDescriptor::by_name(&s.step) {
                Some(descriptor) => descriptor.failure_message(),
                None => format!("{}: contact support", s.step),
            })
            .collect();

        Self {
            record_id: record.record_id,
            target_role: record.target_role,
            status: record.status,
            rejection_reason: record.rejection_reason,
            bypass: record.bypass,
            steps: record
                .steps
                .iter()
                .map(|s| StepView {
                    step: s.step.clone(),
                    verified: s.verified,
                    recorded_utc: s.recorded_utc,
                })
                .collect(),
            failed_checks,
            created_utc: record.created_utc,
            updated_utc: record.updated_utc,
            finalized_utc: record.finalized_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordOrigin, StepResult};

    #[test]
    fn view_hides_raw_agent_issues() {
        let mut record = VerificationRecord::new(
            Uuid::new_v4(),
            Role::Pharmacy,
            RecordOrigin::Request,
            serde_json::json!({}),
        );
        record.steps.push(StepResult::new(
            "pharmacy_registry",
            false,
            serde_json::json!({ "ncpdp": "bad" }),
            vec!["NCPDP 1234567 not found in upstream table X".to_string()],
        ));

        let view = VerificationView::from(&record);
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("upstream table"));
        assert_eq!(view.failed_checks.len(), 1);
        assert!(view.failed_checks[0].starts_with("Pharmacy registry check"));
    }
}
