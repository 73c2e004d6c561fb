//! Verification step plans per requestable role.
//!
//! A plan is a list of stages; steps inside a stage run concurrently and
//! stages run in order.

use super::agents::AgentKind;
use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub name: &'static str,
    pub agent: AgentKind,
    /// Plain-language name of the check shown to the member.
    pub label: &'static str,
    /// What the member can do when the check fails.
    pub remediation: &'static str,
}

impl StepDescriptor {
    const fn new(
        agent: AgentKind,
        name: &'static str,
        label: &'static str,
        remediation: &'static str,
    ) -> Self {
        Self {
            name,
            agent,
            label,
            remediation,
        }
    }

    /// Client-facing description of a failure of this step.
    pub fn failure_message(&self) -> String {
        format!("{}: {}", self.label, self.remediation)
    }
}

const LICENSE_DOCUMENT_SCAN: StepDescriptor = StepDescriptor::new(
    AgentKind::LicenseDocumentScan,
    "license_document_scan",
    "License document review",
    "Upload a clear, current photo or scan of your professional license.",
);

const NPI_LICENSE_REGISTRY: StepDescriptor = StepDescriptor::new(
    AgentKind::NpiLicenseRegistry,
    "npi_license_registry",
    "NPI and state license registry check",
    "Check that your NPI number, license number and issuing state match the registry.",
);

const NURSING_LICENSE_REGISTRY: StepDescriptor = StepDescriptor::new(
    AgentKind::NursingLicenseRegistry,
    "nursing_license_registry",
    "Nursing license registry check",
    "Check your nursing license number and issuing state.",
);

const COMPLIANCE_REVIEW: StepDescriptor = StepDescriptor::new(
    AgentKind::ComplianceReview,
    "compliance_review",
    "Compliance review",
    "Contact support so a reviewer can look at your credentials.",
);

const PHARMACY_REGISTRY: StepDescriptor = StepDescriptor::new(
    AgentKind::PharmacyRegistry,
    "pharmacy_registry",
    "Pharmacy registry check",
    "Check your pharmacy's NCPDP and DEA registration numbers.",
);

const INTAKE_VALIDATION: StepDescriptor = StepDescriptor::new(
    AgentKind::IntakeValidation,
    "intake_validation",
    "Intake form review",
    "Review your intake form for missing or inconsistent answers.",
);

const ALL_STEPS: [StepDescriptor; 6] = [
    LICENSE_DOCUMENT_SCAN,
    NPI_LICENSE_REGISTRY,
    NURSING_LICENSE_REGISTRY,
    COMPLIANCE_REVIEW,
    PHARMACY_REGISTRY,
    INTAKE_VALIDATION,
];

impl StepDescriptor {
    /// Look up a known agent-backed step by its recorded name.
    pub fn by_name(name: &str) -> Option<Self> {
        ALL_STEPS.into_iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    pub stages: Vec<Vec<StepDescriptor>>,
}

impl StepPlan {
    /// The default plan for a role; `None` for roles that cannot be requested.
    pub fn for_role(role: Role) -> Option<Self> {
        let stages = match role {
            Role::Provider => vec![
                vec![LICENSE_DOCUMENT_SCAN, NPI_LICENSE_REGISTRY],
                vec![COMPLIANCE_REVIEW],
            ],
            Role::Nurse => vec![
                vec![LICENSE_DOCUMENT_SCAN, NURSING_LICENSE_REGISTRY],
                vec![COMPLIANCE_REVIEW],
            ],
            Role::Pharmacy => vec![vec![PHARMACY_REGISTRY]],
            Role::Patient => vec![vec![INTAKE_VALIDATION]],
            Role::Admin | Role::Unverified => return None,
        };
        Some(Self { stages })
    }

    pub fn steps(&self) -> impl Iterator<Item = &StepDescriptor> {
        self.stages.iter().flatten()
    }
}
