//! External verification agents.
//!
//! Agents are untrusted collaborators: OCR, registry lookups, compliance
//! review. The core only knows their request/verdict contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::VerificationConfig;
use crate::models::Role;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    LicenseDocumentScan,
    NpiLicenseRegistry,
    NursingLicenseRegistry,
    PharmacyRegistry,
    ComplianceReview,
    IntakeValidation,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::LicenseDocumentScan,
        AgentKind::NpiLicenseRegistry,
        AgentKind::NursingLicenseRegistry,
        AgentKind::PharmacyRegistry,
        AgentKind::ComplianceReview,
        AgentKind::IntakeValidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::LicenseDocumentScan => "license_document_scan",
            AgentKind::NpiLicenseRegistry => "npi_license_registry",
            AgentKind::NursingLicenseRegistry => "nursing_license_registry",
            AgentKind::PharmacyRegistry => "pharmacy_registry",
            AgentKind::ComplianceReview => "compliance_review",
            AgentKind::IntakeValidation => "intake_validation",
        }
    }
}

/// What an agent receives for one step.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub record_id: Uuid,
    pub step: String,
    pub target_role: Role,
    /// Stable across retries: `{record_id}:{step}`.
    pub idempotency_key: String,
    pub input: serde_json::Value,
    /// Evidence from earlier stages, keyed by step name.
    pub prior_evidence: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub request_id: Option<String>,
}

impl AgentRequest {
    pub fn idempotency_key_for(record_id: Uuid, step: &str) -> String {
        format!("{}:{}", record_id, step)
    }
}

/// An agent's answer. `verified` with a non-empty `issues` list is ambiguous
/// and treated as a failure by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentVerdict {
    pub verified: bool,
    #[serde(default)]
    pub structured_result: serde_json::Value,
    #[serde(default)]
    pub issues: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent unreachable: {0}")]
    Transport(String),
    #[error("agent returned status {0}")]
    Status(u16),
    #[error("agent response malformed: {0}")]
    Malformed(String),
    #[error("agent timed out after {0} ms")]
    Timeout(u64),
    #[error("no agent configured for {0}")]
    Unavailable(&'static str),
}

impl AgentError {
    /// Retrying cannot change the outcome.
    pub fn is_permanent(&self) -> bool {
        match self {
            AgentError::Status(code) => (400..500).contains(code) && *code != 408 && *code != 429,
            AgentError::Malformed(_) | AgentError::Unavailable(_) => true,
            AgentError::Transport(_) | AgentError::Timeout(_) => false,
        }
    }
}

#[async_trait]
pub trait VerificationAgent: Send + Sync {
    async fn verify(&self, request: &AgentRequest) -> Result<AgentVerdict, AgentError>;
}

/// Agent reached over HTTP: POST the request as JSON, read a verdict back.
pub struct HttpVerificationAgent {
    client: reqwest::Client,
    url: String,
}

impl HttpVerificationAgent {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl VerificationAgent for HttpVerificationAgent {
    async fn verify(&self, request: &AgentRequest) -> Result<AgentVerdict, AgentError> {
        let response = self
            .client
            .post(&self.url)
            .headers(service_core::observability::outbound_headers(
                request.request_id.as_deref(),
            ))
            .header(IDEMPOTENCY_KEY_HEADER, &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status(status.as_u16()));
        }

        response
            .json::<AgentVerdict>()
            .await
            .map_err(|e| AgentError::Malformed(e.to_string()))
    }
}

/// Agents by kind. A kind with no agent fails its step.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentKind, Arc<dyn VerificationAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: AgentKind, agent: Arc<dyn VerificationAgent>) -> Self {
        self.agents.insert(kind, agent);
        self
    }

    pub fn from_config(config: &VerificationConfig) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.step_timeout_ms))
            .build()?;

        let mut registry = Self::new();
        for endpoint in &config.agents {
            tracing::info!(agent = endpoint.kind.as_str(), url = %endpoint.url, "Verification agent configured");
            registry = registry.with(
                endpoint.kind,
                Arc::new(HttpVerificationAgent::new(client.clone(), endpoint.url.clone())),
            );
        }
        Ok(registry)
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn VerificationAgent>> {
        self.agents.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_permanent_but_throttling_is_not() {
        assert!(AgentError::Status(400).is_permanent());
        assert!(!AgentError::Status(429).is_permanent());
        assert!(!AgentError::Status(503).is_permanent());
        assert!(!AgentError::Timeout(10).is_permanent());
        assert!(AgentError::Malformed("x".into()).is_permanent());
    }

    #[test]
    fn verdict_defaults_missing_fields() {
        let verdict: AgentVerdict = serde_json::from_str(r#"{"verified": true}"#).unwrap();
        assert!(verdict.issues.is_empty());
        assert!(verdict.structured_result.is_null());
    }

    #[test]
    fn verdict_without_decision_is_malformed() {
        assert!(serde_json::from_str::<AgentVerdict>(r#"{"issues": []}"#).is_err());
    }

    #[test]
    fn idempotency_key_is_record_and_step() {
        let id = Uuid::nil();
        assert_eq!(
            AgentRequest::idempotency_key_for(id, "compliance_review"),
            "00000000-0000-0000-0000-000000000000:compliance_review"
        );
    }
}
