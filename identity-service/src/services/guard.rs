//! Capability checks at route and action boundaries.

use super::audit::AuditService;
use super::error::CoreError;
use super::registry;
use super::sessions::ResolvedIdentity;
use crate::models::{AuditAction, AuditEvent, Capability, RoleSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one required capability must be held.
    Any,
    /// Every required capability must be held.
    All,
}

/// What a boundary demands. No capabilities means any authenticated member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub capabilities: Vec<Capability>,
    pub mode: MatchMode,
}

impl Requirement {
    pub fn authenticated() -> Self {
        Self {
            capabilities: Vec::new(),
            mode: MatchMode::All,
        }
    }

    pub fn one(capability: Capability) -> Self {
        Self::all(vec![capability])
    }

    pub fn any(capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities,
            mode: MatchMode::Any,
        }
    }

    pub fn all(capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities,
            mode: MatchMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    Unauthenticated,
    MissingCapabilities(Vec<Capability>),
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Unauthenticated => "unauthenticated",
            DenialReason::MissingCapabilities(_) => "insufficient_capability",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied(DenialReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Pure allow/deny decision. `roles` is `None` for an anonymous caller.
pub fn authorize(roles: Option<&RoleSet>, required: &[Capability], mode: MatchMode) -> Decision {
    let Some(roles) = roles else {
        return Decision::Denied(DenialReason::Unauthenticated);
    };
    if required.is_empty() {
        return Decision::Allowed;
    }

    let missing = registry::missing(roles, required);
    let allowed = match mode {
        MatchMode::All => missing.is_empty(),
        MatchMode::Any => missing.len() < required.len(),
    };

    if allowed {
        Decision::Allowed
    } else {
        Decision::Denied(DenialReason::MissingCapabilities(missing))
    }
}

#[derive(Clone)]
pub struct AuthorizationGuard {
    audit: AuditService,
}

impl AuthorizationGuard {
    pub fn new(audit: AuditService) -> Self {
        Self { audit }
    }

    /// Enforce `requirement` at `boundary`. Every denial is audited; the
    /// returned error carries nothing the client should see.
    pub async fn check(
        &self,
        identity: Option<&ResolvedIdentity>,
        boundary: &str,
        requirement: &Requirement,
    ) -> Result<(), CoreError> {
        let decision = authorize(
            identity.map(|i| i.roles()),
            &requirement.capabilities,
            requirement.mode,
        );

        let outcome = match &decision {
            Decision::Allowed => "allowed",
            Decision::Denied(reason) => reason.as_str(),
        };
        metrics::counter!("authz_decisions_total", "outcome" => outcome).increment(1);

        let Decision::Denied(reason) = decision else {
            return Ok(());
        };

        let event = match identity {
            Some(identity) => AuditEvent::member(
                identity.member_id(),
                identity.email().as_str(),
                AuditAction::AuthorizationDenied,
                false,
            ),
            None => AuditEvent::anonymous(AuditAction::AuthorizationDenied, false),
        };
        let missing = match &reason {
            DenialReason::MissingCapabilities(missing) => missing.clone(),
            DenialReason::Unauthenticated => Vec::new(),
        };
        self.audit
            .record(event.with_reason(reason.as_str()).with_data(serde_json::json!({
                "boundary": boundary,
                "required": requirement.capabilities,
                "mode": requirement.mode,
                "missing": missing,
            })))
            .await;

        match reason {
            DenialReason::Unauthenticated => Err(CoreError::Unauthenticated),
            DenialReason::MissingCapabilities(missing) => Err(CoreError::Forbidden { missing }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn anonymous_is_always_denied() {
        assert_eq!(
            authorize(None, &[], MatchMode::All),
            Decision::Denied(DenialReason::Unauthenticated)
        );
    }

    #[test]
    fn empty_requirement_admits_any_member() {
        let roles = RoleSet::single(Role::Unverified);
        assert!(authorize(Some(&roles), &[], MatchMode::Any).is_allowed());
    }

    #[test]
    fn any_mode_needs_one_match() {
        let roles = RoleSet::single(Role::Nurse);
        let required = [Capability::RxSign, Capability::RxDraft];
        assert!(authorize(Some(&roles), &required, MatchMode::Any).is_allowed());
        assert_eq!(
            authorize(Some(&roles), &required, MatchMode::All),
            Decision::Denied(DenialReason::MissingCapabilities(vec![Capability::RxSign]))
        );
    }

    #[test]
    fn any_mode_denial_lists_every_capability() {
        let roles = RoleSet::single(Role::Patient);
        let required = [Capability::RxSign, Capability::RxDispense];
        assert_eq!(
            authorize(Some(&roles), &required, MatchMode::Any),
            Decision::Denied(DenialReason::MissingCapabilities(required.to_vec()))
        );
    }

    #[test]
    fn admin_passes_every_requirement() {
        let roles = RoleSet::single(Role::Admin);
        assert!(authorize(Some(&roles), &Capability::ALL, MatchMode::All).is_allowed());
    }
}
