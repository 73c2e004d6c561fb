use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::services::{AuthorizationGuard, Requirement, ResolvedIdentity};

/// A requirement bound to a named boundary, used as middleware state.
#[derive(Clone)]
pub struct CapabilityGate {
    guard: AuthorizationGuard,
    boundary: &'static str,
    requirement: Requirement,
}

impl CapabilityGate {
    pub fn new(guard: AuthorizationGuard, boundary: &'static str, requirement: Requirement) -> Self {
        Self {
            guard,
            boundary,
            requirement,
        }
    }
}

/// Reject the request unless the resolved identity meets the gate's requirement.
/// Must run after `session_middleware`.
pub async fn capability_gate(
    State(gate): State<CapabilityGate>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = req.extensions().get::<ResolvedIdentity>();
    gate.guard
        .check(identity, gate.boundary, &gate.requirement)
        .await?;
    Ok(next.run(req).await)
}
