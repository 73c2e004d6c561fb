use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Capability, CredentialInfo, Role};
use crate::services::MatchMode;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub member_id: Uuid,
    pub email: String,
    pub roles: Vec<Role>,
    pub capabilities: BTreeSet<Capability>,
    pub credentials: Vec<CredentialInfo>,
}

/// Capability check for a backend-for-frontend asking on a member's behalf.
#[derive(Debug, Deserialize, Validate)]
pub struct AuthzCheckRequest {
    #[validate(length(min = 1, max = 32, message = "At least one capability is required"))]
    pub capabilities: Vec<Capability>,

    #[serde(default = "default_mode")]
    pub mode: MatchMode,
}

fn default_mode() -> MatchMode {
    MatchMode::All
}

#[derive(Debug, Serialize)]
pub struct AuthzCheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub revoked: bool,
}
