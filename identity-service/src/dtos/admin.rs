use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::verification::VerificationView;
use crate::models::Role;

#[derive(Debug, Deserialize, Validate)]
pub struct GrantRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MemberChangeResponse {
    pub member_id: Uuid,
    pub changed: bool,
}

/// Returned by a role grant. `enrolment_token` is present only when the member
/// has no passkey yet and must be handed to them out of band.
#[derive(Debug, Serialize)]
pub struct GrantRoleResponse {
    pub verification: VerificationView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrolment_token: Option<String>,
}
