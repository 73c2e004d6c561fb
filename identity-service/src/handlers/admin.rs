use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::{
        admin::{GrantRoleRequest, GrantRoleResponse, MemberChangeResponse},
        verification::VerificationView,
    },
    middleware::CurrentIdentity,
    models::{Role, VerificationRecord},
    utils::ValidatedJson,
    AppState,
};

pub async fn deactivate_member(
    State(state): State<AppState>,
    CurrentIdentity(actor): CurrentIdentity,
    Path(member_id): Path<Uuid>,
) -> Result<Json<MemberChangeResponse>, AppError> {
    if state.members.find(member_id).await?.is_none() {
        return Err(AppError::NotFound(anyhow::anyhow!("Member not found")));
    }
    let changed = state.members.deactivate(&actor, member_id).await?;
    Ok(Json(MemberChangeResponse { member_id, changed }))
}

/// Grant a role through the verification commit path.
pub async fn grant_role(
    State(state): State<AppState>,
    CurrentIdentity(actor): CurrentIdentity,
    Path(member_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<GrantRoleRequest>,
) -> Result<Json<GrantRoleResponse>, AppError> {
    let grant = state
        .orchestrator
        .admin_grant(&actor, member_id, req.role)
        .await?;
    Ok(Json(GrantRoleResponse {
        verification: VerificationView::from(&grant.record),
        enrolment_token: grant.enrolment_token,
    }))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    CurrentIdentity(actor): CurrentIdentity,
    Path((member_id, role)): Path<(Uuid, String)>,
) -> Result<Json<MemberChangeResponse>, AppError> {
    let role: Role = role
        .parse()
        .map_err(|e: String| AppError::BadRequest(anyhow::anyhow!(e)))?;
    let changed = state.members.revoke_role(&actor, member_id, role).await?;
    Ok(Json(MemberChangeResponse { member_id, changed }))
}

/// Full record for reviewers, including agent evidence and issues.
pub async fn get_verification(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<VerificationRecord>, AppError> {
    let record = state.orchestrator.get_any(record_id).await?;
    Ok(Json(record))
}
