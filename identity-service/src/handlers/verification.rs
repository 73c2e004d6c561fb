use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use service_core::{error::AppError, middleware::tracing::RequestId};
use uuid::Uuid;

use crate::{
    dtos::verification::{BypassRequest, StartVerificationRequest, VerificationView},
    middleware::CurrentIdentity,
    utils::ValidatedJson,
    AppState,
};

/// Run the verification pipeline for the requested role.
pub async fn start(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    request_id: Option<Extension<RequestId>>,
    ValidatedJson(req): ValidatedJson<StartVerificationRequest>,
) -> Result<(StatusCode, Json<VerificationView>), AppError> {
    let record = state
        .orchestrator
        .start(
            &identity,
            req.target_role,
            req.input,
            request_id.map(|Extension(RequestId(id))| id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(VerificationView::from(&record))))
}

pub async fn list(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<Vec<VerificationView>>, AppError> {
    let records = state.orchestrator.list(&identity).await?;
    Ok(Json(records.iter().map(VerificationView::from).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(record_id): Path<Uuid>,
) -> Result<Json<VerificationView>, AppError> {
    let record = state.orchestrator.get(&identity, record_id).await?;
    Ok(Json(VerificationView::from(&record)))
}

pub async fn cancel(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(record_id): Path<Uuid>,
) -> Result<Json<VerificationView>, AppError> {
    let record = state.orchestrator.cancel(&identity, record_id).await?;
    Ok(Json(VerificationView::from(&record)))
}

/// Development-only shortcut. Only routed when the bypass is enabled.
pub async fn bypass(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    ValidatedJson(req): ValidatedJson<BypassRequest>,
) -> Result<(StatusCode, Json<VerificationView>), AppError> {
    let proof = state
        .dev_bypass
        .as_ref()
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Not found")))?;
    let record = state
        .orchestrator
        .bypass(&identity, req.target_role, proof)
        .await?;
    Ok((StatusCode::CREATED, Json(VerificationView::from(&record))))
}
