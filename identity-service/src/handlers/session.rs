use axum::{extract::State, Extension, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use service_core::error::AppError;

use crate::{
    dtos::session::{AuthzCheckRequest, AuthzCheckResponse, LogoutResponse, MeResponse},
    middleware::{CurrentIdentity, PresentedToken},
    models::CredentialInfo,
    services::{registry, CoreError, Requirement},
    utils::ValidatedJson,
    AppState,
};

/// Revoke the presented session and clear the cookie.
pub async fn logout(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    token: Option<Extension<PresentedToken>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<LogoutResponse>), AppError> {
    let revoked = match token {
        Some(Extension(PresentedToken(token))) => state.sessions.revoke_session(&token).await?,
        None => false,
    };
    tracing::info!(member_id = %identity.member_id(), revoked, "Logout");

    let jar = jar.remove(Cookie::build((state.config.session.cookie_name.clone(), "")).path("/"));
    Ok((jar, Json(LogoutResponse { revoked })))
}

pub async fn me(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<Json<MeResponse>, AppError> {
    let credentials = state
        .passkeys
        .credentials_of(identity.member_id())
        .await?
        .iter()
        .map(CredentialInfo::from)
        .collect();

    Ok(Json(MeResponse {
        member_id: identity.member_id(),
        email: identity.email().to_string(),
        roles: identity.roles().iter().collect(),
        capabilities: registry::capabilities_of(identity.roles()),
        credentials,
    }))
}

/// Answer whether the caller holds the given capabilities. A denial is
/// audited like any other boundary and reported as `allowed: false`.
pub async fn check(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    ValidatedJson(req): ValidatedJson<AuthzCheckRequest>,
) -> Result<Json<AuthzCheckResponse>, AppError> {
    let requirement = Requirement {
        capabilities: req.capabilities,
        mode: req.mode,
    };
    let allowed = match state
        .guard
        .check(Some(&identity), "authz_check", &requirement)
        .await
    {
        Ok(()) => true,
        Err(CoreError::Forbidden { .. }) => false,
        Err(e) => return Err(e.into()),
    };
    Ok(Json(AuthzCheckResponse { allowed }))
}
