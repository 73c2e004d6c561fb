use axum::{extract::State, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;

use super::parse_email;
use crate::{
    dtos::passkey::{
        BeginCeremonyRequest, FinishAuthenticationRequest, FinishRegistrationRequest,
        SessionResponse,
    },
    middleware::OptionalIdentity,
    models::SessionInfo,
    services::{passkey::CeremonyOptions, IssuedSession},
    utils::ValidatedJson,
    AppState,
};

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.session.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .secure(state.config.security.secure_cookies)
        .same_site(SameSite::Strict)
        .build()
}

fn issue(state: &AppState, jar: CookieJar, issued: IssuedSession) -> (CookieJar, Json<SessionResponse>) {
    let jar = jar.add(session_cookie(state, issued.token.clone()));
    (
        jar,
        Json(SessionResponse {
            token: issued.token,
            session: SessionInfo::from(&issued.session),
        }),
    )
}

/// Begin passkey registration. A signed-in member may add another device.
pub async fn register_options(
    State(state): State<AppState>,
    OptionalIdentity(caller): OptionalIdentity,
    ValidatedJson(req): ValidatedJson<BeginCeremonyRequest>,
) -> Result<Json<CeremonyOptions>, AppError> {
    let email = parse_email(&req.email)?;
    let options = state
        .passkeys
        .begin_registration(&email, caller.as_ref())
        .await?;
    Ok(Json(options))
}

pub async fn register_verify(
    State(state): State<AppState>,
    OptionalIdentity(caller): OptionalIdentity,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<FinishRegistrationRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    let email = parse_email(&req.email)?;
    let issued = state
        .passkeys
        .finish_registration(&email, req.into(), caller.as_ref())
        .await?;
    Ok(issue(&state, jar, issued))
}

pub async fn login_options(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<BeginCeremonyRequest>,
) -> Result<Json<CeremonyOptions>, AppError> {
    let email = parse_email(&req.email)?;
    let options = state.passkeys.begin_authentication(&email).await?;
    Ok(Json(options))
}

pub async fn login_verify(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<FinishAuthenticationRequest>,
) -> Result<(CookieJar, Json<SessionResponse>), AppError> {
    let email = parse_email(&req.email)?;
    let issued = state
        .passkeys
        .finish_authentication(&email, req.into())
        .await?;
    Ok(issue(&state, jar, issued))
}
