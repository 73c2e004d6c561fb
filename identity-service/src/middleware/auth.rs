use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use service_core::error::AppError;

use crate::{services::ResolvedIdentity, AppState};

/// The raw session token the client presented, kept for logout.
#[derive(Debug, Clone)]
pub struct PresentedToken(pub String);

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn cookie_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Resolve the presented token into an identity, if any.
///
/// Never rejects: anonymous requests continue without a `ResolvedIdentity`
/// and the capability gate decides what they may reach.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers())
        .or_else(|| cookie_token(req.headers(), &state.config.session.cookie_name));

    if let Some(token) = token {
        if let Some(identity) = state.sessions.resolve_session(&token).await {
            req.extensions_mut().insert(identity);
        }
        req.extensions_mut().insert(PresentedToken(token));
    }

    next.run(req).await
}

/// Extractor for handlers behind a capability gate.
pub struct CurrentIdentity(pub ResolvedIdentity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedIdentity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Authentication required")))
    }
}

/// Extractor for routes open to anonymous callers.
pub struct OptionalIdentity(pub Option<ResolvedIdentity>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalIdentity
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalIdentity(
            parts.extensions.get::<ResolvedIdentity>().cloned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(header::COOKIE, HeaderValue::from_static("session_token=xyz"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
        assert_eq!(cookie_token(&headers, "session_token").as_deref(), Some("xyz"));
    }

    #[test]
    fn non_bearer_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        assert!(bearer_token(&headers).is_none());
    }
}
