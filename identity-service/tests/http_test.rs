//! Router-level behavior: boundaries, generic error bodies, cookies.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{test_config, Behavior, Device, TestApp};
use identity_service::config::Environment;
use identity_service::models::{AuditAction, Role};
use identity_service::services::AgentKind;
use tower::ServiceExt;

#[tokio::test]
async fn anonymous_request_gets_generic_401() {
    let app = TestApp::spawn();
    let (status, body) = app.request("GET", "/me", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
    assert!(body.get("details").is_none());
    assert_eq!(app.audit.events_for(AuditAction::AuthorizationDenied).len(), 1);
}

#[tokio::test]
async fn garbage_token_is_anonymous() {
    let app = TestApp::spawn();
    let (status, _) = app
        .request("GET", "/me", Some("not-a-real-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_capability_gets_generic_403() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("pat@example.com", &[Role::Patient]).await;

    let (status, body) = app
        .request(
            "GET",
            &format!("/admin/verifications/{}", uuid::Uuid::new_v4()),
            Some(&issued.token),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access denied");
    assert!(!body.to_string().contains("admin:"));

    let denial = &app.audit.events_for(AuditAction::AuthorizationDenied)[0];
    assert_eq!(denial.event_data["boundary"], "admin_verifications");
}

#[tokio::test]
async fn me_reports_roles_and_effective_capabilities() {
    let app = TestApp::spawn();
    let (issued, _) = app
        .signed_in("dual@example.com", &[Role::Nurse, Role::Patient])
        .await;

    let (status, body) = app.request("GET", "/me", Some(&issued.token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "dual@example.com");

    let capabilities: Vec<&str> = body["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert!(capabilities.contains(&"vitals:record"));
    assert!(capabilities.contains(&"appointments:book"));
    assert!(!capabilities.contains(&"rx:sign"));
}

#[tokio::test]
async fn authz_check_answers_without_failing() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("dr@example.com", &[Role::Provider]).await;

    let (status, body) = app
        .request(
            "POST",
            "/authz/check",
            Some(&issued.token),
            Some(serde_json::json!({ "capabilities": ["rx:sign"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (_, body) = app
        .request(
            "POST",
            "/authz/check",
            Some(&issued.token),
            Some(serde_json::json!({ "capabilities": ["rx:dispense", "rx:sign"], "mode": "all" })),
        )
        .await;
    assert_eq!(body["allowed"], false);

    let (_, body) = app
        .request(
            "POST",
            "/authz/check",
            Some(&issued.token),
            Some(serde_json::json!({ "capabilities": ["rx:dispense", "rx:sign"], "mode": "any" })),
        )
        .await;
    assert_eq!(body["allowed"], true);
}

#[tokio::test]
async fn failed_verification_returns_plain_language_checks() {
    let app = TestApp::with_agents(
        Environment::Dev,
        &[(AgentKind::PharmacyRegistry, Behavior::Fail("DEA lookup 0x1f mismatch"))],
    );
    let (issued, _) = app.signed_in("rx@example.com", &[]).await;

    let (status, body) = app
        .request(
            "POST",
            "/verifications",
            Some(&issued.token),
            Some(serde_json::json!({ "target_role": "pharmacy", "input": { "dea": "AB1234563" } })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "Verification was not approved");
    let details = body["details"].as_array().unwrap();
    assert_eq!(details.len(), 1);
    assert!(details[0].as_str().unwrap().starts_with("Pharmacy registry check"));
    assert!(!body.to_string().contains("0x1f"));
}

#[tokio::test]
async fn successful_verification_then_listing() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("pat@example.com", &[]).await;

    let (status, body) = app
        .request(
            "POST",
            "/verifications",
            Some(&issued.token),
            Some(serde_json::json!({ "target_role": "patient", "input": {} })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "verified");

    let (status, list) = app
        .request("GET", "/verifications", Some(&issued.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let record_id = body["record_id"].as_str().unwrap();
    let (status, one) = app
        .request(
            "GET",
            &format!("/verifications/{}", record_id),
            Some(&issued.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["target_role"], "patient");
}

#[tokio::test]
async fn bypass_route_is_not_mounted_by_default() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("dev@example.com", &[]).await;

    let (status, _) = app
        .request(
            "POST",
            "/verifications/bypass",
            Some(&issued.token),
            Some(serde_json::json!({ "target_role": "provider" })),
        )
        .await;
    assert_ne!(status, StatusCode::CREATED);
    assert!(!app
        .resolve(&issued.token)
        .await
        .unwrap()
        .roles()
        .contains(Role::Provider));
}

#[tokio::test]
async fn bypass_route_works_when_enabled_in_dev() {
    let mut config = test_config(Environment::Dev);
    config.verification.allow_dev_bypass = true;
    let app = TestApp::build(config, &[]);
    let (issued, _) = app.signed_in("dev@example.com", &[]).await;

    let (status, body) = app
        .request(
            "POST",
            "/verifications/bypass",
            Some(&issued.token),
            Some(serde_json::json!({ "target_role": "provider" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["bypass"], true);
}

#[tokio::test]
async fn admin_can_grant_revoke_and_deactivate() {
    let app = TestApp::spawn();
    let (admin, _) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let (member_session, member) = app.signed_in("nurse@example.com", &[]).await;
    let member_id = member.member_id();

    let (status, _) = app
        .request(
            "POST",
            &format!("/admin/members/{}/roles", member_id),
            Some(&admin.token),
            Some(serde_json::json!({ "role": "nurse" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app
        .resolve(&member_session.token)
        .await
        .unwrap()
        .roles()
        .contains(Role::Nurse));

    let (status, body) = app
        .request(
            "DELETE",
            &format!("/admin/members/{}/roles/nurse", member_id),
            Some(&admin.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, _) = app
        .request(
            "DELETE",
            &format!("/admin/members/{}/roles/wizard", member_id),
            Some(&admin.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            "POST",
            &format!("/admin/members/{}/deactivate", member_id),
            Some(&admin.token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.resolve(&member_session.token).await.is_none());
}

#[tokio::test]
async fn passkey_login_sets_cookie_that_authenticates() {
    let app = TestApp::spawn();
    let device = Device::new();

    let (status, options) = app
        .request(
            "POST",
            "/auth/passkey/register/options",
            None,
            Some(serde_json::json!({ "email": "cookie@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let challenge = options["challenge"].as_str().unwrap();
    let enrolled = device.enroll(challenge);

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/passkey/register/verify")
                .header("x-forwarded-for", "10.0.0.2")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "email": "cookie@example.com",
                        "challenge": enrolled.challenge,
                        "credential_id": enrolled.credential_id,
                        "public_key": enrolled.public_key,
                        "signature": enrolled.signature,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session_token="));
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie.split(';').next().unwrap().to_string();

    let response = app
        .router()
        .oneshot(
            Request::builder()
                .uri("/me")
                .header(header::COOKIE, pair)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn consumed_challenge_gets_generic_401() {
    let app = TestApp::spawn();
    let (device, _) = common::register_device(&app, "pat@example.com").await;

    let (_, options) = app
        .request(
            "POST",
            "/auth/passkey/login/options",
            None,
            Some(serde_json::json!({ "email": "pat@example.com" })),
        )
        .await;
    let assertion = device.assert(options["challenge"].as_str().unwrap(), 1);
    let body = serde_json::json!({
        "email": "pat@example.com",
        "challenge": assertion.challenge,
        "credential_id": assertion.credential_id,
        "counter": assertion.counter,
        "signature": assertion.signature,
    });

    let (status, _) = app
        .request("POST", "/auth/passkey/login/verify", None, Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, error) = app
        .request("POST", "/auth/passkey/login/verify", None, Some(body))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "Authentication failed");
}

#[tokio::test]
async fn logout_revokes_presented_session() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("pat@example.com", &[Role::Patient]).await;

    let (status, body) = app
        .request("POST", "/auth/logout", Some(&issued.token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], true);

    let (status, _) = app.request("GET", "/me", Some(&issued.token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn invalid_email_is_rejected_before_any_ceremony() {
    let app = TestApp::spawn();
    let (status, _) = app
        .request(
            "POST",
            "/auth/passkey/login/options",
            None,
            Some(serde_json::json!({ "email": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn health_reports_dependencies() {
    let app = TestApp::spawn();
    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.store.set_unavailable(true);
    let (status, _) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
