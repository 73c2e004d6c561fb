//! Session resolution, revocation and member lifecycle.

mod common;

use common::TestApp;
use identity_service::models::{AuditAction, Role};
use identity_service::services::{CoreError, IdentityStore};

#[tokio::test]
async fn deactivated_member_resolves_to_anonymous() {
    let app = TestApp::spawn();
    let (_, admin) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let (issued, patient) = app.signed_in("pat@example.com", &[Role::Patient]).await;

    assert!(app
        .state
        .members
        .deactivate(&admin, patient.member_id())
        .await
        .unwrap());
    assert!(app.resolve(&issued.token).await.is_none());

    // Repeating is a no-op
    assert!(!app
        .state
        .members
        .deactivate(&admin, patient.member_id())
        .await
        .unwrap());
    assert_eq!(app.audit.events_for(AuditAction::MemberDeactivated).len(), 1);
}

#[tokio::test]
async fn deactivated_member_cannot_get_a_new_session() {
    let app = TestApp::spawn();
    let (_, admin) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let member = app.member_with_roles("gone@example.com", &[Role::Nurse]).await;

    app.state
        .members
        .deactivate(&admin, member.member_id)
        .await
        .unwrap();
    let stored = app.state.members.find(member.member_id).await.unwrap().unwrap();
    assert!(matches!(
        app.state.sessions.create_session(&stored).await,
        Err(CoreError::Unauthenticated)
    ));
}

#[tokio::test]
async fn revoked_role_disappears_on_next_resolution() {
    let app = TestApp::spawn();
    let (_, admin) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let (issued, member) = app
        .signed_in("dual@example.com", &[Role::Nurse, Role::Patient])
        .await;

    assert!(app
        .state
        .members
        .revoke_role(&admin, member.member_id(), Role::Nurse)
        .await
        .unwrap());

    let roles = app.resolve(&issued.token).await.unwrap().roles().clone();
    assert!(!roles.contains(Role::Nurse));
    assert!(roles.contains(Role::Patient));
    assert_eq!(app.audit.events_for(AuditAction::RoleRevoked).len(), 1);
}

#[tokio::test]
async fn revoking_last_role_falls_back_to_unverified() {
    let app = TestApp::spawn();
    let (_, admin) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let (issued, member) = app.signed_in("rx@example.com", &[Role::Pharmacy]).await;

    app.state
        .members
        .revoke_role(&admin, member.member_id(), Role::Pharmacy)
        .await
        .unwrap();

    let roles = app.resolve(&issued.token).await.unwrap().roles().clone();
    assert!(roles.contains(Role::Unverified));
    assert_eq!(roles.len(), 1);
}

#[tokio::test]
async fn unverified_role_cannot_be_revoked() {
    let app = TestApp::spawn();
    let (_, admin) = app.signed_in("admin@example.com", &[Role::Admin]).await;
    let (_, member) = app.signed_in("new@example.com", &[]).await;

    assert!(matches!(
        app.state
            .members
            .revoke_role(&admin, member.member_id(), Role::Unverified)
            .await,
        Err(CoreError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn storage_outage_fails_closed() {
    let app = TestApp::spawn();
    let (issued, _) = app.signed_in("pat@example.com", &[Role::Patient]).await;

    app.store.set_unavailable(true);
    assert!(app.resolve(&issued.token).await.is_none());

    app.store.set_unavailable(false);
    assert!(app.resolve(&issued.token).await.is_some());
}

#[tokio::test]
async fn logout_revokes_only_that_session() {
    let app = TestApp::spawn();
    let member = app.member_with_roles("two@example.com", &[Role::Patient]).await;
    let phone = app.state.sessions.create_session(&member).await.unwrap();
    let laptop = app.state.sessions.create_session(&member).await.unwrap();

    assert!(app.state.sessions.revoke_session(&phone.token).await.unwrap());
    assert!(!app.state.sessions.revoke_session(&phone.token).await.unwrap());

    assert!(app.resolve(&phone.token).await.is_none());
    assert!(app.resolve(&laptop.token).await.is_some());
}

#[tokio::test]
async fn concurrent_first_contact_creates_one_member() {
    let app = TestApp::spawn();
    let email = identity_service::models::EmailAddress::parse("race@example.com").unwrap();

    let (a, b) = tokio::join!(
        app.state.members.ensure_member(&email),
        app.state.members.ensure_member(&email),
    );
    assert_eq!(a.unwrap().member_id, b.unwrap().member_id);
    assert!(app.store.find_member_by_email(&email).await.unwrap().is_some());
}
