//! End-to-end identity and verification scenarios.

mod common;

use common::{Behavior, TestApp};
use identity_service::config::Environment;
use identity_service::models::{AuditAction, Capability, Role, VerificationStatus};
use identity_service::services::{AgentKind, CommitOutcome, CoreError, Requirement};

#[tokio::test]
async fn anonymous_request_to_provider_action_is_unauthenticated_and_audited() {
    let app = TestApp::spawn();

    let result = app
        .state
        .guard
        .check(None, "clinical_notes", &Requirement::one(Capability::NotesWrite))
        .await;
    assert!(matches!(result, Err(CoreError::Unauthenticated)));

    let denials = app.audit.events_for(AuditAction::AuthorizationDenied);
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].reason.as_deref(), Some("unauthenticated"));
    assert!(!denials[0].success);
    assert!(denials[0].actor_member_id.is_none());
}

#[tokio::test]
async fn patient_cannot_sign_prescriptions() {
    let app = TestApp::spawn();
    let (_, identity) = app.signed_in("pat@example.com", &[Role::Patient]).await;

    let result = app
        .state
        .guard
        .check(Some(&identity), "rx_sign", &Requirement::one(Capability::RxSign))
        .await;
    match result {
        Err(CoreError::Forbidden { missing }) => assert_eq!(missing, vec![Capability::RxSign]),
        other => panic!("expected Forbidden, got {:?}", other),
    }

    let denials = app.audit.events_for(AuditAction::AuthorizationDenied);
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].reason.as_deref(), Some("insufficient_capability"));
    assert_eq!(denials[0].event_data["boundary"], "rx_sign");
    assert_eq!(denials[0].event_data["missing"][0], "rx:sign");
}

#[tokio::test]
async fn single_step_pharmacy_verification_commits_once() {
    let app = TestApp::spawn();
    let (issued, identity) = app.signed_in("rx@example.com", &[]).await;

    let record = app
        .state
        .orchestrator
        .start(
            &identity,
            Role::Pharmacy,
            serde_json::json!({ "ncpdp": "1234567", "dea": "AB1234563" }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(record.status, VerificationStatus::Verified);
    assert_eq!(record.steps.len(), 1);
    assert!(record.steps[0].verified);

    let refreshed = app.resolve(&issued.token).await.unwrap();
    assert!(refreshed.roles().contains(Role::Pharmacy));
    assert!(!refreshed.roles().contains(Role::Unverified));

    let again = app.state.orchestrator.commit(record.record_id).await.unwrap();
    assert_eq!(again, CommitOutcome::AlreadyCommitted);
    let after = app.resolve(&issued.token).await.unwrap();
    assert_eq!(after.roles(), refreshed.roles());

    assert_eq!(
        app.audit.events_for(AuditAction::VerificationCommitted).len(),
        1
    );
}

#[tokio::test]
async fn failed_compliance_review_rejects_provider_and_keeps_issues() {
    let app = TestApp::with_agents(
        Environment::Dev,
        &[(
            AgentKind::ComplianceReview,
            Behavior::Fail("board sanction on record"),
        )],
    );
    let (issued, identity) = app.signed_in("dr@example.com", &[]).await;
    let before = identity.roles().clone();

    let err = app
        .state
        .orchestrator
        .start(
            &identity,
            Role::Provider,
            serde_json::json!({ "npi": "1234567893", "license": "MD-1", "state": "CA" }),
            None,
        )
        .await
        .unwrap_err();

    let record_id = match err {
        CoreError::VerificationStepFailed {
            record_id,
            failed_checks,
        } => {
            assert_eq!(failed_checks.len(), 1);
            assert!(failed_checks[0].starts_with("Compliance review"));
            assert!(!failed_checks[0].contains("board sanction"));
            record_id
        }
        other => panic!("expected VerificationStepFailed, got {:?}", other),
    };

    let record = app.state.orchestrator.get(&identity, record_id).await.unwrap();
    assert_eq!(record.status, VerificationStatus::Rejected);
    assert_eq!(
        record.issues_for("compliance_review"),
        vec!["board sanction on record".to_string()]
    );

    let after = app.resolve(&issued.token).await.unwrap();
    assert_eq!(after.roles(), &before);
}
