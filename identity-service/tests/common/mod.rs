//! Shared setup for identity-service integration tests.
//!
//! Everything runs in-process over `MemoryStore`, `MockChallengeStore`,
//! `MemoryAuditSink` and scripted verification agents.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ed25519_dalek::{Signer, SigningKey};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        AgentEndpoint, ChallengeConfig, DatabaseConfig, Environment, IdentityConfig,
        RateLimitConfig, RedisConfig, SecurityConfig, SessionConfig, VerificationConfig,
    },
    models::{EmailAddress, Member, Role, RoleSet},
    services::{
        agents::AgentError,
        passkey::{assertion_message, registration_message, Assertion, NewCredential},
        AgentKind, AgentRegistry, AgentRequest, AgentVerdict, Ed25519PasskeyVerifier,
        IdentityStore, IssuedSession, MemoryAuditSink, MemoryStore, MockChallengeStore,
        ResolvedIdentity, VerificationAgent,
    },
    AppState, Backends,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

pub fn test_config(environment: Environment) -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment,
        service_name: "identity-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        database: DatabaseConfig {
            url: "postgres://localhost/identity_test".to_string(),
            max_connections: 5,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://localhost:6379".to_string(),
        },
        session: SessionConfig {
            ttl_days: 60,
            cookie_name: "session_token".to_string(),
        },
        challenge: ChallengeConfig {
            ttl_seconds: 300,
            enrolment_ttl_hours: 24,
        },
        verification: VerificationConfig {
            agents: Vec::<AgentEndpoint>::new(),
            step_timeout_ms: 200,
            retry_initial_interval_ms: 5,
            retry_max_elapsed_ms: 60,
            abandonment_minutes: 30,
            allow_dev_bypass: false,
        },
        admin_seed_emails: vec![],
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            secure_cookies: false,
        },
        rate_limit: RateLimitConfig {
            passkey_attempts: 1000,
            passkey_window_seconds: 60,
        },
    }
}

/// How a scripted agent answers.
#[derive(Debug, Clone)]
pub enum Behavior {
    Pass,
    Fail(&'static str),
    /// `verified: true` with an outstanding issue.
    Ambiguous,
    Status(u16),
    /// Never answers within any sane timeout.
    Hang,
    /// Fails transiently `n` times, then passes.
    FlakyThenPass(usize),
}

pub struct ScriptedAgent {
    behavior: Behavior,
    calls: AtomicUsize,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl VerificationAgent for ScriptedAgent {
    async fn verify(&self, request: &AgentRequest) -> Result<AgentVerdict, AgentError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        match &self.behavior {
            Behavior::Pass => Ok(AgentVerdict {
                verified: true,
                structured_result: serde_json::json!({ "step": request.step }),
                issues: vec![],
            }),
            Behavior::Fail(issue) => Ok(AgentVerdict {
                verified: false,
                structured_result: serde_json::Value::Null,
                issues: vec![issue.to_string()],
            }),
            Behavior::Ambiguous => Ok(AgentVerdict {
                verified: true,
                structured_result: serde_json::Value::Null,
                issues: vec!["expiry date unreadable".to_string()],
            }),
            Behavior::Status(code) => Err(AgentError::Status(*code)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(AgentError::Transport("hung".to_string()))
            }
            Behavior::FlakyThenPass(failures) => {
                if attempt < *failures {
                    Err(AgentError::Status(503))
                } else {
                    Ok(AgentVerdict {
                        verified: true,
                        structured_result: serde_json::json!({}),
                        issues: vec![],
                    })
                }
            }
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
    pub agents: HashMap<AgentKind, Arc<ScriptedAgent>>,
}

impl TestApp {
    /// Every agent passes.
    pub fn spawn() -> Self {
        Self::with_agents(Environment::Dev, &[])
    }

    /// Agents default to passing; `overrides` replaces individual kinds.
    pub fn with_agents(environment: Environment, overrides: &[(AgentKind, Behavior)]) -> Self {
        Self::build(test_config(environment), overrides)
    }

    pub fn build(config: IdentityConfig, overrides: &[(AgentKind, Behavior)]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let audit = Arc::new(MemoryAuditSink::new());

        let mut agents = HashMap::new();
        let mut registry = AgentRegistry::new();
        for kind in AgentKind::ALL {
            let behavior = overrides
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, b)| b.clone())
                .unwrap_or(Behavior::Pass);
            let agent = ScriptedAgent::new(behavior);
            registry = registry.with(kind, agent.clone());
            agents.insert(kind, agent);
        }

        let state = AppState::new(
            config,
            Backends {
                store: store.clone(),
                audit_sink: audit.clone(),
                challenge_store: Arc::new(MockChallengeStore::new()),
                agents: registry,
                verifier: Arc::new(Ed25519PasskeyVerifier),
            },
            None,
        );

        Self {
            state,
            store,
            audit,
            agents,
        }
    }

    pub fn agent(&self, kind: AgentKind) -> Arc<ScriptedAgent> {
        self.agents[&kind].clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Insert an active member holding `roles` directly into the store.
    pub async fn member_with_roles(&self, email: &str, roles: &[Role]) -> Member {
        let mut member = Member::new(EmailAddress::parse(email).unwrap());
        if !roles.is_empty() {
            member.roles = roles.iter().copied().collect::<RoleSet>();
        }
        self.store.insert_member(&member).await.unwrap();
        member
    }

    /// A signed-in member: the issued token plus its resolved identity.
    pub async fn signed_in(&self, email: &str, roles: &[Role]) -> (IssuedSession, ResolvedIdentity) {
        let member = self.member_with_roles(email, roles).await;
        let issued = self.state.sessions.create_session(&member).await.unwrap();
        let identity = self
            .state
            .sessions
            .resolve_session(&issued.token)
            .await
            .unwrap();
        (issued, identity)
    }

    /// Re-resolve a token to see the member's current roles.
    pub async fn resolve(&self, token: &str) -> Option<ResolvedIdentity> {
        self.state.sessions.resolve_session(token).await
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-forwarded-for", "10.0.0.1");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}

/// A software authenticator holding one Ed25519 key.
pub struct Device {
    signing: SigningKey,
    pub credential_id: String,
}

impl Device {
    pub fn new() -> Self {
        Self {
            signing: SigningKey::from_bytes(&rand::random::<[u8; 32]>()),
            credential_id: format!("cred-{}", uuid::Uuid::new_v4()),
        }
    }

    pub fn public_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing.verifying_key().to_bytes())
    }

    pub fn enroll(&self, challenge: &str) -> NewCredential {
        let signature = self.signing.sign(&registration_message(challenge));
        NewCredential {
            challenge: challenge.to_string(),
            credential_id: self.credential_id.clone(),
            public_key: self.public_key(),
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
            enrolment_token: None,
        }
    }

    pub fn enroll_with_token(&self, challenge: &str, enrolment_token: &str) -> NewCredential {
        NewCredential {
            enrolment_token: Some(enrolment_token.to_string()),
            ..self.enroll(challenge)
        }
    }

    pub fn assert(&self, challenge: &str, counter: u32) -> Assertion {
        let signature = self.signing.sign(&assertion_message(challenge, counter));
        Assertion {
            challenge: challenge.to_string(),
            credential_id: self.credential_id.clone(),
            counter,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        }
    }
}

/// Run first-device registration for `email`, returning the device and session.
pub async fn register_device(app: &TestApp, email: &str) -> (Device, IssuedSession) {
    let email = EmailAddress::parse(email).unwrap();
    let device = Device::new();
    let options = app
        .state
        .passkeys
        .begin_registration(&email, None)
        .await
        .unwrap();
    let issued = app
        .state
        .passkeys
        .finish_registration(&email, device.enroll(&options.challenge), None)
        .await
        .unwrap();
    (device, issued)
}
