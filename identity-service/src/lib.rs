pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::IdentityConfig;
use crate::middleware::{capability_gate, session_middleware, CapabilityGate};
use crate::models::Capability;
use crate::services::{
    AgentRegistry, AuditService, AuditSink, AuthorizationGuard, ChallengeService, ChallengeStore,
    DevBypass, IdentityStore, MemberService, OrchestratorSettings, PasskeyService,
    PasskeyVerifier, Requirement, SessionService, VerificationOrchestrator,
};

/// Storage and collaborator implementations the services run over.
pub struct Backends {
    pub store: Arc<dyn IdentityStore>,
    pub audit_sink: Arc<dyn AuditSink>,
    pub challenge_store: Arc<dyn ChallengeStore>,
    pub agents: AgentRegistry,
    pub verifier: Arc<dyn PasskeyVerifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub store: Arc<dyn IdentityStore>,
    pub challenge_store: Arc<dyn ChallengeStore>,
    pub audit: AuditService,
    pub sessions: SessionService,
    pub members: MemberService,
    pub guard: AuthorizationGuard,
    pub passkeys: PasskeyService,
    pub orchestrator: VerificationOrchestrator,
    pub dev_bypass: Option<DevBypass>,
    pub passkey_rate_limiter: IpRateLimiter,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: IdentityConfig,
        backends: Backends,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let Backends {
            store,
            audit_sink,
            challenge_store,
            agents,
            verifier,
        } = backends;

        let audit = AuditService::new(audit_sink);
        let sessions = SessionService::new(
            store.clone(),
            audit.clone(),
            chrono::Duration::days(config.session.ttl_days),
        );
        let members = MemberService::new(store.clone(), sessions.clone(), audit.clone());
        let guard = AuthorizationGuard::new(audit.clone());
        let challenges = ChallengeService::new(
            challenge_store.clone(),
            chrono::Duration::seconds(config.challenge.ttl_seconds),
        )
        .with_enrolment_ttl(chrono::Duration::hours(config.challenge.enrolment_ttl_hours));
        let passkeys = PasskeyService::new(
            store.clone(),
            members.clone(),
            sessions.clone(),
            challenges.clone(),
            verifier,
            audit.clone(),
        );
        let orchestrator = VerificationOrchestrator::new(
            store.clone(),
            members.clone(),
            agents,
            challenges,
            audit.clone(),
            OrchestratorSettings::from(&config.verification),
        );
        let dev_bypass = DevBypass::from_config(&config);
        let passkey_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.passkey_attempts,
            config.rate_limit.passkey_window_seconds,
        );

        Self {
            config,
            store,
            challenge_store,
            audit,
            sessions,
            members,
            guard,
            passkeys,
            orchestrator,
            dev_bypass,
            passkey_rate_limiter,
            metrics,
        }
    }
}

fn gated(
    router: Router<AppState>,
    state: &AppState,
    boundary: &'static str,
    requirement: Requirement,
) -> Router<AppState> {
    router.route_layer(from_fn_with_state(
        CapabilityGate::new(state.guard.clone(), boundary, requirement),
        capability_gate,
    ))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-request-id"),
        ]);

    // Wildcard cannot carry credentials; config validation keeps it out of prod
    if allowed_origins.iter().any(|o| o == "*") {
        return cors.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();
    cors.allow_origin(origins).allow_credentials(true)
}

pub fn build_router(state: AppState) -> Router {
    let passkey_routes = Router::new()
        .route(
            "/auth/passkey/register/options",
            post(handlers::passkey::register_options),
        )
        .route(
            "/auth/passkey/register/verify",
            post(handlers::passkey::register_verify),
        )
        .route(
            "/auth/passkey/login/options",
            post(handlers::passkey::login_options),
        )
        .route(
            "/auth/passkey/login/verify",
            post(handlers::passkey::login_verify),
        )
        .layer(from_fn_with_state(
            state.passkey_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let member_routes = gated(
        Router::new()
            .route("/auth/logout", post(handlers::session::logout))
            .route("/me", get(handlers::session::me))
            .route("/authz/check", post(handlers::session::check)),
        &state,
        "member",
        Requirement::authenticated(),
    );

    let mut verification_routes = Router::new()
        .route(
            "/verifications",
            post(handlers::verification::start).get(handlers::verification::list),
        )
        .route("/verifications/:id", get(handlers::verification::get))
        .route(
            "/verifications/:id/cancel",
            post(handlers::verification::cancel),
        );
    if state.dev_bypass.is_some() {
        verification_routes = verification_routes.route(
            "/verifications/bypass",
            post(handlers::verification::bypass),
        );
    }
    let verification_routes = gated(
        verification_routes,
        &state,
        "verifications",
        Requirement::one(Capability::VerificationRequest),
    );

    let member_admin_routes = gated(
        Router::new()
            .route(
                "/admin/members/:id/deactivate",
                post(handlers::admin::deactivate_member),
            )
            .route("/admin/members/:id/roles", post(handlers::admin::grant_role))
            .route(
                "/admin/members/:id/roles/:role",
                delete(handlers::admin::revoke_role),
            ),
        &state,
        "admin_members",
        Requirement::one(Capability::MembersManage),
    );

    let review_routes = gated(
        Router::new().route(
            "/admin/verifications/:id",
            get(handlers::admin::get_verification),
        ),
        &state,
        "admin_verifications",
        Requirement::one(Capability::VerificationsReview),
    );

    let cors = cors_layer(&state.config.security.allowed_origins);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .merge(passkey_routes)
        .merge(member_routes)
        .merge(verification_routes)
        .merge(member_admin_routes)
        .merge(review_routes)
        // Resolve the session for every route; gates above decide access
        .layer(from_fn_with_state(state.clone(), session_middleware))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}
