use identity_service::{
    build_router,
    config::IdentityConfig,
    db,
    services::{AgentRegistry, Database, Ed25519PasskeyVerifier, RedisChallengeStore},
    AppState, Backends,
};
use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
    );
    let metrics = init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let database = Arc::new(Database::new(pool));

    let challenge_store = RedisChallengeStore::new(&config.redis).await?;

    let agents = AgentRegistry::from_config(&config.verification)?;

    let state = AppState::new(
        config.clone(),
        Backends {
            store: database.clone(),
            audit_sink: database,
            challenge_store: Arc::new(challenge_store),
            agents,
            verifier: Arc::new(Ed25519PasskeyVerifier),
        },
        metrics,
    );

    let seed = state
        .orchestrator
        .seed_admins(&config.admin_seed_emails)
        .await?;
    tracing::info!(granted = seed.granted, "Admin seed applied");
    // Bootstrap delivery: operators read these once from the startup log
    for (email, token) in &seed.pending_enrolment {
        tracing::warn!(
            email = %email,
            enrolment_token = %token,
            "Admin has no passkey; enrol the first device with this one-time token"
        );
    }

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.common.shutdown_grace_seconds))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace_seconds: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tokio::time::sleep(tokio::time::Duration::from_secs(grace_seconds)).await;
}
