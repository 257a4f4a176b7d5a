use access_service::{
    build_router,
    config::AccessConfig,
    db,
    services::{metrics::init_metrics, BackgroundTasks, Database, WebhookNotifier},
    AppState, Collaborators,
};
use secrecy::SecretString;
use service_core::error::AppError;
use service_core::middleware::rate_limit::{RateLimiter, RedisRateLimitStore};
use service_core::observability::{init_tracing, shutdown_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = AccessConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    init_metrics().map_err(|e| AppError::ConfigError(anyhow::anyhow!("Metrics: {}", e)))?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting license access service"
    );

    let mut collaborators = match &config.database {
        Some(db_config) => {
            let pool = db::create_pool(db_config)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            tracing::info!("Using PostgreSQL stores");
            Collaborators::postgres(Database::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            Collaborators::in_memory()
        }
    };

    if let Some(url) = &config.redis_url {
        let store = RedisRateLimitStore::connect(url)
            .await
            .map_err(AppError::ConfigError)?;
        collaborators = collaborators.with_rate_limiter(RateLimiter::new(Arc::new(store)));
        tracing::info!("Rate limit counters shared through Redis");
    }

    if let Some(url) = &config.monitor.alert_webhook_url {
        let notifier = WebhookNotifier::new(url.clone()).map_err(AppError::ConfigError)?;
        collaborators = collaborators.with_notifier(Arc::new(notifier));
        tracing::info!("Security alerts dispatched to webhook");
    }

    let state = AppState::new(config.clone(), collaborators)?;

    bootstrap_admin(&state).await?;

    let background = BackgroundTasks::start(
        state.rate_limiter.clone(),
        state.monitor.clone(),
        config.sweeps.intervals(),
    );

    let app = build_router(state).await?;

    let addr = config.common.bind_address()?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.common.shutdown_grace_seconds))
    .await?;

    background.shutdown().await;
    shutdown_tracing();

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Seed the first console administrator from `BOOTSTRAP_ADMIN_EMAIL` and
/// `BOOTSTRAP_ADMIN_PASSWORD`. Existing accounts are left alone.
async fn bootstrap_admin(state: &AppState) -> Result<(), AppError> {
    let (Ok(email), Ok(password)) = (
        std::env::var("BOOTSTRAP_ADMIN_EMAIL"),
        std::env::var("BOOTSTRAP_ADMIN_PASSWORD"),
    ) else {
        return Ok(());
    };

    let user = state
        .auth_service
        .ensure_user(&email, &SecretString::new(password), true)
        .await?;
    tracing::info!(user_id = %user.user_id, "Bootstrap administrator ready");
    Ok(())
}

async fn shutdown_signal(grace_seconds: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
