use history_service::{
    build_router,
    config::{Environment, HistoryConfig, MailerMode},
    services::{
        AuditSink, AuditTrail, AuthService, AuthSettings, Database, ExportService, LegacyEventSink,
        Mailer, NullMailer, RateLimiter, SmtpMailer,
    },
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid (short secret, prod OTP
    // echo, missing SMTP settings, ...).
    let config = HistoryConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    // 5xx bodies echo details in dev only.
    service_core::error::set_expose_details(config.environment == Environment::Dev);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting service-history backend"
    );

    let pool = history_service::db::create_pool(&config.database).await?;
    history_service::db::init_schema(&pool).await?;
    tracing::info!("Database initialized successfully");

    let db = Database::new(pool.clone());

    let mailer: Arc<dyn Mailer> = match config.mailer.mode {
        MailerMode::Smtp => {
            let smtp = config.mailer.smtp.as_ref().ok_or_else(|| {
                service_core::error::AppError::ConfigError(anyhow::anyhow!(
                    "SMTP mailer selected without SMTP settings"
                ))
            })?;
            Arc::new(SmtpMailer::new(smtp)?)
        }
        MailerMode::Null => Arc::new(NullMailer),
    };
    tracing::info!(mode = ?config.mailer.mode, "Mailer initialized");

    let sink: Option<Arc<dyn AuditSink>> = config
        .legacy_audit_mirror
        .then(|| Arc::new(LegacyEventSink::new(pool.clone())) as Arc<dyn AuditSink>);
    let audit = AuditTrail::new(db.clone(), sink);

    let limiter = RateLimiter::new(db.clone());
    let auth = AuthService::new(
        db.clone(),
        audit.clone(),
        limiter,
        mailer,
        AuthSettings::from_config(&config),
    );
    let exports = ExportService::new(
        db.clone(),
        audit.clone(),
        config.secret.shared_secret.clone(),
    );

    let state = AppState {
        config: config.clone(),
        db,
        auth,
        exports,
        audit,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
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
}
