use facility_service::{
    authorizations::ModuleRegistry,
    bootstrap, build_router,
    config::FacilityConfig,
    db,
    reconciler::{HostSystem, Reconciler},
    services::EmailService,
    AppState,
};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = FacilityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    facility_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        posix_mode = ?config.posix.mode,
        "Starting facility service"
    );

    let store = db::connect_store(&config.database).await?;
    tracing::info!("Store initialized");

    let host = Arc::new(HostSystem::new(config.posix.command_timeout));
    let reconciler = Arc::new(Reconciler::new(config.posix.clone(), host.clone(), host));

    let email = Arc::new(EmailService::new(&config.smtp)?);
    tracing::info!("Email service initialized");

    let modules = ModuleRegistry::with_defaults(&config.security.public_url, config.external_timeout);

    let addr = config.common.socket_addr();
    let state = AppState::new(config, store, reconciler, email, modules)?;

    bootstrap::run(&state).await?;

    let service_span = tracing::info_span!(
        "service",
        service = %state.config.service_name,
        version = %state.config.service_version,
    );
    let app = build_router(state);
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
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
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
}
