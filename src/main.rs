use bookstore_backend::api::{self, AppState};
use bookstore_backend::auth::JwtAuthenticator;
use bookstore_backend::config::{AppConfig, StorageBackend};
use bookstore_backend::database::init_pool_from_config;
use bookstore_backend::database::memory::MemoryRepository;
use bookstore_backend::database::postgres::PgRepository;
use bookstore_backend::database::repository::Repository;
use bookstore_backend::logging::init_tracing;
use bookstore_backend::payments::factory::GatewayRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = ?config.storage,
        "Starting bookstore backend"
    );

    let repo: Arc<dyn Repository> = match (&config.storage, &config.database) {
        (StorageBackend::Postgres, Some(database)) => {
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!("Failed to initialize database pool: {}", e);
                e
            })?;
            let repo = PgRepository::new(pool);
            if database.run_migrations {
                repo.run_migrations().await?;
                info!("Database migrations applied");
            }
            Arc::new(repo)
        }
        (StorageBackend::Postgres, None) => {
            anyhow::bail!("DATABASE_URL is required for the postgres storage backend")
        }
        (StorageBackend::Memory, _) => {
            warn!("Using in-memory storage, data is lost on restart");
            Arc::new(MemoryRepository::new())
        }
    };

    let gateways = GatewayRegistry::from_env()?;
    info!(gateways = ?gateways.list_available(), "Payment gateways loaded");

    let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
    let app = api::router(AppState::new(repo, gateways, authenticator));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
