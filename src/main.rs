use std::net::SocketAddr;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edu_audit::api::{self, AppState};
use edu_audit::audit::{AnomalyDetector, AuditLedger, ChainVerifier, IntegrityMonitor};
use edu_audit::config::AppConfig;
use edu_audit::database::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edu_audit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting edu-audit ledger service");

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    let database = Database::new(&config.database_url).await?;
    info!("Database connected");

    database.run_migrations().await?;
    info!("Database migrations completed");

    let ledger = AuditLedger::new(database.clone(), config.ledger.clone());
    let verifier =
        ChainVerifier::new(database.clone()).with_page_size(config.ledger.verify_page_size);
    let detector = AnomalyDetector::new(database.clone(), config.anomaly.clone());

    let monitor = IntegrityMonitor::new(verifier.clone());
    monitor.start(config.monitor.clone()).await?;

    let state = AppState {
        config: config.clone(),
        ledger,
        verifier,
        monitor: monitor.clone(),
        detector,
    };
    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    monitor.stop().await;
    database.close().await;

    if let Err(e) = served {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("edu-audit stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
