use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, runtime::Handle, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensor_logger_service::{
    api::{self, AppState},
    config::Config,
    db,
    ingest::{IngestSettings, Ingestor, StoreSink},
    link_status::LinkStatus,
    serial::{LocatorSettings, PortLocator, SystemPorts},
    store::ReadingStore,
};

/// Spacing between input checks while probing a freshly opened port.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!(url = %config.database_url, "Database ready");

    let store = ReadingStore::new(pool);
    let link = LinkStatus::new();
    let stop = Arc::new(AtomicBool::new(false));
    let state = AppState::new(store.clone(), link.clone())?;

    // Serial ingestion runs on its own thread and blocks on the runtime only
    // to write readings.
    let ingest = {
        let locator = PortLocator::new(
            SystemPorts::new(config.baud_rate),
            LocatorSettings {
                candidates: config.serial_ports.clone(),
                probe_attempts: config.probe_attempts,
                probe_interval: PROBE_INTERVAL,
                strict_utf8: config.strict_utf8,
            },
        );
        let settings = IngestSettings {
            poll_interval: config.poll_interval,
            relocate_delay: config.relocate_delay,
            strict_utf8: config.strict_utf8,
        };
        Ingestor::new(
            locator,
            StoreSink::new(store.clone(), Handle::current()),
            link.clone(),
            settings,
            stop.clone(),
        )
        .spawn()
        .context("Failed to start ingestion thread")?
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    let served = axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    stop.store(true, Ordering::SeqCst);
    match tokio::task::spawn_blocking(move || ingest.join()).await {
        Ok(Ok(())) => info!("Ingestion thread joined"),
        Ok(Err(_)) => error!("Ingestion thread panicked"),
        Err(e) => error!(error = %e, "Failed to join ingestion thread"),
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
