//! XCM Orchestrator - HTTP service over the cross-chain operations

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use xcm_orchestrator::chain::WsConnector;
use xcm_orchestrator::config::Settings;
use xcm_orchestrator::metrics::MetricsServer;
use xcm_orchestrator::{api, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting XCM Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for relay and {} parachains",
        settings.parachains.len()
    );

    let orchestrator = Arc::new(Orchestrator::from_settings(
        &settings,
        Arc::new(WsConnector::new()),
    ));

    // Key derivation must be ready before any signing request is served
    orchestrator.warm_up().await?;

    if settings.orchestrator.connect_on_startup {
        match orchestrator.initialize_connections().await {
            Ok(report) => info!(
                "Connected to relay {} and {} parachains",
                report.relay_endpoint,
                report.parachain_endpoints.len()
            ),
            Err(e) => warn!("Initial connection failed, will retry on demand: {}", e),
        }
    }

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let orchestrator = orchestrator.clone();
        async move {
            if let Err(e) = api::run_server(config, orchestrator).await {
                error!("API server error: {}", e);
            }
        }
    });

    info!("XCM Orchestrator is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    api_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("XCM Orchestrator stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xcm_orchestrator=debug,hyper=warn"));

    let json = std::env::var("XCM_ORCHESTRATOR_LOG_FORMAT")
        .map(|format| format == "json")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
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
}
