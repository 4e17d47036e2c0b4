//! shoprec-engine - real-time recommendation and experimentation service
//!
//! Loads configuration, seeds the catalog, starts the background maintenance
//! loops and serves the HTTP API until Ctrl+C / SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shoprec_common::config::{EngineConfig, CONFIG_ENV_VAR};
use shoprec_engine::catalog::{Catalog, MemoryCatalog};
use shoprec_engine::{build_router, AppState, RecommendationService};

/// Command-line arguments for shoprec-engine
#[derive(Parser, Debug)]
#[command(name = "shoprec-engine")]
#[command(about = "Real-time recommendation and A/B testing service")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long, env = "SHOPREC_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "shoprec_engine={0},shoprec_common={0},tower_http={0}",
                    level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting shoprec-engine v{}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: default search path"),
    }

    let catalog: Arc<dyn Catalog> = match &config.catalog_path {
        Some(path) => {
            let catalog = MemoryCatalog::from_file(path)
                .with_context(|| format!("Failed to load catalog from {}", path.display()))?;
            info!("Loaded {} catalog items from {}", catalog.items().len(), path.display());
            Arc::new(catalog)
        }
        None => {
            warn!("No catalog_path configured, starting with an empty catalog");
            Arc::new(MemoryCatalog::new(Vec::<String>::new()))
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let service = Arc::new(
        RecommendationService::builder(config)
            .catalog(catalog)
            .trending_source()
            .build()
            .context("Failed to initialize recommendation service")?,
    );
    info!("Recommendation service initialized");

    let tasks = service.spawn_background_tasks();
    let app = build_router(AppState::new(service).with_background_tasks(tasks.token()));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tasks.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
