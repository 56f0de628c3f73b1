//! Lectern server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use lectern_core::config::AppConfig;
use lectern_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lectern - a course video delivery server
#[derive(Parser, Debug)]
#[command(name = "lecternd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LECTERN_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Lectern v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // Check for LECTERN_ environment variables (excluding LECTERN_CONFIG which is just the path)
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("LECTERN_") && key != "LECTERN_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: lecternd --config /path/to/config.toml\n  \
             2. Environment variables: LECTERN_SERVER__BIND=0.0.0.0:8080 lecternd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set LECTERN_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LECTERN_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Reject invalid configuration before opening any sockets. In
    // particular, redirect delivery over a backend that cannot presign must
    // fail here instead of per request.
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;

    // Register Prometheus metrics
    lectern_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = lectern_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage connectivity before accepting requests.
    // This catches configuration errors and connectivity issues early,
    // preventing the server from reporting healthy when storage is unreachable.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    if config.catalog.contents.is_empty() {
        tracing::warn!("Catalog is empty, all video requests will return 404");
    }

    let state = AppState::new(config.clone(), storage);
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
