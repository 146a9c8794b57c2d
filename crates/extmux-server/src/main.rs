//! ExtMux server
//!
//! Serves one extension endpoint and multiplexes it onto a dedicated instance
//! per tenant, provisioned on `subscribe` and removed on `unsubscribe`.
//!
//! Usage:
//! ```bash
//! # With config file
//! extmux-server --config extmux.yaml
//!
//! # Or with environment variables only
//! LC_EXTENSION_NAME=scanner \
//! LC_SHARED_SECRET=... \
//! LC_REFERENCE_SERVICE_URL=https://scanner-reference.example.com \
//! LC_REFERENCE_SHARED_SECRET=... \
//! EXTMUX_PROVISIONER_URL=https://control-plane.example.com \
//! SERVICE_DEFINITION='{"image": "registry.example.com/scanner:1"}' \
//! extmux-server
//! ```
//!
//! Precedence, lowest first: defaults, config file, environment, CLI flags.

mod app;
mod config;

use clap::Parser;
use config::ServerConfig;
use extmux_observability::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// ExtMux - per-tenant extension multiplexer
#[derive(Parser)]
#[command(name = "extmux-server")]
#[command(version = env!("EXTMUX_BUILD"))]
#[command(about = "Multiplexes an extension onto per-tenant instances", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "EXTMUX_CONFIG")]
    config: Option<String>,

    /// Address to bind
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    config.merge_env()?;

    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_tracing(&config)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path);
    }

    config.validate()?;

    info!(
        "Starting ExtMux {} for extension '{}'",
        env!("EXTMUX_BUILD"),
        config.extension.name
    );

    let metrics = Arc::new(Metrics::new()?);
    let store = app::build_store(&config.directory).await?;
    let dispatcher = app::build_dispatcher(&config, store.clone(), metrics.clone()).await?;
    let router = app::build_router(dispatcher, metrics, store);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("ExtMux listening on http://{}", addr);
    info!("   Extension endpoint:  POST http://{}/", addr);
    info!("   Health check:        http://{}/healthz", addr);
    info!("   Readiness check:     http://{}/readyz", addr);
    info!("   Prometheus metrics:  http://{}/metrics", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG directives refine the configured level
    let mut filter = EnvFilter::new(log_level.to_string());
    if let Ok(extra) = std::env::var("RUST_LOG") {
        for directive in extra.split(',').filter(|d| !d.is_empty()) {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(e) => eprintln!("Warning: ignoring log directive '{}': {}", directive, e),
            }
        }
    }

    let builder = FmtSubscriber::builder().with_env_filter(filter);
    if config.logging.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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
