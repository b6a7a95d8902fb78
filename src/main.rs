//! runledger - run tracking with hierarchical cost rollups
//!
//! Serves the runledger HTTP API over a SQLite run store, pricing cost items
//! through the configured pricing authority.
//!
//! ## Usage
//!
//! ```bash
//! # Serve with ~/.runledger/config.yaml and environment overrides
//! RUNS_SERVICE_API_KEY=secret runledger
//!
//! # Explicit config file and listen address
//! runledger --config /etc/runledger.yaml --listen 127.0.0.1:8080
//!
//! # With verbose logging
//! runledger -v
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use runledger_api::{AppState, router};
use runledger_config::ServiceConfig;
use runledger_core::error::EXIT_FAILURE;
use runledger_core::{LogGuard, init_logging};
use runledger_cost::RunDatabase;
use runledger_pricing::PricingClient;
use tracing::{error, info};

/// runledger run and cost tracking service
#[derive(Parser, Debug)]
#[command(name = "runledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.runledger/config.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file and environment
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Directory for log files (defaults to ~/.runledger/logs/)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            if let Some(hint) = e.guidance() {
                eprintln!("Hint: {}", hint);
            }
            return ExitCode::from(e.exit_code());
        }
    };
    info!(version = env!("CARGO_PKG_VERSION"), log_dir = %guard.log_dir().display(), "Starting runledger");

    let mut config = match ServiceConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            eprintln!("Error: {}", e);
            if let Some(hint) = e.guidance() {
                eprintln!("Hint: {}", hint);
            }
            return ExitCode::from(e.exit_code());
        }
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => {
            info!("runledger stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("runledger error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> runledger_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose)
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    if let Some(parent) = config.database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db = Arc::new(
        RunDatabase::open(&config.database_path)
            .with_context(|| format!("opening database {}", config.database_path.display()))?,
    );

    let prices = PricingClient::from_config(&config.pricing).context("building pricing client")?;
    let state = AppState::new(db, Arc::new(prices), config.api_key.as_str());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "runledger listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
