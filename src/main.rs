//! sigrelay - real-time message relay
//!
//! Accepts websocket clients, announces each one's id and forwards every
//! text message to all other connected clients.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sigrelay::{config::ConfigManager, Config, RelayServer, ShutdownCoordinator};

/// CLI arguments for sigrelay
#[derive(Parser, Debug)]
#[command(name = "sigrelay")]
#[command(about = "sigrelay - real-time websocket message relay")]
#[command(version)]
#[command(long_about = "
sigrelay - real-time websocket message relay

Every client connecting to the websocket endpoint receives
{\"type\":\"client_id\",\"data\":\"<id>\"} and from then on every text
message it sends is forwarded unchanged to all other connected clients.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SIGRELAY_BIND_ADDR     - Bind address (e.g., 0.0.0.0:8000)
  SIGRELAY_WS_PATH       - Websocket endpoint path (e.g., /ws)
  SIGRELAY_SEND_TIMEOUT  - Per-recipient send timeout (e.g., 5s, 500ms)
  SIGRELAY_IDLE_TIMEOUT  - Drop clients silent for this long (e.g., 10m)
  SIGRELAY_ASSETS_DIR    - Directory holding index.html and script.js
  SIGRELAY_LOG_LEVEL     - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "sigrelay.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:8000)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Per-recipient send timeout in seconds
    #[arg(long, help = "Per-recipient send timeout in seconds")]
    pub send_timeout: Option<u64>,

    /// Directory holding index.html and script.js
    #[arg(long, help = "Directory holding index.html and script.js")]
    pub assets_dir: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let config = load_config(&args)?;

    init_tracing(&args, &config)?;

    info!("Starting sigrelay v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        log_config_summary(&config);
        return Ok(());
    }

    log_config_summary(&config);

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let mut server = RelayServer::new(Arc::new(config), shutdown_coordinator.sender());

    // Bind before spawning so a busy port fails startup
    let local_addr = server.bind().await?;
    info!("sigrelay listening on {}", local_addr);

    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Server error: {:#}", e);
        }
    });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
                shutdown_coordinator.trigger();
            }
        }
        _ = &mut server_handle => {
            error!("Server stopped unexpectedly");
            return Ok(());
        }
    }

    info!("Initiating graceful shutdown...");

    if let Err(e) = shutdown_coordinator.wait_for_completion(server_handle).await {
        error!("Shutdown did not complete cleanly: {}", e);
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Load configuration with priority: CLI args > config file > environment > defaults
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = ConfigManager::load(&args.config)?;

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.send_timeout,
        args.assets_dir.as_deref(),
    )?;

    if let Some(log_level) = &args.log_level {
        config.monitoring.log_level = log_level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    Ok(config)
}

fn log_config_summary(config: &Config) {
    info!("  Bind address: {}", config.server.bind_addr);
    info!("  Websocket path: {}", config.server.ws_path);
    info!("  Send timeout: {:?}", config.relay.send_timeout);
    match config.relay.idle_timeout {
        Some(idle) => info!("  Idle timeout: {:?}", idle),
        None => info!("  Idle timeout: disabled"),
    }
    info!(
        "  Static assets: {}",
        if config.assets.enabled {
            config.assets.index_path.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        config.monitoring.log_level.as_str()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
