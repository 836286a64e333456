//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{Context, bail};
use std::path::Path;
use std::net::SocketAddr;
use std::time::Duration;

/// Environment variable prefix for every override
pub const ENV_PREFIX: &str = "SIGRELAY_";

/// Routes served next to the websocket endpoint
const RESERVED_PATHS: [&str; 5] = ["/", "/script.js", "/health", "/stats", "/metrics"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration: defaults, then `SIGRELAY_*` variables, then the file
    pub fn load(path: &Path) -> Result<Config> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Load configuration, resolving environment variables through `lookup`
    ///
    /// Keys present in the file win over the environment; keys the file
    /// leaves out keep their environment or default value.
    pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        config.apply_env(lookup)?;

        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let overlay: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            let mut merged = toml::Value::try_from(&config)
                .context("Failed to serialize base configuration")?;
            merge_toml(&mut merged, overlay);

            config = merged.try_into()
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        } else {
            tracing::warn!("Configuration file not found at {}, using environment and defaults", path.display());
        }

        config.validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }
}

/// Overlay `overlay` onto `base`, recursing into tables
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Config {
    /// Override fields from `SIGRELAY_*` variables resolved through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));

        if let Some(bind_addr) = var("BIND_ADDR") {
            self.server.bind_addr = bind_addr.parse::<SocketAddr>()
                .with_context(|| format!("Invalid SIGRELAY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Some(ws_path) = var("WS_PATH") {
            self.server.ws_path = ws_path;
        }

        if let Some(timeout) = var("SEND_TIMEOUT") {
            self.relay.send_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SIGRELAY_SEND_TIMEOUT: {}", timeout))?;
        }

        if let Some(timeout) = var("IDLE_TIMEOUT") {
            self.relay.idle_timeout = Some(humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SIGRELAY_IDLE_TIMEOUT: {}", timeout))?);
        }

        if let Some(dir) = var("ASSETS_DIR") {
            self.set_assets_dir(Path::new(&dir));
        }

        if let Some(log_level) = var("LOG_LEVEL") {
            self.monitoring.log_level = log_level;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    /// Validate server configuration
    fn validate_server_config(&self) -> Result<()> {
        let ws_path = self.server.ws_path.as_str();
        if !ws_path.starts_with('/') {
            bail!("server.ws_path must start with '/', got '{}'", ws_path);
        }

        if RESERVED_PATHS.contains(&ws_path) {
            bail!("server.ws_path '{}' collides with a built-in route", ws_path);
        }

        if self.server.shutdown_timeout.is_zero() {
            bail!("shutdown_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Validate relay configuration
    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.send_timeout.is_zero() {
            bail!("send_timeout must be greater than 0");
        }

        if self.relay.send_timeout > Duration::from_secs(300) {
            bail!("send_timeout cannot exceed 5 minutes");
        }

        if let Some(idle_timeout) = self.relay.idle_timeout {
            if idle_timeout.is_zero() {
                bail!("idle_timeout must be greater than 0 when set");
            }
        }

        Ok(())
    }

    /// Validate monitoring configuration
    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!("monitoring.log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    /// Point both asset paths into `dir`
    pub fn set_assets_dir(&mut self, dir: &Path) {
        self.assets.index_path = dir.join("index.html");
        self.assets.script_path = dir.join("script.js");
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        send_timeout: Option<u64>,
        assets_dir: Option<&Path>,
    ) -> Result<()> {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            let addr = bind_str.parse::<SocketAddr>()
                .with_context(|| format!("Invalid bind address: {}", bind_str))?;
            self.server.bind_addr = addr;
            tracing::info!("CLI override: bind address set to {}", addr);
        }

        // Override port if provided
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(timeout_secs) = send_timeout {
            self.relay.send_timeout = Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: send timeout set to {}s", timeout_secs);
        }

        if let Some(dir) = assets_dir {
            self.set_assets_dir(dir);
            tracing::info!("CLI override: assets served from {}", dir.display());
        }

        Ok(())
    }
}
