//! codelink entry point.
//!
//! Finds a companion editor on the local network (or uses the address given
//! on the command line), connects to it, and logs the mirrored editor state
//! until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! codelink [OPTIONS]
//!
//! Options:
//!   --config <PATH>        Config file [default: platform config dir]
//!   --host <HOST>          Connect to this host instead of scanning
//!   --port <PORT>          WebSocket port of the companion [default: from config]
//!   --device-name <NAME>   Name sent in the handshake
//!   --legacy-handshake     Greet with plain-text "hello"
//!   --scan-only            List discovered companions and exit
//!   --log-level <LEVEL>    Log level when RUST_LOG is not set
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Description                     |
//! |------------------------|---------------------------------|
//! | `CODELINK_CONFIG`      | Config file path                |
//! | `CODELINK_HOST`        | Companion host                  |
//! | `CODELINK_PORT`        | Companion WebSocket port        |
//! | `CODELINK_DEVICE_NAME` | Name sent in the handshake      |
//! | `CODELINK_LOG_LEVEL`   | Log level                       |
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over the config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use codelink_client::domain::{AppConfig, HandshakeMode};
use codelink_client::infrastructure::storage::config::{load_config, load_config_from, ConfigError};
use codelink_client::ConnectionCoordinator;
use codelink_core::{ConnectionState, ServiceRecord};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Connects to a companion editor on the local network.
#[derive(Debug, Parser)]
#[command(
    name = "codelink",
    about = "LAN discovery and live session client for a companion editor",
    version
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "CODELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Hostname or IP address of the companion.  Skips the LAN scan.
    #[arg(long, env = "CODELINK_HOST")]
    host: Option<String>,

    /// WebSocket port of the companion.
    #[arg(long, env = "CODELINK_PORT")]
    port: Option<u16>,

    /// Name this device announces in the handshake.
    #[arg(long, env = "CODELINK_DEVICE_NAME")]
    device_name: Option<String>,

    /// Greet with the plain-text "hello" used by older companions.
    #[arg(long)]
    legacy_handshake: bool,

    /// Print the discovered companions and exit.
    #[arg(long, conflicts_with = "host")]
    scan_only: bool,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, env = "CODELINK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Loads the config file named by `--config`, or the default one.
    fn load_config(&self) -> anyhow::Result<AppConfig> {
        match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => match load_config() {
                Ok(config) => Ok(config),
                Err(ConfigError::NoPlatformConfigDir) => Ok(AppConfig::default()),
                Err(e) => Err(e).context("failed to load config"),
            },
        }
    }

    /// Applies CLI overrides on top of the loaded config.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.discovery.connect_port = port;
        }
        if let Some(name) = &self.device_name {
            config.connection.device_name = name.clone();
        }
        if self.legacy_handshake {
            config.connection.handshake = HandshakeMode::Legacy;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    /// The companion named on the command line, if any.
    fn manual_target(&self, config: &AppConfig) -> Option<ServiceRecord> {
        self.host
            .as_ref()
            .map(|host| ServiceRecord::manual(host.clone(), config.discovery.connect_port))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = cli.load_config()?;
    cli.apply(&mut config);

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("codelink {} starting", env!("CARGO_PKG_VERSION"));

    let coordinator =
        ConnectionCoordinator::from_config(&config).context("failed to build discovery client")?;

    if cli.scan_only {
        for service in scan(&coordinator).await {
            println!("{service}");
        }
        if let Some(notice) = coordinator.discovery_notice() {
            println!("{notice}");
        }
        return Ok(());
    }

    let target = match cli.manual_target(&config) {
        Some(target) => target,
        None => match scan(&coordinator).await.into_iter().next() {
            Some(found) => found,
            None => bail!("no companion instances found on the local network"),
        },
    };

    coordinator
        .connect(target)
        .await
        .context("failed to start connection")?;

    let result = watch_session(&coordinator).await;
    coordinator.disconnect();
    info!("codelink stopped");
    result
}

/// Runs one scan to completion and returns what it found.
async fn scan(coordinator: &ConnectionCoordinator) -> Vec<ServiceRecord> {
    let mut scanning = coordinator.discovery().subscribe_scanning();
    coordinator.start_scanning();
    info!("{}", coordinator.status_text());
    // The sender lives in the coordinator, so this only ends when the scan does.
    let _ = scanning.wait_for(|busy| !*busy).await;
    info!("{}", coordinator.status_text());
    coordinator.services()
}

/// Logs state and editor changes until Ctrl+C or a failed session.
async fn watch_session(coordinator: &ConnectionCoordinator) -> anyhow::Result<()> {
    let mut state_rx = coordinator.subscribe_state();
    let mut editor_rx = coordinator.subscribe_editor();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                match signal {
                    Ok(()) => info!("received Ctrl+C; disconnecting"),
                    Err(e) => warn!("failed to listen for Ctrl+C signal: {e}"),
                }
                return Ok(());
            }
            changed = state_rx.changed() => {
                changed.context("connection client stopped")?;
                let state = state_rx.borrow_and_update().clone();
                info!("{}", coordinator.status_text());
                if let ConnectionState::Failed(reason) = state {
                    bail!("connection failed: {reason}");
                }
                if let Some(info) = coordinator.connection_info() {
                    info!(
                        "companion: {} {} on {}",
                        info.server.name, info.server.version, info.server.platform
                    );
                }
            }
            changed = editor_rx.changed() => {
                changed.context("coordinator stopped")?;
                let snapshot = editor_rx.borrow_and_update().clone();
                match snapshot {
                    Some(editor) => info!(
                        "editor: {} at {}{}",
                        editor.file_name().unwrap_or("<no file>"),
                        editor.cursor_label(),
                        preview_suffix(&editor.content_preview)
                    ),
                    None => info!("editor: no state"),
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(60)) => {
                info!("{}", coordinator.status_text());
            }
        }
    }
}

fn preview_suffix(preview: &str) -> String {
    match preview.lines().next() {
        Some(line) if !line.trim().is_empty() => format!(" | {}", line.trim()),
        _ => String::new(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_have_no_overrides() {
        // Arrange: parse with no arguments
        let cli = Cli::parse_from(["codelink"]);

        // Assert
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.legacy_handshake);
        assert!(!cli.scan_only);
    }

    #[test]
    fn test_cli_overrides_are_applied_to_config() {
        // Arrange
        let cli = Cli::parse_from([
            "codelink",
            "--port",
            "9500",
            "--device-name",
            "bench-rig",
            "--legacy-handshake",
            "--log-level",
            "debug",
        ]);
        let mut config = AppConfig::default();

        // Act
        cli.apply(&mut config);

        // Assert
        assert_eq!(config.discovery.connect_port, 9500);
        assert_eq!(config.connection.device_name, "bench-rig");
        assert_eq!(config.connection.handshake, HandshakeMode::Legacy);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_without_overrides_config_is_unchanged() {
        let cli = Cli::parse_from(["codelink"]);
        let mut config = AppConfig::default();
        let before = config.clone();
        cli.apply(&mut config);
        assert_eq!(config, before);
    }

    #[test]
    fn test_manual_target_uses_configured_connect_port() {
        // Arrange
        let cli = Cli::parse_from(["codelink", "--host", "10.0.0.5"]);
        let config = AppConfig::default();

        // Act
        let target = cli.manual_target(&config).unwrap();

        // Assert
        assert_eq!(target.endpoint(), "ws://10.0.0.5:9090");
    }

    #[test]
    fn test_scan_only_conflicts_with_host() {
        let result = Cli::try_parse_from(["codelink", "--scan-only", "--host", "10.0.0.5"]);
        tokio_test::assert_err!(result);
    }

    #[test]
    fn test_missing_config_file_loads_defaults() {
        let path = std::env::temp_dir().join(format!("codelink-missing-{}.toml", uuid::Uuid::new_v4()));
        let cli = Cli::parse_from(["codelink", "--config", path.to_str().unwrap()]);
        let config = tokio_test::assert_ok!(cli.load_config());
        assert_eq!(config.discovery, AppConfig::default().discovery);
    }

    #[test]
    fn test_preview_suffix_uses_first_line() {
        assert_eq!(preview_suffix("fn main() {\n}"), " | fn main() {");
        assert_eq!(preview_suffix(""), "");
    }
}
