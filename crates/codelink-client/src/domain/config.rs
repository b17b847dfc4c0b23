//! Client configuration types.
//!
//! [`AppConfig`] is the single source of truth for all runtime settings.  It is
//! deserialized from a TOML file (see `infrastructure::storage::config`) and
//! then overridden field by field from CLI arguments in `main.rs`.
//!
//! Every field has a serde default, so an empty file, a missing file, or a file
//! written by an older build all produce a complete configuration:
//!
//! ```toml
//! [discovery]
//! discovery_port = 9091
//! connect_port = 9090
//! max_concurrent_probes = 50
//! fallback_segments = ["192.168.1.0", "192.168.0.0", "10.0.0.0", "172.16.0.0"]
//!
//! [connection]
//! handshake = "structured"
//! heartbeat_interval_ms = 30000
//! ```
//!
//! The fallback segment list and the per-segment limit were picked by hand for
//! typical home and office networks; they are configuration, not protocol.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// LAN scan settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// HTTP port every companion serves its discovery document on.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// HTTP path of the discovery document.
    #[serde(default = "default_discovery_path")]
    pub discovery_path: String,
    /// WebSocket port used for sessions with a discovered companion.
    #[serde(default = "default_connect_port")]
    pub connect_port: u16,
    /// Upper bound on probes in flight at the same time.
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    /// TCP connect timeout for a single probe, in milliseconds.
    #[serde(default = "default_probe_connect_timeout_ms")]
    pub probe_connect_timeout_ms: u64,
    /// Total timeout for a single probe (connect + response), in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// How many host addresses of each fallback segment are scanned.
    #[serde(default = "default_per_segment_limit")]
    pub per_segment_limit: u8,
    /// /24 networks scanned after the local one.  Only the first three octets
    /// are used.
    #[serde(default = "default_fallback_segments")]
    pub fallback_segments: Vec<Ipv4Addr>,
}

impl DiscoveryConfig {
    pub fn probe_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_connect_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Which greeting the client sends after the WebSocket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeMode {
    /// A JSON `ConnectionRequest` message.
    #[default]
    Structured,
    /// The literal text `"hello"`, for companions predating the JSON protocol.
    Legacy,
}

/// Session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Name sent in `ConnectionRequest`.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub handshake: HandshakeMode,
    /// Interval between heartbeat `Ping`s while connected, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Timeout for opening the WebSocket, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging settings used when `RUST_LOG` is not set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_discovery_port() -> u16 {
    9091
}
fn default_discovery_path() -> String {
    "/discover".to_string()
}
fn default_connect_port() -> u16 {
    9090
}
fn default_max_concurrent_probes() -> usize {
    50
}
fn default_probe_connect_timeout_ms() -> u64 {
    2_000
}
fn default_probe_timeout_ms() -> u64 {
    5_000
}
fn default_per_segment_limit() -> u8 {
    50
}
fn default_fallback_segments() -> Vec<Ipv4Addr> {
    vec![
        Ipv4Addr::new(192, 168, 1, 0),
        Ipv4Addr::new(192, 168, 0, 0),
        Ipv4Addr::new(10, 0, 0, 0),
        Ipv4Addr::new(172, 16, 0, 0),
    ]
}
fn default_device_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "codelink-client".to_string())
}
fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            discovery_path: default_discovery_path(),
            connect_port: default_connect_port(),
            max_concurrent_probes: default_max_concurrent_probes(),
            probe_connect_timeout_ms: default_probe_connect_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            per_segment_limit: default_per_segment_limit(),
            fallback_segments: default_fallback_segments(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            handshake: HandshakeMode::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
