//! Discovered companion services.
//!
//! A companion editor advertises itself over plain HTTP: `GET /discover` on
//! its discovery port returns a small JSON document ([`DiscoveryInfo`]).  A
//! successful probe turns that document into a [`ServiceRecord`], which is
//! what the UI lists and what `connect` is called with.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The JSON body returned by a companion's discovery endpoint.
///
/// ```json
/// {"name":"Studio on mbp","websocket_url":"ws://192.168.1.20:9090","version":"2.1.0","platform":"macOS","app":"Studio"}
/// ```
///
/// All five fields are required; a body missing any of them is treated as a
/// miss, not a companion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    /// Display name of the companion instance.
    pub name: String,
    /// The WebSocket URL the companion advertises (informational; connections
    /// use the probed host and the configured connect port).
    pub websocket_url: String,
    pub version: String,
    pub platform: String,
    /// Application name, e.g. `"Studio"`.
    pub app: String,
}

/// A reachable companion instance found during a scan.
///
/// Records are unique per `(host, port)` within a scan session; see
/// [`ServiceRecord::endpoint_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Identity assigned when the record was created.
    pub id: Uuid,
    /// Display name reported by the companion.
    pub name: String,
    /// Host name or IP address the companion answered on.
    pub host: String,
    /// WebSocket port used for the session.
    pub port: u16,
    pub version: String,
    pub platform: String,
    pub app_name: String,
    /// WebSocket URL as advertised by the companion.
    pub advertised_url: Option<String>,
}

impl ServiceRecord {
    /// Builds a record from a successful discovery probe of `host`.
    pub fn from_discovery(host: impl Into<String>, port: u16, info: DiscoveryInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: info.name,
            host: host.into(),
            port,
            version: info.version,
            platform: info.platform,
            app_name: info.app,
            advertised_url: Some(info.websocket_url),
        }
    }

    /// Builds a record for a companion whose address the user typed in.
    ///
    /// Nothing is known about it yet, so the descriptive fields are empty and
    /// the name falls back to `host:port`.
    pub fn manual(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            id: Uuid::new_v4(),
            name: format!("{host}:{port}"),
            host,
            port,
            version: String::new(),
            platform: String::new(),
            app_name: String::new(),
            advertised_url: None,
        }
    }

    /// The WebSocket URL to connect to: `ws://<host>:<port>`.
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// The `(host, port)` pair that identifies this record within a scan.
    pub fn endpoint_key(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

impl fmt::Display for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.app_name.is_empty() {
            write!(f, "{} ({}:{})", self.name, self.host, self.port)
        } else {
            write!(
                f,
                "{} [{} {} on {}] ({}:{})",
                self.name, self.app_name, self.version, self.platform, self.host, self.port
            )
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
