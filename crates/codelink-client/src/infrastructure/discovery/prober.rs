//! Single-address discovery probes.
//!
//! A probe is one `GET http://<ip>:<discovery_port><discovery_path>`.  The
//! companion answers with a [`DiscoveryInfo`] JSON body; anything else (refused
//! connection, timeout, non-200 status, body that does not match the schema) is
//! a [`ProbeMiss`].  Misses are expected for almost every candidate of a scan,
//! so callers log them at `trace` and move on.
//!
//! The [`ServiceProber`] trait is the seam between the scan engine and the
//! network, so the engine's concurrency and cancellation can be tested with a
//! mock prober and no sockets.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use codelink_core::{DiscoveryInfo, ServiceRecord};
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::domain::DiscoveryConfig;

/// Why a candidate did not turn into a [`ServiceRecord`].
#[derive(Debug, Error)]
pub enum ProbeMiss {
    /// Connection refused, reset, or timed out.
    #[error("no response: {0}")]
    Unreachable(String),

    /// Something answered, but not with 200 OK.
    #[error("unexpected status {0}")]
    Status(u16),

    /// 200 OK, but the body is not a discovery document.
    #[error("not a discovery document: {0}")]
    InvalidBody(String),
}

/// Tests one candidate address for a companion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceProber: Send + Sync + 'static {
    /// Probes `host`, returning a record on success.
    async fn probe(&self, host: Ipv4Addr) -> Result<ServiceRecord, ProbeMiss>;
}

/// [`ServiceProber`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
    discovery_port: u16,
    discovery_path: String,
    connect_port: u16,
}

impl HttpProber {
    /// Builds a prober with the connect and total timeouts from `cfg`.
    ///
    /// Proxy settings from the environment are ignored: candidates are LAN
    /// addresses and must be reached directly.
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` error if the HTTP client cannot be constructed
    /// (e.g. the TLS backend fails to initialise).
    pub fn new(cfg: &DiscoveryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(cfg.probe_connect_timeout())
            .timeout(cfg.probe_timeout())
            .no_proxy()
            .user_agent(concat!("codelink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            discovery_port: cfg.discovery_port,
            discovery_path: normalise_path(&cfg.discovery_path),
            connect_port: cfg.connect_port,
        })
    }

    fn url_for(&self, host: Ipv4Addr) -> String {
        format!("http://{host}:{}{}", self.discovery_port, self.discovery_path)
    }
}

#[async_trait]
impl ServiceProber for HttpProber {
    async fn probe(&self, host: Ipv4Addr) -> Result<ServiceRecord, ProbeMiss> {
        let response = self
            .client
            .get(self.url_for(host))
            .send()
            .await
            .map_err(|e| ProbeMiss::Unreachable(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(ProbeMiss::Status(response.status().as_u16()));
        }

        let info: DiscoveryInfo = response
            .json()
            .await
            .map_err(|e| ProbeMiss::InvalidBody(e.to_string()))?;

        Ok(ServiceRecord::from_discovery(
            host.to_string(),
            self.connect_port,
            info,
        ))
    }
}

fn normalise_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
