//! Configuration for the engine.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key-value store endpoint.
    pub etcd_endpoint: String,

    /// Prefix under which all cluster state lives.
    pub key_prefix: String,

    /// Address for the status API (/healthz, /metrics).
    pub listen_addr: SocketAddr,

    /// Interval between reconcile passes.
    pub reconcile_interval: Duration,

    /// TTL of the engine leadership lease.
    pub lease_ttl: Duration,

    /// Deadline for a single store operation.
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let etcd_endpoint = std::env::var("FLOTILLA_ETCD_ENDPOINT")
            .unwrap_or_else(|_| "http://127.0.0.1:2379".to_string());

        let key_prefix =
            std::env::var("FLOTILLA_KEY_PREFIX").unwrap_or_else(|_| "/flotilla/".to_string());

        let listen_addr = std::env::var("FLOTILLA_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9090".to_string())
            .parse()?;

        let reconcile_interval = Duration::from_secs(
            std::env::var("FLOTILLA_RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        );

        let lease_ttl = Duration::from_secs(
            std::env::var("FLOTILLA_LEASE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );

        let request_timeout = Duration::from_secs(
            std::env::var("FLOTILLA_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
        );

        anyhow::ensure!(
            lease_ttl >= Duration::from_secs(2),
            "lease TTL must be at least 2 seconds"
        );
        anyhow::ensure!(
            request_timeout < lease_ttl / 2,
            "store deadline must be shorter than the lease renewal cadence"
        );

        Ok(Self {
            etcd_endpoint,
            key_prefix,
            listen_addr,
            reconcile_interval,
            lease_ttl,
            request_timeout,
        })
    }
}
