//! Reachability and service probes
//!
//! A probe answers one question, "did `address` answer right now, and how fast", and
//! never fails past its boundary: socket errors, timeouts and resolution failures all
//! come back as a dead [`ProbeResult`].

mod icmp;
mod tcp;

pub use icmp::IcmpProbe;
pub use tcp::TcpProbe;

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::DEFAULT_PROBE_TIMEOUT;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeResult {
    pub alive: bool,
    /// Round-trip or connect time in milliseconds, when known
    pub latency_ms: Option<f64>,
}

impl ProbeResult {
    pub fn alive(latency_ms: Option<f64>) -> Self {
        Self {
            alive: true,
            latency_ms,
        }
    }

    pub fn dead() -> Self {
        Self {
            alive: false,
            latency_ms: None,
        }
    }
}

/// Internal failure reasons, logged and folded into a dead result
#[derive(Error, Debug)]
pub(crate) enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// One way of checking an address
#[async_trait]
pub trait Probe: Send + Sync {
    /// Check `address`; `port` is ignored by probes that don't use one
    async fn check(&self, address: &str, port: u16) -> ProbeResult;
}

/// The two probe variants, selected per check by port
#[derive(Clone)]
pub struct ProbeSet {
    icmp: Arc<dyn Probe>,
    tcp: Arc<dyn Probe>,
}

impl ProbeSet {
    pub fn new(icmp: Arc<dyn Probe>, tcp: Arc<dyn Probe>) -> Self {
        Self { icmp, tcp }
    }

    /// Native ICMP and TCP connect probes bounded by `timeout`
    pub fn system(timeout: Duration) -> Self {
        Self::new(
            Arc::new(IcmpProbe::new(timeout)),
            Arc::new(TcpProbe::new(timeout)),
        )
    }

    /// Port 0 means "ICMP only"; any other port is a TCP service
    pub fn for_port(&self, port: u16) -> &Arc<dyn Probe> {
        if port == 0 { &self.icmp } else { &self.tcp }
    }

    pub async fn check(&self, address: &str, port: u16) -> ProbeResult {
        self.for_port(port).check(address, port).await
    }
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self::system(DEFAULT_PROBE_TIMEOUT)
    }
}

/// Run `work` under the probe's time budget
pub(crate) async fn within<T, F>(timeout: Duration, work: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    tokio::time::timeout(timeout, work)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

/// Resolve a hostname or literal to one IP address
pub(crate) async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed: {}", e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}
