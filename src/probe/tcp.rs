use std::future::Future;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{Probe, ProbeError, ProbeResult, resolve_address, within};

/// Service check: a TCP connect, closed as soon as it succeeds
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn connect(&self, address: &str, port: u16) -> Result<Duration, ProbeError> {
        self.connect_via(resolve_address(address), port).await
    }

    /// Resolution and connect share one timeout
    async fn connect_via<R>(&self, resolve: R, port: u16) -> Result<Duration, ProbeError>
    where
        R: Future<Output = Result<IpAddr, ProbeError>>,
    {
        let start = Instant::now();
        within(self.timeout, async {
            let ip = resolve.await?;
            let stream = TcpStream::connect((ip, port))
                .await
                .map_err(|e| ProbeError::Network(format!("connect failed: {}", e)))?;
            let elapsed = start.elapsed();

            drop(stream);
            Ok(elapsed)
        })
        .await
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, address: &str, port: u16) -> ProbeResult {
        match self.connect(address, port).await {
            Ok(elapsed) => {
                trace!(address, port, ?elapsed, "connected");
                ProbeResult::alive(Some(elapsed.as_secs_f64() * 1000.0))
            }
            Err(e) => {
                debug!(address, port, "tcp check failed: {e}");
                ProbeResult::dead()
            }
        }
    }
}
