//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native sockets are tried RAW first (root or CAP_NET_RAW), then DGRAM (unprivileged on
//! Linux with `ping_group_range`, and on macOS). The blocking exchange runs in
//! `spawn_blocking` so the timing is not skewed by the async scheduler.

use std::io::Read;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tracing::{debug, info, trace, warn};

use super::{Probe, ProbeError, ProbeResult, resolve_address, within};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier/sequence pair so concurrent pings to one host can be told apart
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    info!("ICMP probe: native ICMP unavailable, using ping command");
    IcmpCapability::CommandOnly
}

/// Device-level reachability check: one echo request
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    timeout: Duration,
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Round-trip time in milliseconds; `Ok(None)` is a reply without a usable time
    async fn ping(&self, address: &str) -> Result<Option<f64>, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
        if capability == IcmpCapability::CommandOnly {
            return run_ping_command(address, self.timeout).await;
        }

        // resolution and the echo exchange share one timeout
        let timeout = self.timeout;
        let result = within(timeout, async {
            let ip = resolve_address(address).await?;
            tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
                .await
                .map_err(|e| ProbeError::Network(format!("spawn_blocking failed: {}", e)))
        })
        .await?;

        match result {
            Ok(rtt) => Ok(Some(rtt.as_secs_f64() * 1000.0)),
            Err(NativeError::Unavailable(reason)) => {
                warn!(
                    "native ping unavailable for {}, falling back to command: {}",
                    address, reason
                );
                run_ping_command(address, self.timeout).await
            }
            Err(NativeError::Probe(e)) => Err(e),
        }
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn check(&self, address: &str, _port: u16) -> ProbeResult {
        match self.ping(address).await {
            Ok(latency_ms) => {
                trace!(address, ?latency_ms, "echo reply");
                ProbeResult::alive(latency_ms)
            }
            Err(e) => {
                debug!(address, "ping failed: {e}");
                ProbeResult::dead()
            }
        }
    }
}

/// Native path errors: `Unavailable` means "try the command instead"
enum NativeError {
    Unavailable(String),
    Probe(ProbeError),
}

impl From<ProbeError> for NativeError {
    fn from(e: ProbeError) -> Self {
        NativeError::Probe(e)
    }
}

fn open_socket(ip: IpAddr) -> Result<Socket, NativeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    Socket::new(domain, Type::RAW, Some(protocol))
        .or_else(|_| Socket::new(domain, Type::DGRAM, Some(protocol)))
        .map_err(|e| NativeError::Unavailable(format!("failed to create ICMP socket: {}", e)))
}

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, NativeError> {
    let socket = open_socket(ip)?;

    socket
        .set_write_timeout(Some(timeout))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let (identifier, sequence) = generate_ping_id();
    let (packet, reply_type) = match ip {
        IpAddr::V4(_) => (
            build_echo_request(ICMP_ECHO_REQUEST, identifier, sequence, true),
            ICMP_ECHO_REPLY,
        ),
        // the kernel fills in the ICMPv6 checksum
        IpAddr::V6(_) => (
            build_echo_request(ICMPV6_ECHO_REQUEST, identifier, sequence, false),
            ICMPV6_ECHO_REPLY,
        ),
    };

    let start = Instant::now();
    socket.send(&packet).map_err(|e| {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            NativeError::Unavailable(format!("permission denied: {}", e))
        } else {
            NativeError::Probe(ProbeError::Network(format!("failed to send: {}", e)))
        }
    })?;

    let mut buf = [0u8; 1500];
    loop {
        let remaining = timeout
            .checked_sub(start.elapsed())
            .filter(|d| !d.is_zero())
            .ok_or(ProbeError::Timeout(timeout))?;
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;

        let len = (&socket).read(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                ProbeError::Timeout(timeout)
            }
            _ => ProbeError::Network(format!("failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();

        if is_matching_reply(&buf[..len], reply_type, identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Build an echo request: 8 byte header plus 56 byte payload
fn build_echo_request(kind: u8, identifier: u16, sequence: u16, checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = kind;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    if checksum {
        let sum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
    }

    packet
}

/// Whether `buf` is the reply to our request
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message; DGRAM sockets
/// and IPv6 deliver the ICMP message only. On DGRAM sockets Linux rewrites the
/// identifier, so only type and sequence are compared there.
fn is_matching_reply(buf: &[u8], reply_type: u8, identifier: u16, sequence: u16) -> bool {
    let offset = if reply_type == ICMP_ECHO_REPLY && buf.first().is_some_and(|b| b >> 4 == 4) {
        usize::from(buf[0] & 0x0f) * 4
    } else {
        0
    };
    let Some(icmp) = buf.get(offset..offset + 8) else {
        return false;
    };

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    let id_ok = offset == 0 || reply_id == identifier;

    icmp[0] == reply_type && reply_seq == sequence && id_ok
}

/// Internet checksum (RFC 1071)
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run ping via the system command
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Option<f64>, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let run = Command::new("ping")
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    // -W is not honoured everywhere; bound the child ourselves with a little slack
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), run)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(ProbeError::Command(format!(
            "ping exited with {}: {}",
            output.status,
            stdout.trim()
        )));
    }

    Ok(parse_ping_time(&stdout))
}

/// Milliseconds from the per-packet `time=` field, if present
fn parse_ping_time(output: &str) -> Option<f64> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").ok())
        .as_ref()?;

    re.captures(output)?.name("val")?.as_str().parse().ok()
}
