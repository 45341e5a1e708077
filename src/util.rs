use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const NODEPULSE_PORT: &str = "NODEPULSE_PORT";

const DEFAULT_PORT: u16 = 3000;

pub fn get_port() -> u16 {
    let port_from_env = std::env::var(NODEPULSE_PORT);
    port_from_env.map_or(DEFAULT_PORT, |res| res.parse().unwrap_or(DEFAULT_PORT))
}

const NODEPULSE_ADDR: &str = "NODEPULSE_ADDR";

const DEFAULT_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));

pub fn get_addr() -> IpAddr {
    let addr_from_env = std::env::var(NODEPULSE_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

/// Address the API listens on
///
/// Environment variables win over the config file; an unparsable `bind` falls back to
/// the default.
pub fn bind_address(configured: Option<&str>) -> SocketAddr {
    let env_set = std::env::var(NODEPULSE_PORT).is_ok() || std::env::var(NODEPULSE_ADDR).is_ok();
    match configured.and_then(|bind| bind.parse().ok()) {
        Some(addr) if !env_set => addr,
        _ => SocketAddr::new(get_addr(), get_port()),
    }
}
