//! Network utilities
//!
//! Address helpers for control and data connections.

use std::net::IpAddr;

/// Formats `host:port`, bracketing IPv6 literals.
pub fn host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, port),
        _ => format!("{}:{}", host, port),
    }
}

/// Whether an address is only reachable inside a private network.
pub fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Picks the address to dial for a passive data connection.
///
/// Servers behind NAT often advertise their private or unspecified address;
/// in that case the control connection's peer address is used instead.
pub fn passive_target(advertised: IpAddr, control_peer: IpAddr) -> IpAddr {
    if advertised.is_unspecified() {
        return control_peer;
    }
    if is_private(&advertised) && !is_private(&control_peer) {
        return control_peer;
    }
    advertised
}
