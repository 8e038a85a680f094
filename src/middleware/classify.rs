//! Network-topology classification of client addresses and Host headers.
//!
//! An address is suspicious when it is not a globally routable unicast
//! address: RFC 1918 private space, loopback, link-local (which covers the
//! cloud metadata range), or one of the well-known metadata endpoints.
//! All functions are pure and return `false` for anything unparseable.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Cloud instance-metadata endpoints (AWS/GCP/Azure, AWS ECS task, Alibaba).
pub const METADATA_ADDRESSES: [&str; 3] = ["169.254.169.254", "169.254.170.2", "100.100.100.200"];

/// IPv4 ranges treated as internal, as (network, prefix length).
const INTERNAL_V4_RANGES: [(Ipv4Addr, u8); 5] = [
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
];

pub fn is_suspicious_address(addr: &str) -> bool {
    is_metadata_address(addr) || parse_ip(addr).is_some_and(is_internal_ip)
}

/// Exact match against the metadata set, both as written and after parsing.
pub fn is_metadata_address(addr: &str) -> bool {
    let trimmed = addr.trim();
    if METADATA_ADDRESSES.contains(&trimmed) {
        return true;
    }
    match parse_ip(trimmed).map(canonical) {
        Some(IpAddr::V4(v4)) => METADATA_ADDRESSES
            .iter()
            .filter_map(|m| m.parse::<Ipv4Addr>().ok())
            .any(|m| m == v4),
        _ => false,
    }
}

/// Classify the address portion of a `Host` header value.
pub fn is_suspicious_host(host_header: &str) -> bool {
    let host = host_without_port(host_header);
    !host.is_empty() && is_suspicious_address(host)
}

/// Strip any `:port` suffix. Bracketed IPv6 (`[::1]:8080`) yields the inner address.
pub fn host_without_port(host_header: &str) -> &str {
    let host = host_header.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default();
    }
    host.split(':').next().unwrap_or_default()
}

fn parse_ip(addr: &str) -> Option<IpAddr> {
    addr.trim().parse().ok()
}

/// Collapse IPv4-mapped IPv6 (`::ffff:a.b.c.d`) to plain IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn is_internal_ip(ip: IpAddr) -> bool {
    match canonical(ip) {
        IpAddr::V4(v4) => INTERNAL_V4_RANGES
            .iter()
            .any(|&(net, prefix)| in_v4_range(v4, net, prefix)),
        IpAddr::V6(v6) => is_internal_v6(v6),
    }
}

fn in_v4_range(ip: Ipv4Addr, net: Ipv4Addr, prefix: u8) -> bool {
    let mask = u32::MAX << (32 - u32::from(prefix));
    u32::from(ip) & mask == u32::from(net) & mask
}

fn is_internal_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || (first & 0xffc0) == 0xfe80 // link-local fe80::/10
        || (first & 0xfe00) == 0xfc00 // unique-local fc00::/7
}
