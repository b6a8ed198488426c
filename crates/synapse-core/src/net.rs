//! Address and prefix parsing helpers used by the hygiene checker.
//!
//! Std-only: host addresses via `IpAddr::from_str`, prefixes via a local
//! `addr/len` split. No external CIDR crate.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Parse a host address (no prefix length allowed).
pub fn parse_host_addr(s: &str) -> Option<IpAddr> {
    IpAddr::from_str(s).ok()
}

/// Parse an `addr/len` prefix, validating the prefix length against the
/// address family. Returns `(address, prefix_len)`.
pub fn parse_prefix(s: &str) -> Option<(IpAddr, u8)> {
    let (host, len) = s.split_once('/')?;
    let addr = IpAddr::from_str(host).ok()?;
    let len: u8 = len.parse().ok()?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if len > max {
        return None;
    }
    Some((addr, len))
}

/// Whether any bits are set below the prefix boundary. A network prefix
/// (as opposed to an interface address) must have none.
pub fn host_bits_set(addr: IpAddr, prefix_len: u8) -> bool {
    match addr {
        IpAddr::V4(v4) => host_bits_set_v4(v4, prefix_len),
        IpAddr::V6(v6) => host_bits_set_v6(v6, prefix_len),
    }
}

fn host_bits_set_v4(addr: Ipv4Addr, prefix_len: u8) -> bool {
    if prefix_len >= 32 {
        return false;
    }
    let bits = u32::from(addr);
    let host_mask = u32::MAX >> prefix_len;
    bits & host_mask != 0
}

fn host_bits_set_v6(addr: Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len >= 128 {
        return false;
    }
    let bits = u128::from(addr);
    let host_mask = u128::MAX >> prefix_len;
    bits & host_mask != 0
}
