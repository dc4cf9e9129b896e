//! IP matching against plain addresses and CIDR ranges.
//!
//! Backs the `ip_match` operator. Entries come either from the condition's
//! `list` parameter or from rule data, in which case each entry may expire.

use crate::compiler::rule_data::{now_secs, DataEntry};
use crate::error::AppsecError;
use crate::matcher::types::MatchFn;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;

/// An address or network, `10.0.0.0/8` style. A plain address is a
/// full-length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    pub network: IpAddr,
    pub prefix_len: u8,
}

impl IpNetwork {
    pub fn parse(input: &str) -> Result<Self, AppsecError> {
        let input = input.trim();
        if input.contains('/') {
            let (network, prefix_len) = parse_cidr(input)?;
            Ok(Self { network, prefix_len })
        } else {
            let network = parse_ip_address(input)?;
            let prefix_len = if network.is_ipv4() { 32 } else { 128 };
            Ok(Self { network, prefix_len })
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (ip, &self.network) {
            (IpAddr::V4(ip4), IpAddr::V4(net4)) => is_ipv4_in_network(*ip4, *net4, self.prefix_len),
            (IpAddr::V6(ip6), IpAddr::V6(net6)) => is_ipv6_in_network(*ip6, *net6, self.prefix_len),
            // IPv4-mapped IPv6 inputs are compared as IPv4
            (IpAddr::V6(ip6), IpAddr::V4(net4)) => ip6
                .to_ipv4_mapped()
                .is_some_and(|ip4| is_ipv4_in_network(ip4, *net4, self.prefix_len)),
            _ => false,
        }
    }
}

/// Create an `ip_match` function. Entries that fail to parse are skipped
/// and returned so the caller can log them.
pub fn create_ip_match(entries: &[DataEntry]) -> (MatchFn, Vec<String>) {
    let mut networks = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for entry in entries {
        match IpNetwork::parse(&entry.value) {
            Ok(network) => networks.push((network, entry.expiration)),
            Err(_) => rejected.push(entry.value.clone()),
        }
    }

    let match_fn: MatchFn = Arc::new(move |value| {
        let ip = parse_ip_address(value).ok()?;
        let now = now_secs();
        networks
            .iter()
            .any(|(network, expiration)| {
                (*expiration == 0 || *expiration > now) && network.contains(&ip)
            })
            .then(|| value.to_string())
    });
    (match_fn, rejected)
}

fn parse_ip_address(ip_str: &str) -> Result<IpAddr, AppsecError> {
    IpAddr::from_str(ip_str.trim()).map_err(|_| AppsecError::InvalidIpAddress(ip_str.to_string()))
}

fn parse_cidr(cidr_str: &str) -> Result<(IpAddr, u8), AppsecError> {
    let (address, prefix) = cidr_str
        .split_once('/')
        .ok_or_else(|| AppsecError::InvalidCidr(cidr_str.to_string()))?;

    let network_ip =
        IpAddr::from_str(address).map_err(|_| AppsecError::InvalidCidr(cidr_str.to_string()))?;

    let prefix_len: u8 = prefix
        .parse()
        .map_err(|_| AppsecError::InvalidCidr(cidr_str.to_string()))?;

    match network_ip {
        IpAddr::V4(_) if prefix_len > 32 => Err(AppsecError::InvalidCidr(cidr_str.to_string())),
        IpAddr::V6(_) if prefix_len > 128 => Err(AppsecError::InvalidCidr(cidr_str.to_string())),
        _ => Ok((network_ip, prefix_len)),
    }
}

fn is_ipv4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }

    let ip_bits = u32::from(ip);
    let network_bits = u32::from(network);
    let mask = u32::MAX << (32 - u32::from(prefix_len));

    (ip_bits & mask) == (network_bits & mask)
}

fn is_ipv6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }

    let ip_bytes = ip.octets();
    let network_bytes = network.octets();

    let full_bytes = (prefix_len / 8) as usize;
    let remaining_bits = prefix_len % 8;

    if ip_bytes[..full_bytes] != network_bytes[..full_bytes] {
        return false;
    }

    if remaining_bits > 0 && full_bytes < 16 {
        let mask = 0xFFu8 << (8 - remaining_bits);
        return ip_bytes[full_bytes] & mask == network_bytes[full_bytes] & mask;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(values: &[(&str, u64)]) -> Vec<DataEntry> {
        values
            .iter()
            .map(|(v, e)| DataEntry {
                value: v.to_string(),
                expiration: *e,
            })
            .collect()
    }

    #[test]
    fn test_plain_and_cidr_entries() {
        let (ip_match, rejected) =
            create_ip_match(&entries(&[("192.168.1.1", 0), ("10.0.0.0/8", 0), ("2001:db8::/32", 0)]));
        assert!(rejected.is_empty());

        assert_eq!(ip_match("192.168.1.1"), Some("192.168.1.1".to_string()));
        assert!(ip_match("192.168.1.2").is_none());
        assert!(ip_match("10.200.3.4").is_some());
        assert!(ip_match("2001:db8::1").is_some());
        assert!(ip_match("2001:db9::1").is_none());
        assert!(ip_match("not an ip").is_none());
    }

    #[test]
    fn test_expired_entries_never_match() {
        let (ip_match, _) = create_ip_match(&entries(&[("192.168.1.1", 1), ("192.168.1.2", u64::MAX)]));
        assert!(ip_match("192.168.1.1").is_none());
        assert!(ip_match("192.168.1.2").is_some());
    }

    #[test]
    fn test_rejected_entries_are_reported() {
        let (_, rejected) = create_ip_match(&entries(&[("300.1.1.1", 0), ("1.2.3.0/33", 0)]));
        assert_eq!(rejected, vec!["300.1.1.1".to_string(), "1.2.3.0/33".to_string()]);
    }

    #[test]
    fn test_network_contains() {
        let net = IpNetwork::parse("192.168.0.0/16").unwrap();
        assert!(net.contains(&"192.168.200.1".parse().unwrap()));
        assert!(!net.contains(&"192.169.0.1".parse().unwrap()));
        assert!(net.contains(&"::ffff:192.168.1.1".parse().unwrap()));

        let all = IpNetwork::parse("0.0.0.0/0").unwrap();
        assert!(all.contains(&"8.8.8.8".parse().unwrap()));

        let v6 = IpNetwork::parse("fe80::/10").unwrap();
        assert!(v6.contains(&"fe80::1".parse().unwrap()));
        assert!(!v6.contains(&"fec0::1".parse().unwrap()));
    }
}
