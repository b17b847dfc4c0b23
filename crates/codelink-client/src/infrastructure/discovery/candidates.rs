//! Candidate address generation for LAN scans.
//!
//! The local /24 network is scanned first because that is where a companion on
//! the same Wi-Fi almost always lives.  The configured fallback segments follow,
//! each limited to its first `per_segment_limit` hosts.  The combined list never
//! contains the same address twice and keeps first-seen order.

use std::collections::HashSet;
use std::net::{Ipv4Addr, UdpSocket};

use tracing::debug;

use crate::domain::DiscoveryConfig;

/// Builds the ordered, duplicate-free list of addresses to probe.
///
/// When `local` is `None` (no usable interface), only the fallback segments are
/// returned.
pub fn generate_candidates(local: Option<Ipv4Addr>, cfg: &DiscoveryConfig) -> Vec<Ipv4Addr> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    if let Some(local) = local {
        let [a, b, c, _] = local.octets();
        for host in 1..=254u8 {
            push_unique(&mut out, &mut seen, Ipv4Addr::new(a, b, c, host));
        }
    }

    let limit = cfg.per_segment_limit.min(254);
    for segment in &cfg.fallback_segments {
        let [a, b, c, _] = segment.octets();
        for host in 1..=limit {
            push_unique(&mut out, &mut seen, Ipv4Addr::new(a, b, c, host));
        }
    }

    out
}

fn push_unique(out: &mut Vec<Ipv4Addr>, seen: &mut HashSet<Ipv4Addr>, addr: Ipv4Addr) {
    if seen.insert(addr) {
        out.push(addr);
    }
}

/// Returns the IPv4 address of the interface used for outbound traffic.
///
/// Connecting a UDP socket sends no packets; it only asks the OS to pick a
/// route, after which the socket's local address is the interface address.
/// Returns `None` when there is no route or only loopback is available.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => {
            debug!("local interface address: {ip}");
            Some(ip)
        }
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_segment_comes_first_and_is_complete() {
        // Arrange
        let cfg = DiscoveryConfig::default();

        // Act
        let candidates = generate_candidates(Some(Ipv4Addr::new(192, 168, 1, 42)), &cfg);

        // Assert
        for (i, addr) in candidates.iter().take(254).enumerate() {
            assert_eq!(*addr, Ipv4Addr::new(192, 168, 1, (i + 1) as u8));
        }
    }

    #[test]
    fn test_fallback_overlap_with_local_segment_is_deduplicated() {
        // Arrange
        let cfg = DiscoveryConfig::default();

        // Act
        let candidates = generate_candidates(Some(Ipv4Addr::new(192, 168, 1, 42)), &cfg);

        // Assert
        let unique: HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len(), "no duplicates");
        // 254 local + 3 remaining fallback segments of 50 each.
        assert_eq!(candidates.len(), 254 + 3 * 50);
        let local_hits = candidates
            .iter()
            .filter(|a| a.octets()[..3] == [192, 168, 1])
            .count();
        assert_eq!(local_hits, 254);
    }

    #[test]
    fn test_fallback_segments_are_capped_to_limit() {
        // Arrange
        let cfg = DiscoveryConfig {
            per_segment_limit: 10,
            ..DiscoveryConfig::default()
        };

        // Act
        let candidates = generate_candidates(Some(Ipv4Addr::new(10, 9, 8, 7)), &cfg);

        // Assert
        assert_eq!(candidates.len(), 254 + 4 * 10);
        assert!(candidates.contains(&Ipv4Addr::new(172, 16, 0, 10)));
        assert!(!candidates.contains(&Ipv4Addr::new(172, 16, 0, 11)));
    }

    #[test]
    fn test_without_local_address_only_fallbacks_are_scanned() {
        let cfg = DiscoveryConfig::default();
        let candidates = generate_candidates(None, &cfg);
        assert_eq!(candidates.len(), 4 * 50);
        assert_eq!(candidates[0], Ipv4Addr::new(192, 168, 1, 1));
    }

    #[test]
    fn test_limit_above_254_never_produces_broadcast_address() {
        let cfg = DiscoveryConfig {
            per_segment_limit: 255,
            fallback_segments: vec![Ipv4Addr::new(10, 0, 0, 0)],
            ..DiscoveryConfig::default()
        };
        let candidates = generate_candidates(None, &cfg);
        assert_eq!(candidates.len(), 254);
        assert!(!candidates.contains(&Ipv4Addr::new(10, 0, 0, 255)));
    }

    #[test]
    fn test_local_ipv4_is_never_loopback() {
        if let Some(ip) = local_ipv4() {
            assert!(!ip.is_loopback());
        }
    }
}
