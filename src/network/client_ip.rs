//! Client address resolution
//!
//! The first hop of `X-Forwarded-For` wins; otherwise the TCP peer address.

use std::net::{IpAddr, SocketAddr};

/// Used when neither a forwarded header nor a peer address is available.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Resolve the client address for a request.
///
/// `forwarded_for` is the raw `X-Forwarded-For` header value, if any.
pub fn resolve_client_ip(forwarded_for: Option<&str>, peer: Option<SocketAddr>) -> String {
    if let Some(first) = forwarded_for.and_then(first_forwarded_hop) {
        return first;
    }

    match peer {
        Some(addr) => canonical_ip(addr.ip()),
        None => UNKNOWN_ADDRESS.to_string(),
    }
}

/// First comma-separated element of an `X-Forwarded-For` value.
///
/// Well-formed IPs are normalised (so `::ffff:10.0.0.1` and `10.0.0.1` track
/// as one address); anything else is kept verbatim.
fn first_forwarded_hop(header: &str) -> Option<String> {
    let first = header.split(',').next()?.trim();
    if first.is_empty() {
        return None;
    }

    Some(match first.parse::<IpAddr>() {
        Ok(ip) => canonical_ip(ip),
        Err(_) => first.to_string(),
    })
}

fn canonical_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => v6.to_string(),
        },
        IpAddr::V4(v4) => v4.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_first_hop_wins() {
        let peer: SocketAddr = "192.168.0.10:5555".parse().unwrap();
        let ip = resolve_client_ip(Some("203.0.113.7, 10.0.0.1"), Some(peer));
        assert_eq!(ip, "203.0.113.7");
    }

    #[test]
    fn test_forwarded_hop_is_trimmed() {
        assert_eq!(resolve_client_ip(Some("  198.51.100.2 "), None), "198.51.100.2");
    }

    #[test]
    fn test_peer_used_without_header() {
        let peer: SocketAddr = "192.168.0.10:5555".parse().unwrap();
        assert_eq!(resolve_client_ip(None, Some(peer)), "192.168.0.10");
    }

    #[test]
    fn test_empty_header_falls_back_to_peer() {
        let peer: SocketAddr = "192.168.0.10:5555".parse().unwrap();
        assert_eq!(resolve_client_ip(Some(" , 10.0.0.1"), Some(peer)), "192.168.0.10");
    }

    #[test]
    fn test_mapped_v6_collapses_to_v4() {
        let peer: SocketAddr = "[::ffff:10.1.2.3]:80".parse().unwrap();
        assert_eq!(resolve_client_ip(None, Some(peer)), "10.1.2.3");
        assert_eq!(resolve_client_ip(Some("::ffff:10.1.2.3"), None), "10.1.2.3");
    }

    #[test]
    fn test_non_ip_header_kept_verbatim() {
        assert_eq!(resolve_client_ip(Some("edge-proxy"), None), "edge-proxy");
    }

    #[test]
    fn test_nothing_known() {
        assert_eq!(resolve_client_ip(None, None), UNKNOWN_ADDRESS);
    }
}
