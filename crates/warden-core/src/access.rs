//! Client address extraction and the static banned-address list.

use http::HeaderMap;
use std::collections::HashSet;
use std::net::IpAddr;

/// Header set by fronting proxies with the original client address chain.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// The authoritative client address for a request.
///
/// When `X-Forwarded-For` is present and non-empty its first comma-separated
/// entry wins; otherwise the TCP peer address is used.
pub fn client_address(headers: &HeaderMap, peer: IpAddr) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

/// Addresses denied on every request. Fixed for the life of the process.
#[derive(Debug, Clone, Default)]
pub struct BannedAddresses {
    addresses: HashSet<String>,
}

impl BannedAddresses {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| a.into().trim().to_string())
                .collect(),
        }
    }

    pub fn is_banned(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn peer() -> IpAddr {
        "192.0.2.10".parse().unwrap()
    }

    #[test]
    fn falls_back_to_peer() {
        assert_eq!(client_address(&HeaderMap::new(), peer()), "192.0.2.10");
    }

    #[test]
    fn first_forwarded_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR,
            HeaderValue::from_static(" 203.0.113.5 , 10.0.0.1, 10.0.0.2"),
        );
        assert_eq!(client_address(&headers, peer()), "203.0.113.5");
    }

    #[test]
    fn empty_forwarded_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" , 10.0.0.1"));
        assert_eq!(client_address(&headers, peer()), "192.0.2.10");
    }

    #[test]
    fn banned_lookup_is_exact() {
        let banned = BannedAddresses::new(["203.0.113.42", " 124.150.162.86 "]);
        assert!(banned.is_banned("203.0.113.42"));
        assert!(banned.is_banned("124.150.162.86"));
        assert!(!banned.is_banned("203.0.113.4"));
        assert_eq!(banned.len(), 2);
    }
}
