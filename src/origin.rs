//! Request origin: where an attempt came from.
//!
//! Resolves the country code and source IP recorded on published events.
//! Loopback peers are replaced with a fixed per-country placeholder so demo
//! traffic produces plausible and reproducible geo telemetry.

use std::net::IpAddr;

pub const UNKNOWN_COUNTRY: &str = "UNKNOWN";

const FALLBACK_PLACEHOLDER_IP: &str = "203.0.113.200";

const COUNTRY_PLACEHOLDER_IPS: &[(&str, &str)] = &[
    ("KR", "203.0.113.10"),
    ("US", "198.51.100.23"),
    ("JP", "192.0.2.44"),
    ("SG", "203.0.113.77"),
    ("GB", "198.51.100.88"),
];

/// Transport-level facts about an attempt, as handed over by the caller.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    /// Country code supplied with the request, unnormalized.
    pub country: Option<String>,
    /// Value of a forwarded-for style header, if any.
    pub forwarded_for: Option<String>,
    /// Peer address of the connection.
    pub peer: Option<IpAddr>,
}

impl Origin {
    pub fn new(country: Option<&str>, peer: Option<IpAddr>) -> Self {
        Self {
            country: country.map(str::to_string),
            forwarded_for: None,
            peer,
        }
    }

    pub fn with_forwarded_for(mut self, header: impl Into<String>) -> Self {
        self.forwarded_for = Some(header.into());
        self
    }

    pub fn resolve(&self) -> ResolvedOrigin {
        let country = normalize_country(self.country.as_deref());
        let source_ip = resolve_source_ip(self.forwarded_for.as_deref(), self.peer, &country);
        ResolvedOrigin { country, source_ip }
    }
}

/// Normalized country and source IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrigin {
    pub country: String,
    pub source_ip: String,
}

/// Blank or absent becomes `UNKNOWN`, anything else is trimmed and upper-cased.
pub fn normalize_country(country: Option<&str>) -> String {
    match country.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_uppercase(),
        _ => UNKNOWN_COUNTRY.to_string(),
    }
}

/// Placeholder IP for a normalized country code.
pub fn placeholder_ip(country: &str) -> &'static str {
    COUNTRY_PLACEHOLDER_IPS
        .iter()
        .find(|(code, _)| *code == country)
        .map(|(_, ip)| *ip)
        .unwrap_or(FALLBACK_PLACEHOLDER_IP)
}

fn resolve_source_ip(forwarded_for: Option<&str>, peer: Option<IpAddr>, country: &str) -> String {
    // first hop of the forwarded chain is the original client
    let forwarded = forwarded_for
        .and_then(|h| h.split(',').map(str::trim).find(|ip| !ip.is_empty()));

    if let Some(ip) = forwarded {
        return match ip.parse::<IpAddr>() {
            Ok(addr) if addr.is_loopback() => placeholder_ip(country).to_string(),
            _ => ip.to_string(),
        };
    }

    match peer {
        Some(addr) if !addr.is_loopback() => addr.to_string(),
        _ => placeholder_ip(country).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn country_blank_is_unknown() {
        assert_eq!(normalize_country(None), "UNKNOWN");
        assert_eq!(normalize_country(Some("")), "UNKNOWN");
        assert_eq!(normalize_country(Some("   ")), "UNKNOWN");
    }

    #[test]
    fn country_is_trimmed_and_upper_cased() {
        assert_eq!(normalize_country(Some(" kr ")), "KR");
        assert_eq!(normalize_country(Some("Us")), "US");
    }

    #[test]
    fn forwarded_header_wins_over_peer() {
        let origin = Origin::new(Some("kr"), Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))))
            .with_forwarded_for("198.18.0.5, 10.0.0.1");
        assert_eq!(origin.resolve().source_ip, "198.18.0.5");
    }

    #[test]
    fn peer_used_without_header() {
        let origin = Origin::new(None, Some(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))));
        let resolved = origin.resolve();
        assert_eq!(resolved.source_ip, "10.1.2.3");
        assert_eq!(resolved.country, "UNKNOWN");
    }

    #[test]
    fn loopback_peer_gets_country_placeholder() {
        let v4 = Origin::new(Some("jp"), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(v4.resolve().source_ip, "192.0.2.44");

        let v6 = Origin::new(Some("GB"), Some(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert_eq!(v6.resolve().source_ip, "198.51.100.88");
    }

    #[test]
    fn unmapped_country_gets_fallback_placeholder() {
        let origin = Origin::new(Some("fr"), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(origin.resolve().source_ip, "203.0.113.200");
    }

    #[test]
    fn placeholder_is_reproducible() {
        let origin = Origin::new(Some("SG"), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(origin.resolve(), origin.resolve());
    }
}
