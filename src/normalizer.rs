//! Target normalization
//!
//! Turns a raw target string (domain, URL, IPv4 address or CIDR range) into
//! the ordered list of candidate URLs the capture engine will try. The
//! secure scheme always comes first: most targets redirect to it anyway, so
//! trying it first saves a round of failed loads.

use std::net::Ipv4Addr;

/// Expand a raw target into candidate capture URLs.
///
/// - A target that already carries a scheme is passed through untouched.
/// - A CIDR range expands to every host address (network and broadcast
///   excluded for prefixes up to /30, both addresses kept for /31, the
///   single address for /32), each as an https and an http candidate.
/// - Bare IPv4 addresses and domain names get both scheme variants.
pub fn normalize(raw: &str) -> Vec<String> {
    let raw = raw.trim();

    if raw.contains("://") {
        return vec![raw.to_string()];
    }

    if let Some((network, prefix)) = parse_cidr(raw) {
        return expand_hosts(network, prefix)
            .into_iter()
            .flat_map(|ip| scheme_variants(&ip.to_string()))
            .collect();
    }

    scheme_variants(raw)
}

fn scheme_variants(host: &str) -> Vec<String> {
    vec![format!("https://{host}"), format!("http://{host}")]
}

fn parse_cidr(raw: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = raw.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((addr, prefix))
}

fn expand_hosts(addr: Ipv4Addr, prefix: u8) -> Vec<Ipv4Addr> {
    let base = u32::from(addr);
    match prefix {
        32 => vec![addr],
        31 => {
            let network = base & !1;
            vec![Ipv4Addr::from(network), Ipv4Addr::from(network | 1)]
        }
        0 => Vec::new(),
        _ => {
            let mask = u32::MAX << (32 - prefix);
            let network = base & mask;
            let broadcast = network | !mask;
            (network + 1..broadcast).map(Ipv4Addr::from).collect()
        }
    }
}
