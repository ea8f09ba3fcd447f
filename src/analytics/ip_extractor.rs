//! Client IP extraction from HTTP headers with trust validation
//!
//! - `none`: the socket peer address is the client
//! - `cloudflare`: `CF-Connecting-IP`, falling back to the peer address
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, walked right to
//!   left past the configured trusted proxy networks

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::debug;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

pub fn extract_client_ip(headers: &HeaderMap, socket_ip: IpAddr, config: &AnalyticsConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::None => socket_ip,
        TrustedProxyMode::Cloudflare => header_ip(headers, "cf-connecting-ip").unwrap_or_else(|| {
            debug!("CF-Connecting-IP header missing in cloudflare mode, using socket address");
            socket_ip
        }),
        TrustedProxyMode::Standard => {
            let chain = forwarded_chain(headers);
            let chain = if chain.is_empty() {
                x_forwarded_for_chain(headers)
            } else {
                chain
            };
            select_from_chain(&chain, &config.trusted_proxies).unwrap_or(socket_ip)
        }
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// `for=` addresses of every `Forwarded` element, in header order.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let mut chain = Vec::new();
    for value in headers.get_all("forwarded") {
        let Ok(value) = value.to_str() else { continue };
        for element in value.split(',') {
            for param in element.split(';') {
                let param = param.trim();
                let Some((key, raw)) = param.split_once('=') else {
                    continue;
                };
                if !key.eq_ignore_ascii_case("for") {
                    continue;
                }
                if let Some(ip) = parse_forwarded_node(raw) {
                    chain.push(ip);
                }
            }
        }
    }
    chain
}

/// Parse `192.0.2.60`, `"192.0.2.60:4711"` or `"[2001:db8::1]:4711"`.
fn parse_forwarded_node(raw: &str) -> Option<IpAddr> {
    let node = raw.trim().trim_matches('"');
    if let Some(rest) = node.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse() {
        return Some(ip);
    }
    node.rsplit_once(':').and_then(|(host, _port)| host.parse().ok())
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|s| s.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// First address from the right that is not a trusted proxy. When every hop
/// is trusted the leftmost address is the best remaining guess.
fn select_from_chain(chain: &[IpAddr], trusted: &[IpNet]) -> Option<IpAddr> {
    chain
        .iter()
        .rev()
        .find(|ip| !trusted.iter().any(|net| net.contains(*ip)))
        .or_else(|| chain.first())
        .copied()
}

/// Anonymize an IP address by truncating to network prefix
///
/// - IPv4: Truncate to /24 (zero last octet)
/// - IPv6: Truncate to /48 (zero last 80 bits)
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let [a, b, c, _] = addr.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 0))
        }
        IpAddr::V6(addr) => {
            let s = addr.segments();
            IpAddr::V6(Ipv6Addr::new(s[0], s[1], s[2], 0, 0, 0, 0, 0))
        }
    }
}
