//! Client IP extraction from HTTP headers with trust validation
//!
//! The rate limiter keys on the client IP, so extraction follows the
//! deployment's proxy trust configuration: a vendor header behind
//! Cloudflare, Forwarded / X-Forwarded-For behind a known number of
//! standard proxies, and the socket address otherwise.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{IpConfig, TrustedProxyMode};

/// Extract the client IP address according to the trust configuration,
/// falling back to the socket remote address.
pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &IpConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<IpAddr>().ok())
}

/// Extract IP from standard headers (Forwarded, X-Forwarded-For).
fn extract_standard_ip(headers: &HeaderMap, config: &IpConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    if let Some(ip) = extract_from_forwarded(headers) {
        return Some(ip);
    }

    extract_from_x_forwarded_for(headers, config)
}

/// Parse RFC 7239 Forwarded header: `for=192.0.2.60;proto=http;by=...`.
fn extract_from_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    for element in forwarded.split(',') {
        for param in element.split(';') {
            let param = param.trim();
            if let Some(value) = param.strip_prefix("for=") {
                // Remove quotes, brackets and port if present
                let ip_str = value
                    .trim_matches('"')
                    .trim_start_matches('[')
                    .split(']')
                    .next()
                    .unwrap_or(value)
                    .split(':')
                    .next()
                    .unwrap_or(value);

                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    None
}

/// Parse X-Forwarded-For with right-to-left trust validation.
fn extract_from_x_forwarded_for(headers: &HeaderMap, config: &IpConfig) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        return None;
    }

    // Skip the trusted proxy hops from the right; the next address is the
    // client as seen by the outermost trusted proxy.
    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return Some(ips[ips.len() - num_trusted - 1]);
        }
        // Chain shorter than the trusted depth, return the leftmost
        return ips.first().copied();
    }

    ips.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config(mode: TrustedProxyMode) -> IpConfig {
        IpConfig {
            trusted_proxy_mode: mode,
            num_trusted_proxies: None,
        }
    }

    #[test]
    fn test_none_mode_uses_socket_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(&headers, socket_addr, &config(TrustedProxyMode::None));
        assert_eq!(result, socket_addr);
    }

    #[test]
    fn test_cloudflare_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(
            &headers,
            socket_addr,
            &config(TrustedProxyMode::Cloudflare),
        );
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_cloudflare_header_missing_falls_back() {
        let headers = HeaderMap::new();
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(
            &headers,
            socket_addr,
            &config(TrustedProxyMode::Cloudflare),
        );
        assert_eq!(result, socket_addr);
    }

    #[test]
    fn test_x_forwarded_for_without_trust_depth() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(&headers, socket_addr, &config(TrustedProxyMode::Standard));
        // Rightmost IP in the absence of a configured trust depth
        assert_eq!(result, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_x_forwarded_for_skips_trusted_hops() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1, 10.0.0.1"),
        );
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = IpConfig {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            num_trusted_proxies: Some(1),
        };

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "198.51.100.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_header_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=203.0.113.7;proto=https"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();

        let result = extract_client_ip(&headers, socket_addr, &config(TrustedProxyMode::Standard));
        assert_eq!(result, "203.0.113.7".parse::<IpAddr>().unwrap());
    }
}
