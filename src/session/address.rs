use std::net::SocketAddr;

use tungstenite::http::HeaderMap;

pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Resolve the client address behind reverse proxies.
///
/// Precedence: `X-Real-IP`, then the first hop of `X-Forwarded-For`, then
/// the TCP peer.
pub fn resolve_remote_addr(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(real_ip) = header_value(headers, REAL_IP_HEADER) {
        return real_ip.to_string();
    }
    if let Some(first) = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|chain| chain.split(',').map(str::trim).find(|hop| !hop.is_empty()))
    {
        return first.to_string();
    }
    peer.ip().to_string()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
