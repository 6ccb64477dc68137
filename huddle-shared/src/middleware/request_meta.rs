use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::errors::AppError;
use crate::types::request::{ClientIp, RequestMeta};

pub const SOCKET_ID_HEADER: &str = "x-socket-id";

/// Resolve the caller's ip.
///
/// `trusted_proxies` is `None` when `X-Forwarded-For` is not believed at all;
/// the socket peer is then the client. Otherwise the header only counts when
/// the peer is itself a trusted proxy (or none are listed), and the client is
/// the rightmost hop that is not a trusted proxy. Hops left of that are
/// client-written and ignored.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxies: Option<&[IpAddr]>,
) -> Option<IpAddr> {
    let peer_ip = peer.map(|addr| addr.ip());
    let proxies = match trusted_proxies {
        Some(proxies) => proxies,
        None => return peer_ip,
    };
    if let Some(ip) = peer_ip {
        if !proxies.is_empty() && !proxies.contains(&ip) {
            return Some(ip);
        }
    }

    let forwarded = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => return peer_ip,
    };
    for hop in forwarded.rsplit(',') {
        match hop.trim().parse::<IpAddr>() {
            Ok(ip) if proxies.contains(&ip) => continue,
            Ok(ip) => return Some(ip),
            Err(_) => break,
        }
    }
    peer_ip
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = match parts.extensions.get::<ClientIp>() {
            Some(ClientIp(ip)) => *ip,
            None => {
                let peer = parts.extensions.get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
                resolve_client_ip(&parts.headers, peer, None)
            }
        };

        Ok(RequestMeta {
            ip: ip.map(|ip| ip.to_string()),
            user_agent: header_string(&parts.headers, "user-agent"),
            socket_id: header_string(&parts.headers, SOCKET_ID_HEADER),
        })
    }
}
