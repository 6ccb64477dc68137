use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use huddle_shared::middleware::resolve_client_ip;
use huddle_shared::types::request::ClientIp;
use huddle_shared::{AppError, ErrorCode};

use crate::services::moderation;
use crate::AppState;

const UNGATED: [&str; 2] = ["/health", "/metrics"];

/// Runs before every other layer: resolves the client ip, rejects blocked
/// addresses and leaves the resolved ip in the request extensions.
pub async fn ip_gate(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    if UNGATED.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|c| c.0);
    let ip = resolve_client_ip(req.headers(), peer, state.config.forwarded_for_proxies());

    if let Some(ip) = ip {
        match moderation::is_ip_blocked(state.store.as_ref(), ip, Utc::now()) {
            Ok(true) => {
                tracing::warn!(ip = %ip, path = %req.uri().path(), "request from blocked ip rejected");
                return AppError::new(ErrorCode::IpBlocked, "Access denied. Your IP address has been blocked.")
                    .into_response();
            }
            Ok(false) => {}
            Err(e) => return e.into_response(),
        }
    }

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}
