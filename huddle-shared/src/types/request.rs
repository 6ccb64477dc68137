use std::net::IpAddr;

/// Client ip resolved by the access gate and stashed in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub Option<IpAddr>);

/// Request metadata threaded explicitly into operations that audit or broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// Socket.IO connection of the caller, excluded from "to others" broadcasts.
    pub socket_id: Option<String>,
}

impl RequestMeta {
    pub fn new(ip: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip,
            user_agent,
            socket_id: None,
        }
    }

    pub fn with_socket(mut self, socket_id: impl Into<String>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }
}
