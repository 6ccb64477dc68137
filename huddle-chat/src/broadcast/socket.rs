use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use socketioxide::extract::{Data, SocketRef};
use socketioxide::SocketIo;
use uuid::Uuid;

use huddle_shared::middleware::validate_jwt;
use huddle_shared::types::auth::{AuthUser, Claims};

use super::{authorize_subscription, BroadcastError, Broadcaster, Channel};
use crate::AppState;

/// Every connection joins its own room so a publisher can exclude it.
pub fn connection_room(sid: &str) -> String {
    format!("socket:{sid}")
}

/// Every connection also joins its user's room, so all of a user's sockets
/// can be dropped from a channel at once.
pub fn user_room(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

#[derive(Clone)]
pub struct SocketBroadcaster {
    io: SocketIo,
}

impl SocketBroadcaster {
    pub fn new(io: SocketIo) -> Self {
        Self { io }
    }
}

impl Broadcaster for SocketBroadcaster {
    fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: Value,
        except_socket: Option<&str>,
    ) -> Result<(), BroadcastError> {
        let to = self.io.to(channel.to_string());
        let sent = match except_socket {
            Some(sid) => to.except(connection_room(sid)).emit(event.to_string(), &payload),
            None => to.emit(event.to_string(), &payload),
        };
        sent.map_err(|e| BroadcastError::Transport(e.to_string()))
    }

    fn unsubscribe_user(&self, user_id: Uuid, channel: &Channel) -> Result<(), BroadcastError> {
        self.io
            .to(user_room(user_id))
            .leave(channel.to_string())
            .map_err(|e| BroadcastError::Transport(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

fn get_user(socket: &SocketRef) -> Option<AuthUser> {
    socket.extensions.get::<AuthUser>()
}

pub async fn on_connect_with_state(socket: SocketRef, state: Arc<AppState>) {
    let claims = match authenticate_socket(&socket, &state.config.jwt_secret) {
        Ok(claims) => claims,
        Err(msg) => {
            tracing::warn!(error = %msg, "socket auth failed");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "AUTH_FAILED".into(),
                    message: msg,
                },
            );
            socket.disconnect().ok();
            return;
        }
    };

    if let Err(e) = state.store.ensure_user(claims.sub, claims.name.as_deref()) {
        tracing::warn!(user_id = %claims.sub, error = %e, "failed to register socket user");
    }

    let user = AuthUser::from(claims);
    socket.extensions.insert(user);
    socket.join(connection_room(&socket.id.to_string())).ok();
    socket.join(user_room(user.id)).ok();

    tracing::info!(user_id = %user.id, sid = %socket.id, "socket connected");

    let _ = socket.emit(
        "connected",
        &serde_json::json!({ "user_id": user.id, "socket_id": socket.id.to_string() }),
    );

    socket.on("subscribe", {
        let state = state.clone();
        move |socket: SocketRef, Data::<Value>(payload)| {
            let state = state.clone();
            async move { on_subscribe(socket, payload, &state) }
        }
    });

    socket.on("unsubscribe", |socket: SocketRef, Data::<Value>(payload)| async move {
        if let Some(channel) = channel_of(&payload) {
            socket.leave(channel.to_string()).ok();
        }
    });

    socket.on_disconnect(|socket: SocketRef| async move {
        if let Some(user) = get_user(&socket) {
            tracing::info!(user_id = %user.id, sid = %socket.id, "socket disconnected");
        }
    });
}

/// Accepts `"room.<id>"` or `{"channel": "room.<id>"}`.
fn channel_of(payload: &Value) -> Option<Channel> {
    payload
        .as_str()
        .or_else(|| payload.get("channel").and_then(|v| v.as_str()))
        .and_then(Channel::parse)
}

fn on_subscribe(socket: SocketRef, payload: Value, state: &AppState) {
    let user = match get_user(&socket) {
        Some(user) => user,
        None => return,
    };

    let channel = match channel_of(&payload) {
        Some(channel) => channel,
        None => {
            tracing::warn!(sid = %socket.id, "subscribe with unknown channel");
            let _ = socket.emit(
                "error",
                &ErrorPayload {
                    code: "UNKNOWN_CHANNEL".into(),
                    message: "unknown channel".into(),
                },
            );
            return;
        }
    };

    if let Err(e) = authorize_subscription(state.store.as_ref(), user.id, &channel) {
        tracing::debug!(user_id = %user.id, channel = %channel, error = %e, "subscription refused");
        let _ = socket.emit(
            "error",
            &ErrorPayload {
                code: "SUBSCRIPTION_REFUSED".into(),
                message: e.to_string(),
            },
        );
        return;
    }

    socket.join(channel.to_string()).ok();
    let _ = socket.emit("subscribed", &serde_json::json!({ "channel": channel.to_string() }));
    tracing::debug!(user_id = %user.id, channel = %channel, "subscribed");
}

fn authenticate_socket(socket: &SocketRef, secret: &str) -> Result<Claims, String> {
    let parts = socket.req_parts();

    // ?token=xxx
    let query = parts.uri.query().unwrap_or_default();
    let token = query
        .split('&')
        .find_map(|pair| {
            let mut split = pair.splitn(2, '=');
            let key = split.next()?;
            let value = split.next()?;
            (key == "token").then(|| value.to_string())
        })
        .ok_or_else(|| "missing token query parameter".to_string())?;

    validate_jwt(&token, secret).map_err(|e| e.to_string())
}
