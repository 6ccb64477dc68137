//! Real-time fan-out. Publishing is fire-and-forget: a failure is logged and
//! never undoes the mutation that triggered it.

pub mod socket;

use std::fmt;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use huddle_shared::AppResult;

use crate::access::RoomAccess;
use crate::store::ChatStore;

pub use socket::SocketBroadcaster;

pub const MESSAGE_SENT: &str = "message.sent";
pub const USER_STATUS: &str = "user.status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// `room.<id>`, restricted to current participants.
    Room(Uuid),
    /// `users`, open to any authenticated subscriber.
    Users,
}

impl Channel {
    pub fn parse(name: &str) -> Option<Self> {
        if name == "users" {
            return Some(Channel::Users);
        }
        name.strip_prefix("room.")
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Channel::Room)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Room(id) => write!(f, "room.{id}"),
            Channel::Users => f.write_str("users"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("broadcast transport error: {0}")]
    Transport(String),
}

pub trait Broadcaster: Send + Sync {
    /// Deliver `payload` to every subscriber of `channel`, except the
    /// connection named by `except_socket`.
    fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: Value,
        except_socket: Option<&str>,
    ) -> Result<(), BroadcastError>;

    /// Drop every live connection of `user_id` from `channel`.
    fn unsubscribe_user(&self, user_id: Uuid, channel: &Channel) -> Result<(), BroadcastError>;
}

/// Publish and log on failure.
pub fn publish(
    hub: &dyn Broadcaster,
    channel: &Channel,
    event: &str,
    payload: Value,
    except_socket: Option<&str>,
) {
    match hub.publish(channel, event, payload, except_socket) {
        Ok(()) => tracing::debug!(channel = %channel, event, "event published"),
        Err(e) => tracing::error!(error = %e, channel = %channel, event, "failed to publish event"),
    }
}

/// Revoke a subscription and log on failure.
pub fn evict(hub: &dyn Broadcaster, user_id: Uuid, channel: &Channel) {
    match hub.unsubscribe_user(user_id, channel) {
        Ok(()) => tracing::debug!(user_id = %user_id, channel = %channel, "subscription revoked"),
        Err(e) => tracing::error!(error = %e, user_id = %user_id, channel = %channel, "failed to revoke subscription"),
    }
}

/// Subscribe-time gate: room channels only admit current participants.
pub fn authorize_subscription(store: &dyn ChatStore, user_id: Uuid, channel: &Channel) -> AppResult<()> {
    match channel {
        Channel::Users => Ok(()),
        Channel::Room(room_id) => {
            RoomAccess::load(store, *room_id, user_id)?.require_participant()?;
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: Channel,
    pub event: String,
    pub payload: Value,
    pub except_socket: Option<String>,
}

/// Keeps every published event and revoked subscription in memory. Used by tests.
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<PublishedEvent>>,
    evictions: Mutex<Vec<(Uuid, Channel)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn evictions(&self) -> Vec<(Uuid, Channel)> {
        self.evictions.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(
        &self,
        channel: &Channel,
        event: &str,
        payload: Value,
        except_socket: Option<&str>,
    ) -> Result<(), BroadcastError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| BroadcastError::Transport("recorder lock poisoned".into()))?;
        events.push(PublishedEvent {
            channel: *channel,
            event: event.to_string(),
            payload,
            except_socket: except_socket.map(str::to_string),
        });
        Ok(())
    }

    fn unsubscribe_user(&self, user_id: Uuid, channel: &Channel) -> Result<(), BroadcastError> {
        self.evictions
            .lock()
            .map_err(|_| BroadcastError::Transport("recorder lock poisoned".into()))?
            .push((user_id, *channel));
        Ok(())
    }
}
