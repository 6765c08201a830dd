//! Broadcast router for dispatching gateway events to connections.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connection subscribes
//! and filters events locally against the payload's [`Audience`]. This keeps
//! fan-out cheap for a single-process coordinator.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged).
const BROADCAST_CAPACITY: usize = 4096;

/// Who should receive a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connection bound to the channel.
    Channel(String),
    /// Every connection bound to the channel except one (typically the sender).
    ChannelExcept {
        channel_id: String,
        connection_id: String,
    },
    /// A single connection.
    Connection(String),
}

/// A payload routed to some subset of connected sessions.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub audience: Audience,
    /// The dispatch event name (e.g. "user_presence").
    pub event_name: String,
    pub data: Value,
}

/// The global broadcast hub. Cloneable; store in AppState.
#[derive(Clone)]
pub struct GatewayBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
}

impl Default for GatewayBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each gateway connection should call
    /// this once, before it is registered, to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    pub fn dispatch(&self, payload: BroadcastPayload) {
        // send() returns Err if there are no receivers; nothing to deliver then.
        let _ = self.sender.send(Arc::new(payload));
    }

    pub fn to_channel(&self, channel_id: &str, event_name: &str, data: Value) {
        self.dispatch(BroadcastPayload {
            audience: Audience::Channel(channel_id.to_string()),
            event_name: event_name.to_string(),
            data,
        });
    }

    pub fn to_channel_except(
        &self,
        channel_id: &str,
        connection_id: &str,
        event_name: &str,
        data: Value,
    ) {
        self.dispatch(BroadcastPayload {
            audience: Audience::ChannelExcept {
                channel_id: channel_id.to_string(),
                connection_id: connection_id.to_string(),
            },
            event_name: event_name.to_string(),
            data,
        });
    }

    pub fn to_connection(&self, connection_id: &str, event_name: &str, data: Value) {
        self.dispatch(BroadcastPayload {
            audience: Audience::Connection(connection_id.to_string()),
            event_name: event_name.to_string(),
            data,
        });
    }
}
