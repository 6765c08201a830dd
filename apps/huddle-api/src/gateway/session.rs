//! Per-connection gateway session state.

use std::sync::atomic::{AtomicU64, Ordering};

use super::connections::ChannelBinding;
use super::fanout::Audience;

/// State for a single WebSocket connection.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// The channel/user pair this connection authenticated with. `None` for
    /// unscoped connections.
    pub binding: Option<ChannelBinding>,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(connection_id: String, binding: Option<ChannelBinding>) -> Self {
        Self {
            connection_id,
            binding,
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.channel_id.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.user_id.as_str())
    }

    /// Check whether this connection should receive a payload.
    pub fn accepts(&self, audience: &Audience) -> bool {
        match audience {
            Audience::Connection(id) => *id == self.connection_id,
            Audience::Channel(channel_id) => self.channel_id() == Some(channel_id.as_str()),
            Audience::ChannelExcept {
                channel_id,
                connection_id,
            } => {
                *connection_id != self.connection_id
                    && self.channel_id() == Some(channel_id.as_str())
            }
        }
    }
}
