//! Connection registry and admission.
//!
//! Tracks every live gateway connection together with the `(channel, user)`
//! pair it was admitted with. Channel group membership is derived from this
//! binding; the broadcast router filters on it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;

use crate::error::ApiError;

/// Credentials supplied at connect time as query parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayParams {
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
}

/// The channel/user pair a connection is bound to for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub channel_id: String,
    pub user_id: String,
}

impl ChannelBinding {
    /// Admit a channel-scoped connection. Both credentials must be present and
    /// non-blank; nothing is registered here.
    pub fn admit(params: &GatewayParams) -> Result<Self, ApiError> {
        let channel_id = non_blank(params.channel_id.as_deref());
        let user_id = non_blank(params.user_id.as_deref());
        match (channel_id, user_id) {
            (Some(channel_id), Some(user_id)) => Ok(Self {
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
            }),
            _ => Err(ApiError::unauthorized(
                "channelId and userId are required for channel connections",
            )),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A registered connection.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub connection_id: String,
    pub binding: Option<ChannelBinding>,
    pub connected_at: DateTime<Utc>,
}

pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn register(&self, connection_id: &str, binding: Option<ChannelBinding>) -> ConnectionEntry {
        let entry = ConnectionEntry {
            connection_id: connection_id.to_string(),
            binding,
            connected_at: Utc::now(),
        };
        self.connections
            .insert(connection_id.to_string(), entry.clone());
        entry
    }

    /// Remove a connection. Returns `None` if it was never registered or was
    /// already removed.
    pub fn remove(&self, connection_id: &str) -> Option<ConnectionEntry> {
        self.connections.remove(connection_id).map(|(_, entry)| entry)
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionEntry> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
