//! In-memory per-channel presence tracking with multi-connection support.
//!
//! Presence is per-**user** within a channel, not per-connection. A user stays
//! online in a channel until their last connection bound to it goes away, and a
//! channel's entry is dropped as soon as nobody is left in it.

use std::collections::HashMap;

use dashmap::DashMap;
use serde::Serialize;

/// What happened to a user's presence in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Full snapshot of a channel's online users after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub action: PresenceAction,
    /// Sorted for stable output.
    pub online_users: Vec<String>,
}

/// channel_id -> (user_id -> live connection count)
pub struct PresenceRegistry {
    channels: DashMap<String, HashMap<String, usize>>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Record one more connection for the user in the channel.
    ///
    /// Always returns a `Joined` snapshot so the caller can broadcast it; a
    /// second tab re-announces the same set, which clients treat as a refresh.
    pub fn join(&self, channel_id: &str, user_id: &str) -> PresenceChange {
        let mut users = self.channels.entry(channel_id.to_string()).or_default();
        *users.entry(user_id.to_string()).or_insert(0) += 1;
        PresenceChange {
            action: PresenceAction::Joined,
            online_users: sorted_users(&users),
        }
    }

    /// Release one connection for the user in the channel.
    ///
    /// Returns a `Left` snapshot only when this was the user's last connection.
    /// Returns `None` if the user was not tracked or still has other
    /// connections in the channel.
    pub fn leave(&self, channel_id: &str, user_id: &str) -> Option<PresenceChange> {
        let snapshot = {
            let mut users = self.channels.get_mut(channel_id)?;
            let count = users.get_mut(user_id)?;
            *count = count.saturating_sub(1);
            if *count > 0 {
                return None;
            }
            users.remove(user_id);
            sorted_users(&users)
        };

        if snapshot.is_empty() {
            // The guard above is released; re-check under the shard lock in
            // case another connection joined in between.
            self.channels.remove_if(channel_id, |_, users| users.is_empty());
        }

        Some(PresenceChange {
            action: PresenceAction::Left,
            online_users: snapshot,
        })
    }

    /// Online users of a channel, sorted. Empty for unknown channels.
    pub fn online_users(&self, channel_id: &str) -> Vec<String> {
        self.channels
            .get(channel_id)
            .map(|users| sorted_users(&users))
            .unwrap_or_default()
    }

    pub fn is_online(&self, channel_id: &str, user_id: &str) -> bool {
        self.channels
            .get(channel_id)
            .is_some_and(|users| users.contains_key(user_id))
    }

    /// Whether the registry holds an entry for the channel at all.
    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.contains_key(channel_id)
    }
}

fn sorted_users(users: &HashMap<String, usize>) -> Vec<String> {
    let mut list: Vec<String> = users.keys().cloned().collect();
    list.sort();
    list
}
