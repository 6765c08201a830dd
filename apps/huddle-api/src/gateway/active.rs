//! Per-channel pointer to the meeting currently live in that channel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMeeting {
    pub meeting_id: String,
    pub started_at: DateTime<Utc>,
}

/// Answer to "is a meeting active in this channel?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMeetingStatus {
    pub active: bool,
    pub meeting_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ActiveMeetingStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            meeting_id: None,
            started_at: None,
        }
    }
}

/// channel_id -> active meeting. At most one meeting per channel.
pub struct ActiveMeetingRegistry {
    channels: DashMap<String, ActiveMeeting>,
}

impl Default for ActiveMeetingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveMeetingRegistry {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    pub fn check(&self, channel_id: &str) -> ActiveMeetingStatus {
        match self.channels.get(channel_id) {
            Some(m) => ActiveMeetingStatus {
                active: true,
                meeting_id: Some(m.meeting_id.clone()),
                started_at: Some(m.started_at),
            },
            None => ActiveMeetingStatus::inactive(),
        }
    }

    pub fn get(&self, channel_id: &str) -> Option<ActiveMeeting> {
        self.channels.get(channel_id).map(|m| m.value().clone())
    }

    /// Make `meeting_id` the channel's active meeting, replacing whatever was
    /// there. Returns the new entry.
    pub fn activate(&self, channel_id: &str, meeting_id: &str) -> ActiveMeeting {
        let meeting = ActiveMeeting {
            meeting_id: meeting_id.to_string(),
            started_at: Utc::now(),
        };
        self.channels.insert(channel_id.to_string(), meeting.clone());
        meeting
    }

    /// Clear the channel's active meeting, but only if it is `meeting_id`.
    ///
    /// A stop for a meeting that is no longer the active one is ignored so it
    /// cannot clobber a newer start. Returns whether an entry was removed.
    pub fn deactivate(&self, channel_id: &str, meeting_id: &str) -> bool {
        self.channels
            .remove_if(channel_id, |_, m| m.meeting_id == meeting_id)
            .is_some()
    }

    /// Clear `meeting_id` from every channel it is active in. Returns the
    /// affected channel IDs, sorted.
    pub fn clear_meeting(&self, meeting_id: &str) -> Vec<String> {
        let mut cleared = Vec::new();
        self.channels.retain(|channel_id, m| {
            if m.meeting_id == meeting_id {
                cleared.push(channel_id.clone());
                false
            } else {
                true
            }
        });
        cleared.sort();
        cleared
    }
}
