//! Meeting session registry with latest-wins deduplication.
//!
//! A user may open the same meeting from several tabs or devices. Each one
//! joins as its own session, but only the most recently joined session stays
//! live: every join collapses the participant back to a single session and
//! reports the evicted ones so the caller can tell them to leave.
//!
//! The eviction advisory is one-way. Whether or not a kicked client honours
//! it, its connection's disconnect sweep removes anything left behind.

use chrono::Utc;
use dashmap::DashMap;

/// One tab/device instance of a participant inside a meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingSession {
    pub session_id: String,
    pub connection_id: String,
    /// Join time in ms since the Unix epoch.
    pub joined_at: i64,
    /// Insertion order within the participant; breaks timestamp ties.
    order: u64,
}

#[derive(Debug, Default)]
struct Participant {
    sessions: Vec<MeetingSession>,
    latest_timestamp: i64,
    next_order: u64,
}

/// A session removed by deduplication, paired with the session that won.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub evicted: MeetingSession,
    pub survivor: MeetingSession,
}

/// Result of a join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub survivor: MeetingSession,
    /// In the order they were originally joined.
    pub evictions: Vec<Eviction>,
}

/// A session removed because its connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweptSession {
    pub meeting_id: String,
    pub user_id: String,
    pub session_id: String,
}

/// (meeting_id, user_id) -> participant sessions
pub struct MeetingSessionRegistry {
    participants: DashMap<(String, String), Participant>,
}

impl Default for MeetingSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingSessionRegistry {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
        }
    }

    /// Register a session joined now and deduplicate the participant.
    pub fn join(
        &self,
        meeting_id: &str,
        user_id: &str,
        session_id: &str,
        connection_id: &str,
    ) -> JoinOutcome {
        self.join_at(
            meeting_id,
            user_id,
            session_id,
            connection_id,
            Utc::now().timestamp_millis(),
        )
    }

    /// Register a session with an explicit join timestamp and deduplicate.
    ///
    /// Insertion and deduplication run under one entry lock, so no other
    /// registry call can observe two live sessions for the participant. The
    /// survivor is the session with the greatest `joined_at`; on equal
    /// timestamps the one inserted last wins. Re-joining with a known
    /// `session_id` refreshes that session instead of adding a new one.
    pub fn join_at(
        &self,
        meeting_id: &str,
        user_id: &str,
        session_id: &str,
        connection_id: &str,
        joined_at: i64,
    ) -> JoinOutcome {
        let mut participant = self
            .participants
            .entry((meeting_id.to_string(), user_id.to_string()))
            .or_default();

        participant.sessions.retain(|s| s.session_id != session_id);
        let joined = MeetingSession {
            session_id: session_id.to_string(),
            connection_id: connection_id.to_string(),
            joined_at,
            order: participant.next_order,
        };
        participant.next_order += 1;
        participant.sessions.push(joined.clone());
        participant.latest_timestamp = participant.latest_timestamp.max(joined_at);

        let survivor = participant.sessions.iter().fold(joined, |best, s| {
            if (s.joined_at, s.order) > (best.joined_at, best.order) {
                s.clone()
            } else {
                best
            }
        });

        let mut evicted: Vec<MeetingSession> = Vec::new();
        participant.sessions.retain(|s| {
            if s.session_id == survivor.session_id {
                true
            } else {
                evicted.push(s.clone());
                false
            }
        });
        evicted.sort_by_key(|s| s.order);

        JoinOutcome {
            evictions: evicted
                .into_iter()
                .map(|evicted| Eviction {
                    evicted,
                    survivor: survivor.clone(),
                })
                .collect(),
            survivor,
        }
    }

    /// Remove one session. Returns `false` if it was not registered.
    pub fn leave(&self, meeting_id: &str, user_id: &str, session_id: &str) -> bool {
        let key = (meeting_id.to_string(), user_id.to_string());
        let removed = match self.participants.get_mut(&key) {
            Some(mut participant) => {
                let before = participant.sessions.len();
                participant.sessions.retain(|s| s.session_id != session_id);
                participant.sessions.len() != before
            }
            None => return false,
        };
        self.participants
            .remove_if(&key, |_, participant| participant.sessions.is_empty());
        removed
    }

    /// Remove every session held by a connection and drop emptied participants.
    pub fn sweep_connection(&self, connection_id: &str) -> Vec<SweptSession> {
        let mut swept = Vec::new();
        self.participants.retain(|(meeting_id, user_id), participant| {
            participant.sessions.retain(|s| {
                if s.connection_id == connection_id {
                    swept.push(SweptSession {
                        meeting_id: meeting_id.clone(),
                        user_id: user_id.clone(),
                        session_id: s.session_id.clone(),
                    });
                    false
                } else {
                    true
                }
            });
            !participant.sessions.is_empty()
        });
        swept
    }

    /// Drop all participants of a meeting. Returns how many were removed.
    pub fn end_meeting(&self, meeting_id: &str) -> usize {
        let mut removed = 0;
        self.participants.retain(|(m, _), _| {
            if m == meeting_id {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Live session IDs of a participant.
    pub fn sessions(&self, meeting_id: &str, user_id: &str) -> Vec<String> {
        self.participants
            .get(&(meeting_id.to_string(), user_id.to_string()))
            .map(|p| p.sessions.iter().map(|s| s.session_id.clone()).collect())
            .unwrap_or_default()
    }

    /// Latest join timestamp seen for a participant.
    pub fn latest_timestamp(&self, meeting_id: &str, user_id: &str) -> Option<i64> {
        self.participants
            .get(&(meeting_id.to_string(), user_id.to_string()))
            .map(|p| p.latest_timestamp)
    }

    /// Users with at least one live session in the meeting, sorted.
    pub fn participants(&self, meeting_id: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .participants
            .iter()
            .filter(|e| e.key().0 == meeting_id)
            .map(|e| e.key().1.clone())
            .collect();
        users.sort();
        users
    }
}
