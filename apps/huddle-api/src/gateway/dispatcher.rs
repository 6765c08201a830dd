//! Inbound event dispatch: connection lifecycle, meeting coordination, relays.
//!
//! This is the only code that mutates the connection, presence, meeting
//! session and active-meeting registries. Registry calls are synchronous and
//! complete before any store I/O a handler performs, so a handler never leaves
//! a registry half-updated across an await.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::bus::with_retries;
use crate::error::ApiError;
use crate::models::attachment::{AttachmentStatusUpdate, MeetingStatus};
use crate::models::message::MessageView;
use crate::AppState;

use super::active::ActiveMeetingStatus;
use super::events::{
    ChannelRefPayload, EventName, InboundEvent, MeetingEndedPayload, MeetingSessionPayload,
    SetActiveMeetingPayload, TypingPayload, UpdateMeetingStatusPayload,
};
use super::messaging;
use super::presence::PresenceChange;
use super::session::GatewaySession;

/// Reason carried by `duplicateSessionKicked`.
pub const DUPLICATE_SESSION_REASON: &str = "Joined the meeting from another session";

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Register a freshly admitted connection and announce its user's presence.
///
/// The connection must already be subscribed to the broadcast hub so it sees
/// its own presence event.
pub fn on_connect(state: &AppState, session: &GatewaySession) {
    state
        .connections
        .register(&session.connection_id, session.binding.clone());

    if let Some(binding) = &session.binding {
        let change = state.presence.join(&binding.channel_id, &binding.user_id);
        broadcast_presence(state, &binding.channel_id, &change);
    }
}

/// Remove a connection and sweep everything it held.
///
/// Safe to call for connections that were never registered or already
/// cleaned up: nothing is mutated and nothing is broadcast.
pub fn on_disconnect(state: &AppState, session: &GatewaySession) {
    let Some(entry) = state.connections.remove(&session.connection_id) else {
        return;
    };

    let swept = state.meetings.sweep_connection(&entry.connection_id);
    if !swept.is_empty() {
        tracing::debug!(
            connection_id = %entry.connection_id,
            sessions = swept.len(),
            "swept meeting sessions of closed connection"
        );
    }

    if let Some(binding) = &entry.binding {
        if let Some(change) = state.presence.leave(&binding.channel_id, &binding.user_id) {
            broadcast_presence(state, &binding.channel_id, &change);
        }
    }
}

fn broadcast_presence(state: &AppState, channel_id: &str, change: &PresenceChange) {
    state.broadcast.to_channel(
        channel_id,
        EventName::USER_PRESENCE,
        json!({
            "channelId": channel_id,
            "onlineUsers": change.online_users,
            "action": change.action,
        }),
    );
}

// ---------------------------------------------------------------------------
// Event routing
// ---------------------------------------------------------------------------

/// Handle one client event. Returns the callback reply for events that have
/// one; the caller forwards it only if the client supplied an ack id.
pub async fn handle_event(
    state: &AppState,
    session: &GatewaySession,
    event: &str,
    data: Value,
) -> Option<Value> {
    match event {
        InboundEvent::CHECK_ACTIVE_MEETINGS => {
            let payload: ChannelRefPayload = parse(event, data).unwrap_or_default();
            let channel_id = required(payload.channel_id)
                .or_else(|| session.channel_id().map(str::to_string));
            let status = match channel_id {
                Some(channel_id) => state.active_meetings.check(&channel_id),
                None => ActiveMeetingStatus::inactive(),
            };
            return serde_json::to_value(status).ok();
        }
        InboundEvent::SET_ACTIVE_MEETING => {
            if let Some(payload) = parse::<SetActiveMeetingPayload>(event, data) {
                handle_set_active(state, payload);
            }
        }
        InboundEvent::JOINED_MEETING => {
            if let Some(payload) = parse::<MeetingSessionPayload>(event, data) {
                handle_joined_meeting(state, session, payload);
            }
        }
        InboundEvent::LEFT_MEETING => {
            if let Some(payload) = parse::<MeetingSessionPayload>(event, data) {
                handle_left_meeting(state, session, payload);
            }
        }
        InboundEvent::ROTATE_MIC_STATUS => {
            if let Some(channel_id) = session.channel_id() {
                state
                    .broadcast
                    .to_channel(channel_id, EventName::ROTATE_MIC_STATUS, data);
            }
        }
        InboundEvent::MEETING_ENDED => {
            if let Some(payload) = parse::<MeetingEndedPayload>(event, data) {
                handle_meeting_ended(state, session, payload).await;
            }
        }
        InboundEvent::UPDATE_MEETING_STATUS => {
            if let Some(payload) = parse::<UpdateMeetingStatusPayload>(event, data) {
                handle_update_meeting_status(state, session, payload).await;
            }
        }
        InboundEvent::TYPING_START | InboundEvent::TYPING_END => {
            if let Some(payload) = parse::<TypingPayload>(event, data) {
                relay_typing(state, session, payload, event == InboundEvent::TYPING_START);
            }
        }
        InboundEvent::MESSAGE
        | InboundEvent::NEW_MESSAGE
        | InboundEvent::EDIT_MESSAGE
        | InboundEvent::DELETE_MESSAGE
        | InboundEvent::PIN_MESSAGE
        | InboundEvent::UNPIN_MESSAGE
        | InboundEvent::ATTACHMENT_MESSAGE_CREATED => {
            messaging::handle(state, session, event, data).await;
        }
        other => {
            tracing::debug!(connection_id = %session.connection_id, event = other, "ignoring unknown event");
        }
    }
    None
}

/// Deserialize an event payload, logging and discarding it if malformed.
pub(super) fn parse<T: DeserializeOwned>(event: &str, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(payload) => Some(payload),
        Err(err) => {
            tracing::debug!(event, %err, "ignoring malformed payload");
            None
        }
    }
}

/// Trimmed, non-empty string or `None`.
pub(super) fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Active meetings
// ---------------------------------------------------------------------------

fn handle_set_active(state: &AppState, payload: SetActiveMeetingPayload) {
    let (Some(channel_id), Some(meeting_id), Some(active)) = (
        required(payload.channel_id),
        required(payload.meeting_id),
        payload.active,
    ) else {
        tracing::debug!("setActiveMeetingInChannel missing fields");
        return;
    };
    set_active_meeting(state, &channel_id, &meeting_id, active);
}

/// Start or stop the channel's active meeting and announce the change.
///
/// Stopping is guarded: it only clears the entry if `meeting_id` is the
/// channel's current meeting. Returns whether the registry changed.
pub fn set_active_meeting(state: &AppState, channel_id: &str, meeting_id: &str, active: bool) -> bool {
    if active {
        let meeting = state.active_meetings.activate(channel_id, meeting_id);
        tracing::info!(%channel_id, %meeting_id, "meeting active in channel");
        broadcast_status(state, channel_id, meeting_id, MeetingStatus::Ongoing, Some(meeting.started_at));
        true
    } else if state.active_meetings.deactivate(channel_id, meeting_id) {
        tracing::info!(%channel_id, %meeting_id, "meeting cleared from channel");
        broadcast_status(state, channel_id, meeting_id, MeetingStatus::Ended, None);
        true
    } else {
        tracing::debug!(%channel_id, %meeting_id, "ignoring stop for a meeting that is not active");
        false
    }
}

/// Apply a meeting status transition to the registries.
///
/// `ongoing` activates the meeting in the channel. `ended` clears it (if it is
/// the channel's meeting) and drops every participant session of the meeting.
/// `scheduled` has no registry effect.
pub fn apply_status_update(state: &AppState, channel_id: &str, meeting_id: &str, status: MeetingStatus) {
    match status {
        MeetingStatus::Ongoing => {
            set_active_meeting(state, channel_id, meeting_id, true);
        }
        MeetingStatus::Ended => {
            set_active_meeting(state, channel_id, meeting_id, false);
            let removed = state.meetings.end_meeting(meeting_id);
            tracing::debug!(%meeting_id, participants = removed, "meeting participants removed");
        }
        MeetingStatus::Scheduled => {}
    }
}

/// A meeting ended everywhere: clear it from every channel and drop its
/// participants. Returns the channels that were cleared.
pub fn end_meeting_everywhere(state: &AppState, meeting_id: &str) -> Vec<String> {
    let channels = state.active_meetings.clear_meeting(meeting_id);
    for channel_id in &channels {
        broadcast_status(state, channel_id, meeting_id, MeetingStatus::Ended, None);
    }
    let removed = state.meetings.end_meeting(meeting_id);
    tracing::info!(%meeting_id, channels = channels.len(), participants = removed, "meeting ended");
    channels
}

fn broadcast_status(
    state: &AppState,
    channel_id: &str,
    meeting_id: &str,
    status: MeetingStatus,
    started_at: Option<DateTime<Utc>>,
) {
    state.broadcast.to_channel(
        channel_id,
        EventName::MEETING_STATUS_CHANGED,
        json!({
            "channelId": channel_id,
            "meetingId": meeting_id,
            "status": status,
            "startedAt": started_at,
        }),
    );
}

// ---------------------------------------------------------------------------
// Meeting sessions
// ---------------------------------------------------------------------------

fn handle_joined_meeting(state: &AppState, session: &GatewaySession, payload: MeetingSessionPayload) {
    let Some(user_id) = session.user_id() else {
        return;
    };
    let (Some(meeting_id), Some(session_id)) =
        (required(payload.meeting_id), required(payload.session_id))
    else {
        tracing::debug!(connection_id = %session.connection_id, "joinedMeeting missing meetingId or sessionId");
        return;
    };

    let outcome = state
        .meetings
        .join(&meeting_id, user_id, &session_id, &session.connection_id);

    for eviction in &outcome.evictions {
        tracing::info!(
            %meeting_id,
            %user_id,
            kicked = %eviction.evicted.session_id,
            kept = %eviction.survivor.session_id,
            "duplicate meeting session kicked"
        );
        state.broadcast.to_connection(
            &eviction.evicted.connection_id,
            EventName::DUPLICATE_SESSION_KICKED,
            json!({
                "sessionId": eviction.evicted.session_id,
                "meetingId": meeting_id,
                "userId": user_id,
                "reason": DUPLICATE_SESSION_REASON,
                "action": "leave_immediately",
            }),
        );
        state.broadcast.to_connection(
            &eviction.survivor.connection_id,
            EventName::REMOVE_OLD_PARTICIPANT_SESSION,
            json!({
                "sessionId": eviction.evicted.session_id,
                "survivorSessionId": eviction.survivor.session_id,
                "meetingId": meeting_id,
                "userId": user_id,
            }),
        );
    }
}

fn handle_left_meeting(state: &AppState, session: &GatewaySession, payload: MeetingSessionPayload) {
    let Some(user_id) = session.user_id() else {
        return;
    };
    let (Some(meeting_id), Some(session_id)) =
        (required(payload.meeting_id), required(payload.session_id))
    else {
        tracing::debug!(connection_id = %session.connection_id, "leftMeeting missing meetingId or sessionId");
        return;
    };

    if !state.meetings.leave(&meeting_id, user_id, &session_id) {
        tracing::debug!(%meeting_id, %session_id, "leftMeeting for unknown session");
    }
}

// ---------------------------------------------------------------------------
// Meeting lifecycle with persisted attachments
// ---------------------------------------------------------------------------

async fn handle_meeting_ended(state: &AppState, session: &GatewaySession, payload: MeetingEndedPayload) {
    let meeting_id = required(payload.meeting_id).or_else(|| {
        session
            .channel_id()
            .and_then(|channel_id| state.active_meetings.get(channel_id))
            .map(|m| m.meeting_id)
    });
    let Some(meeting_id) = meeting_id else {
        tracing::debug!(connection_id = %session.connection_id, "meetingEnded without a meeting");
        return;
    };

    end_meeting_everywhere(state, &meeting_id);

    let update = AttachmentStatusUpdate {
        status: MeetingStatus::Ended.as_str().to_string(),
        end_time: Some(Utc::now()),
        participants_count: payload.participants_count,
    };
    refresh_meeting_attachments(state, session, &meeting_id, &update).await;
}

async fn handle_update_meeting_status(
    state: &AppState,
    session: &GatewaySession,
    payload: UpdateMeetingStatusPayload,
) {
    let channel_id =
        required(payload.channel_id).or_else(|| session.channel_id().map(str::to_string));
    let (Some(channel_id), Some(meeting_id), Some(status)) = (
        channel_id,
        required(payload.meeting_id),
        payload.status.as_deref().and_then(MeetingStatus::parse),
    ) else {
        tracing::debug!(connection_id = %session.connection_id, "updateMeetingStatus missing or invalid fields");
        return;
    };

    apply_status_update(state, &channel_id, &meeting_id, status);

    let end_time = match status {
        MeetingStatus::Ended => Some(payload.end_time.unwrap_or_else(Utc::now)),
        _ => None,
    };
    let update = AttachmentStatusUpdate {
        status: status.as_str().to_string(),
        end_time,
        participants_count: payload.participants_count,
    };
    refresh_meeting_attachments(state, session, &meeting_id, &update).await;
}

/// Apply a status update to every attachment of a meeting and re-broadcast
/// each owning message.
///
/// Every attachment is handled on its own with bounded retries; one failure
/// does not undo or stop the others. The originator gets a single `error`
/// event if anything failed.
async fn refresh_meeting_attachments(
    state: &AppState,
    session: &GatewaySession,
    meeting_id: &str,
    update: &AttachmentStatusUpdate,
) {
    let retries = state.config.persist_retries;
    let attachments =
        match with_retries(retries, || state.store.attachments_for_meeting(meeting_id)).await {
            Ok(found) => found,
            Err(err) => {
                tracing::error!(%meeting_id, %err, "failed to load meeting attachments");
                messaging::report_error(state, session, "Failed to update meeting");
                return;
            }
        };

    let mut failures = 0usize;
    for attachment in attachments {
        let result: Result<Option<MessageView>, ApiError> = async {
            with_retries(retries, || {
                state.store.update_attachment_status(&attachment.id, update)
            })
            .await?;
            let message =
                with_retries(retries, || state.store.find_message_by_attachment(&attachment.id))
                    .await?;
            match message {
                Some(message) => state.store.message_view(message).await.map(Some),
                None => Ok(None),
            }
        }
        .await;

        match result {
            Ok(Some(view)) => {
                let channel_id = view.message.channel_id.clone();
                match serde_json::to_value(&view) {
                    Ok(data) => state
                        .broadcast
                        .to_channel(&channel_id, EventName::MESSAGE_UPDATED, data),
                    Err(err) => tracing::error!(%err, "failed to serialize message"),
                }
            }
            Ok(None) => {
                tracing::debug!(attachment_id = %attachment.id, "meeting attachment has no message");
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(attachment_id = %attachment.id, %meeting_id, %err, "meeting attachment update failed");
            }
        }
    }

    if failures > 0 {
        messaging::report_error(state, session, "Failed to update meeting");
    }
}

// ---------------------------------------------------------------------------
// Relays
// ---------------------------------------------------------------------------

fn relay_typing(state: &AppState, session: &GatewaySession, payload: TypingPayload, is_typing: bool) {
    let (Some(binding), Some(username)) = (&session.binding, required(payload.username)) else {
        return;
    };
    state.broadcast.to_channel_except(
        &binding.channel_id,
        &session.connection_id,
        EventName::USER_TYPING,
        json!({
            "channelId": binding.channel_id,
            "userId": binding.user_id,
            "username": username,
            "isTyping": is_typing,
        }),
    );
}
