//! Gateway opcodes, event names, and wire-format messages.

use chrono::{DateTime, Utc};
use huddle_common::id::string_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_EVENT: u8 = 2;
pub const OP_ACK: u8 = 5;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            ack: None,
            d: data,
        }
    }

    /// Build a callback reply (op=5) for a client event that carried an ack id.
    pub fn ack(ack: u64, data: Value) -> Self {
        Self {
            op: OP_ACK,
            t: None,
            s: None,
            ack: Some(ack),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            ack: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub ack: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Inbound event payloads
//
// Every field is optional: a payload missing a required field is ignored by
// the dispatcher rather than rejected.
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRefPayload {
    pub channel_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveMeetingPayload {
    pub channel_id: Option<String>,
    pub meeting_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingSessionPayload {
    pub meeting_id: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEndedPayload {
    pub meeting_id: Option<String>,
    pub participants_count: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMeetingStatusPayload {
    pub channel_id: Option<String>,
    pub meeting_id: Option<String>,
    pub status: Option<String>,
    pub end_time: Option<DateTime<Utc>>,
    pub participants_count: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentPayload {
    pub kind: Option<String>,
    pub meeting_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub status: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub content: Option<String>,
    pub attachment: Option<AttachmentPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    #[serde(default, with = "string_id::option")]
    pub message_id: Option<i64>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRefPayload {
    #[serde(default, with = "string_id::option")]
    pub message_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub username: Option<String>,
}

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// Events accepted from clients.
pub struct InboundEvent;

impl InboundEvent {
    pub const CHECK_ACTIVE_MEETINGS: &'static str = "checkActiveMeetingsInChannel";
    pub const SET_ACTIVE_MEETING: &'static str = "setActiveMeetingInChannel";
    pub const JOINED_MEETING: &'static str = "joinedMeeting";
    pub const LEFT_MEETING: &'static str = "leftMeeting";
    pub const ROTATE_MIC_STATUS: &'static str = "rotateMicStatus";
    pub const MEETING_ENDED: &'static str = "meetingEnded";
    pub const UPDATE_MEETING_STATUS: &'static str = "updateMeetingStatus";
    pub const MESSAGE: &'static str = "message";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const EDIT_MESSAGE: &'static str = "edit_message";
    pub const DELETE_MESSAGE: &'static str = "delete_message";
    pub const PIN_MESSAGE: &'static str = "pin_message";
    pub const UNPIN_MESSAGE: &'static str = "unpin_message";
    pub const TYPING_START: &'static str = "typing_start";
    pub const TYPING_END: &'static str = "typing_end";
    pub const ATTACHMENT_MESSAGE_CREATED: &'static str = "attachment_message_created";
}

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const HELLO: &'static str = "HELLO";
    pub const USER_PRESENCE: &'static str = "user_presence";
    pub const MEETING_STATUS_CHANGED: &'static str = "meetingStatusChanged";
    pub const DUPLICATE_SESSION_KICKED: &'static str = "duplicateSessionKicked";
    pub const REMOVE_OLD_PARTICIPANT_SESSION: &'static str = "removeOldParticipantSession";
    pub const MESSAGE: &'static str = "message";
    pub const MESSAGE_UPDATED: &'static str = "message_updated";
    pub const MESSAGE_DELETED: &'static str = "message_deleted";
    pub const MESSAGE_PINNED: &'static str = "message_pinned";
    pub const MESSAGE_UNPINNED: &'static str = "message_unpinned";
    pub const MESSAGE_WITH_ATTACHMENT: &'static str = "message_with_attachment";
    pub const USER_TYPING: &'static str = "user_typing";
    pub const ROTATE_MIC_STATUS: &'static str = "rotateMicStatus";
    pub const ERROR: &'static str = "error";
}
