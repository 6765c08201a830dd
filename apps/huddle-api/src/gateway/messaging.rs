//! Channel message events: persist through the record store, then broadcast.
//!
//! Every handler runs against the connection's own channel. A failure never
//! reaches the channel: validation problems are logged and dropped, store
//! failures produce a generic `error` event for the originating connection.

use chrono::Utc;
use huddle_common::id::{prefix, prefixed_ulid};
use serde_json::{json, Value};

use crate::bus::BusEvent;
use crate::error::{ApiError, FieldError};
use crate::models::attachment::{MeetingStatus, NewAttachment, KIND_FILE, KIND_MEETING};
use crate::models::message::{Message, MessageView, NewMessage};
use crate::AppState;

use super::connections::ChannelBinding;
use super::dispatcher::{parse, required};
use super::events::{
    AttachmentPayload, EditMessagePayload, EventName, InboundEvent, MessageRefPayload,
    SendMessagePayload,
};
use super::session::GatewaySession;

/// Route a message event. Unscoped connections have no channel to write to.
pub async fn handle(state: &AppState, session: &GatewaySession, event: &str, data: Value) {
    let Some(binding) = &session.binding else {
        tracing::debug!(connection_id = %session.connection_id, event, "message event on unscoped connection");
        return;
    };

    let result = match event {
        InboundEvent::MESSAGE => match parse::<SendMessagePayload>(event, data) {
            Some(payload) => send_message(state, binding, payload).await,
            None => return,
        },
        InboundEvent::NEW_MESSAGE => match parse::<SendMessagePayload>(event, data) {
            Some(payload) => send_optimistic(state, binding, payload).await,
            None => return,
        },
        InboundEvent::EDIT_MESSAGE => match parse::<EditMessagePayload>(event, data) {
            Some(payload) => edit_message(state, binding, payload).await,
            None => return,
        },
        InboundEvent::DELETE_MESSAGE => match parse::<MessageRefPayload>(event, data) {
            Some(payload) => delete_message(state, binding, payload).await,
            None => return,
        },
        InboundEvent::PIN_MESSAGE | InboundEvent::UNPIN_MESSAGE => {
            match parse::<MessageRefPayload>(event, data) {
                Some(payload) => {
                    set_pinned(state, binding, payload, event == InboundEvent::PIN_MESSAGE).await
                }
                None => return,
            }
        }
        InboundEvent::ATTACHMENT_MESSAGE_CREATED => match parse::<MessageRefPayload>(event, data) {
            Some(payload) => announce_attachment(state, binding, payload).await,
            None => return,
        },
        _ => return,
    };

    if let Err(err) = result {
        if err.status.is_client_error() {
            tracing::debug!(connection_id = %session.connection_id, event, %err, "rejected message event");
        } else {
            tracing::error!(connection_id = %session.connection_id, event, %err, "message event failed");
            report_error(state, session, failure_message(event));
        }
    }
}

/// Send a generic `error` event to one connection.
pub fn report_error(state: &AppState, session: &GatewaySession, message: &str) {
    state.broadcast.to_connection(
        &session.connection_id,
        EventName::ERROR,
        json!({ "message": message }),
    );
}

fn failure_message(event: &str) -> &'static str {
    match event {
        InboundEvent::MESSAGE | InboundEvent::NEW_MESSAGE => "Failed to send message",
        InboundEvent::EDIT_MESSAGE => "Failed to edit message",
        InboundEvent::DELETE_MESSAGE => "Failed to delete message",
        InboundEvent::PIN_MESSAGE => "Failed to pin message",
        InboundEvent::UNPIN_MESSAGE => "Failed to unpin message",
        _ => "Failed to load message",
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_content(content: Option<&str>, max_len: usize, allow_empty: bool) -> Result<String, ApiError> {
    let content = content.map(str::trim).unwrap_or_default();
    if content.is_empty() && !allow_empty {
        return Err(ApiError::validation(vec![FieldError {
            field: "content".to_string(),
            message: "Message content is required".to_string(),
        }]));
    }
    if content.chars().count() > max_len {
        return Err(ApiError::validation(vec![FieldError {
            field: "content".to_string(),
            message: format!("Message content must be {max_len} characters or fewer"),
        }]));
    }
    Ok(content.to_string())
}

fn new_attachment(payload: AttachmentPayload) -> NewAttachment {
    let meeting_id = required(payload.meeting_id);
    let kind = match required(payload.kind) {
        Some(kind) => kind,
        None if meeting_id.is_some() => KIND_MEETING.to_string(),
        None => KIND_FILE.to_string(),
    };
    let status = payload
        .status
        .as_deref()
        .and_then(MeetingStatus::parse)
        .unwrap_or(MeetingStatus::Scheduled);
    NewAttachment {
        id: prefixed_ulid(prefix::ATTACHMENT),
        kind,
        meeting_id,
        title: required(payload.title),
        url: required(payload.url),
        status: status.as_str().to_string(),
        start_time: payload.start_time,
        created_at: Utc::now(),
    }
}

/// Load a message and check it belongs to the connection's channel.
async fn channel_message(
    state: &AppState,
    binding: &ChannelBinding,
    message_id: Option<i64>,
) -> Result<Message, ApiError> {
    let message_id = message_id.ok_or_else(|| {
        ApiError::validation(vec![FieldError {
            field: "messageId".to_string(),
            message: "messageId is required".to_string(),
        }])
    })?;
    state
        .store
        .find_message(message_id)
        .await?
        .filter(|m| m.channel_id == binding.channel_id)
        .ok_or_else(|| ApiError::not_found("Message not found"))
}

fn broadcast_view(state: &AppState, event_name: &str, view: &MessageView) -> Result<(), ApiError> {
    let data = serde_json::to_value(view).map_err(|err| {
        tracing::error!(%err, "failed to serialize message");
        ApiError::internal("An internal error occurred")
    })?;
    state
        .broadcast
        .to_channel(&view.message.channel_id, event_name, data);
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn send_message(
    state: &AppState,
    binding: &ChannelBinding,
    payload: SendMessagePayload,
) -> Result<(), ApiError> {
    let has_attachment = payload.attachment.is_some();
    let content = validate_content(
        payload.content.as_deref(),
        state.config.max_message_length,
        has_attachment,
    )?;

    // An attachment stored here stays behind if the message insert fails.
    let attachment_id = match payload.attachment {
        Some(attachment) => Some(state.store.insert_attachment(new_attachment(attachment)).await?.id),
        None => None,
    };

    let message = state
        .store
        .insert_message(NewMessage {
            id: state.snowflake.generate(),
            channel_id: binding.channel_id.clone(),
            sender_id: binding.user_id.clone(),
            content,
            attachment_id,
            pinned: false,
            created_at: Utc::now(),
        })
        .await?;

    tracing::debug!(message_id = message.id, channel_id = %message.channel_id, "message stored");
    let view = state.store.message_view(message).await?;
    broadcast_view(state, EventName::MESSAGE, &view)
}

/// Broadcast first, persist later through the event bus.
async fn send_optimistic(
    state: &AppState,
    binding: &ChannelBinding,
    payload: SendMessagePayload,
) -> Result<(), ApiError> {
    let content = validate_content(payload.content.as_deref(), state.config.max_message_length, false)?;

    let message = NewMessage {
        id: state.snowflake.generate(),
        channel_id: binding.channel_id.clone(),
        sender_id: binding.user_id.clone(),
        content,
        attachment_id: None,
        pinned: false,
        created_at: Utc::now(),
    };

    let view = MessageView {
        message: message.clone().into_message(),
        sender: None,
        attachment: None,
    };
    broadcast_view(state, EventName::MESSAGE, &view)?;

    state.bus.publish(BusEvent::MessageCreated(message)).await
}

async fn edit_message(
    state: &AppState,
    binding: &ChannelBinding,
    payload: EditMessagePayload,
) -> Result<(), ApiError> {
    let content = validate_content(payload.content.as_deref(), state.config.max_message_length, false)?;
    let message = channel_message(state, binding, payload.message_id).await?;

    let updated = state
        .store
        .update_message_content(message.id, &content, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let view = state.store.message_view(updated).await?;
    broadcast_view(state, EventName::MESSAGE_UPDATED, &view)
}

async fn delete_message(
    state: &AppState,
    binding: &ChannelBinding,
    payload: MessageRefPayload,
) -> Result<(), ApiError> {
    let message = channel_message(state, binding, payload.message_id).await?;

    if !state.store.delete_message(message.id).await? {
        return Err(ApiError::not_found("Message not found"));
    }

    tracing::debug!(message_id = message.id, channel_id = %message.channel_id, "message deleted");
    state.broadcast.to_channel(
        &message.channel_id,
        EventName::MESSAGE_DELETED,
        json!({
            "messageId": message.id.to_string(),
            "channelId": message.channel_id,
        }),
    );
    Ok(())
}

async fn set_pinned(
    state: &AppState,
    binding: &ChannelBinding,
    payload: MessageRefPayload,
    pinned: bool,
) -> Result<(), ApiError> {
    let message = channel_message(state, binding, payload.message_id).await?;

    let updated = state
        .store
        .set_pinned(message.id, pinned)
        .await?
        .ok_or_else(|| ApiError::not_found("Message not found"))?;

    let view = state.store.message_view(updated).await?;
    let event_name = if pinned {
        EventName::MESSAGE_PINNED
    } else {
        EventName::MESSAGE_UNPINNED
    };
    broadcast_view(state, event_name, &view)
}

/// Re-read a message whose attachment was created out of band and announce it.
async fn announce_attachment(
    state: &AppState,
    binding: &ChannelBinding,
    payload: MessageRefPayload,
) -> Result<(), ApiError> {
    let message = channel_message(state, binding, payload.message_id).await?;
    let view = state.store.message_view(message).await?;
    broadcast_view(state, EventName::MESSAGE_WITH_ATTACHMENT, &view)
}
