//! Record store abstraction for messages, attachments and user profiles.
//!
//! The coordinator does not own this data; it reads and writes it through the
//! [`RecordStore`] trait. `PgStore` backs it in production, [`MemoryStore`] in
//! tests and local development.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::ApiError;
use crate::models::attachment::{Attachment, AttachmentStatusUpdate, NewAttachment};
use crate::models::message::{Message, MessageView, NewMessage};
use crate::models::user::User;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ApiError>;
    async fn save_user(&self, user: User) -> Result<User, ApiError>;

    async fn find_message(&self, message_id: i64) -> Result<Option<Message>, ApiError>;
    async fn insert_message(&self, message: NewMessage) -> Result<Message, ApiError>;
    /// Returns `None` if the message does not exist.
    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>, ApiError>;
    /// Returns `false` if the message did not exist.
    async fn delete_message(&self, message_id: i64) -> Result<bool, ApiError>;
    async fn set_pinned(&self, message_id: i64, pinned: bool) -> Result<Option<Message>, ApiError>;
    async fn find_message_by_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<Option<Message>, ApiError>;

    async fn find_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>, ApiError>;
    async fn insert_attachment(&self, attachment: NewAttachment) -> Result<Attachment, ApiError>;
    async fn attachments_for_meeting(&self, meeting_id: &str) -> Result<Vec<Attachment>, ApiError>;
    async fn update_attachment_status(
        &self,
        attachment_id: &str,
        update: &AttachmentStatusUpdate,
    ) -> Result<Option<Attachment>, ApiError>;

    /// Populate the denormalized sender and attachment fields of a message.
    async fn message_view(&self, message: Message) -> Result<MessageView, ApiError> {
        let sender = self.find_user(&message.sender_id).await?;
        let attachment = match message.attachment_id.as_deref() {
            Some(id) => self.find_attachment(id).await?,
            None => None,
        };
        Ok(MessageView {
            message,
            sender,
            attachment,
        })
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests / local development)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryData {
    users: HashMap<String, User>,
    messages: BTreeMap<i64, Message>,
    attachments: HashMap<String, Attachment>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<MemoryData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages in a channel.
    pub fn message_count(&self, channel_id: &str) -> usize {
        self.data
            .lock()
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .count()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ApiError> {
        Ok(self.data.lock().users.get(user_id).cloned())
    }

    async fn save_user(&self, user: User) -> Result<User, ApiError> {
        self.data.lock().users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_message(&self, message_id: i64) -> Result<Option<Message>, ApiError> {
        Ok(self.data.lock().messages.get(&message_id).cloned())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ApiError> {
        let mut data = self.data.lock();
        if data.messages.contains_key(&message.id) {
            return Err(ApiError::bad_request("Duplicate message ID"));
        }
        let message = message.into_message();
        data.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>, ApiError> {
        let mut data = self.data.lock();
        Ok(data.messages.get_mut(&message_id).map(|m| {
            m.content = content.to_string();
            m.edited_at = Some(edited_at);
            m.clone()
        }))
    }

    async fn delete_message(&self, message_id: i64) -> Result<bool, ApiError> {
        Ok(self.data.lock().messages.remove(&message_id).is_some())
    }

    async fn set_pinned(&self, message_id: i64, pinned: bool) -> Result<Option<Message>, ApiError> {
        let mut data = self.data.lock();
        Ok(data.messages.get_mut(&message_id).map(|m| {
            m.pinned = pinned;
            m.clone()
        }))
    }

    async fn find_message_by_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<Option<Message>, ApiError> {
        Ok(self
            .data
            .lock()
            .messages
            .values()
            .find(|m| m.attachment_id.as_deref() == Some(attachment_id))
            .cloned())
    }

    async fn find_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>, ApiError> {
        Ok(self.data.lock().attachments.get(attachment_id).cloned())
    }

    async fn insert_attachment(&self, attachment: NewAttachment) -> Result<Attachment, ApiError> {
        let attachment = attachment.into_attachment();
        self.data
            .lock()
            .attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(attachment)
    }

    async fn attachments_for_meeting(&self, meeting_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let mut found: Vec<Attachment> = self
            .data
            .lock()
            .attachments
            .values()
            .filter(|a| a.meeting_id.as_deref() == Some(meeting_id))
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        Ok(found)
    }

    async fn update_attachment_status(
        &self,
        attachment_id: &str,
        update: &AttachmentStatusUpdate,
    ) -> Result<Option<Attachment>, ApiError> {
        let mut data = self.data.lock();
        Ok(data.attachments.get_mut(attachment_id).map(|a| {
            update.apply(a);
            a.clone()
        }))
    }
}
