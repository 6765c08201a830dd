use chrono::{DateTime, Utc};
use diesel::prelude::*;
use huddle_common::id::string_id;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::messages;
use crate::models::attachment::Attachment;
use crate::models::user::User;

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = messages)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(with = "string_id")]
    #[schema(value_type = String)]
    pub id: i64,
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachment_id: Option<String>,
    pub pinned: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub id: i64,
    pub channel_id: String,
    pub sender_id: String,
    pub content: String,
    pub attachment_id: Option<String>,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// Materialize the record as the store would return it.
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            channel_id: self.channel_id,
            sender_id: self.sender_id,
            content: self.content,
            attachment_id: self.attachment_id,
            pinned: self.pinned,
            edited_at: None,
            created_at: self.created_at,
        }
    }
}

/// A message with its denormalized sender and attachment, as broadcast.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Option<User>,
    pub attachment: Option<Attachment>,
}
