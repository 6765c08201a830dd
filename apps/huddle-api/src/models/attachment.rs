use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::attachments;

/// Lifecycle of a meeting, as stored on meeting attachments and carried by
/// `meetingStatusChanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MeetingStatus {
    Scheduled,
    Ongoing,
    Ended,
}

impl MeetingStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "ongoing" => Some(Self::Ongoing),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Ongoing => "ongoing",
            Self::Ended => "ended",
        }
    }
}

pub const KIND_MEETING: &str = "meeting";
pub const KIND_FILE: &str = "file";

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = attachments)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub kind: String,
    pub meeting_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub participants_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub id: String,
    pub kind: String,
    pub meeting_id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NewAttachment {
    /// Materialize the record as the store would return it.
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            id: self.id,
            kind: self.kind,
            meeting_id: self.meeting_id,
            title: self.title,
            url: self.url,
            status: self.status,
            start_time: self.start_time,
            end_time: None,
            participants_count: None,
            created_at: self.created_at,
        }
    }
}

/// Status transition applied to every attachment of a meeting.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = attachments)]
pub struct AttachmentStatusUpdate {
    pub status: String,
    pub end_time: Option<DateTime<Utc>>,
    pub participants_count: Option<i32>,
}

impl AttachmentStatusUpdate {
    pub fn apply(&self, attachment: &mut Attachment) {
        attachment.status = self.status.clone();
        if let Some(end) = self.end_time {
            attachment.end_time = Some(end);
        }
        if let Some(count) = self.participants_count {
            attachment.participants_count = Some(count);
        }
    }
}
