//! PostgreSQL-backed [`RecordStore`] using Diesel async.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::OptionalExtension;

use crate::db::pool::DbPool;
use crate::db::schema::{attachments, messages, users};
use crate::db::store::RecordStore;
use crate::error::ApiError;
use crate::models::attachment::{Attachment, AttachmentStatusUpdate, NewAttachment};
use crate::models::message::{Message, NewMessage};
use crate::models::user::User;

pub struct PgStore {
    db: DbPool,
}

impl PgStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>, ApiError> {
        let mut conn = self.db.get().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn save_user(&self, user: User) -> Result<User, ApiError> {
        let mut conn = self.db.get().await?;
        let saved = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(users::table)
                .values(&user)
                .on_conflict(users::id)
                .do_update()
                .set((
                    users::username.eq(&user.username),
                    users::display_name.eq(&user.display_name),
                    users::avatar_url.eq(&user.avatar_url),
                ))
                .returning(User::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(saved)
    }

    async fn find_message(&self, message_id: i64) -> Result<Option<Message>, ApiError> {
        let mut conn = self.db.get().await?;
        let message = diesel_async::RunQueryDsl::get_result(
            messages::table.find(message_id).select(Message::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(message)
    }

    async fn insert_message(&self, message: NewMessage) -> Result<Message, ApiError> {
        let mut conn = self.db.get().await?;
        let inserted = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(messages::table)
                .values(&message)
                .returning(Message::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(inserted)
    }

    async fn update_message_content(
        &self,
        message_id: i64,
        content: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<Option<Message>, ApiError> {
        let mut conn = self.db.get().await?;
        let updated = diesel_async::RunQueryDsl::get_result(
            diesel::update(messages::table.find(message_id))
                .set((
                    messages::content.eq(content),
                    messages::edited_at.eq(Some(edited_at)),
                ))
                .returning(Message::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(updated)
    }

    async fn delete_message(&self, message_id: i64) -> Result<bool, ApiError> {
        let mut conn = self.db.get().await?;
        let deleted = diesel_async::RunQueryDsl::execute(
            diesel::delete(messages::table.find(message_id)),
            &mut conn,
        )
        .await?;
        Ok(deleted > 0)
    }

    async fn set_pinned(&self, message_id: i64, pinned: bool) -> Result<Option<Message>, ApiError> {
        let mut conn = self.db.get().await?;
        let updated = diesel_async::RunQueryDsl::get_result(
            diesel::update(messages::table.find(message_id))
                .set(messages::pinned.eq(pinned))
                .returning(Message::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(updated)
    }

    async fn find_message_by_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<Option<Message>, ApiError> {
        let mut conn = self.db.get().await?;
        let message = diesel_async::RunQueryDsl::first(
            messages::table
                .filter(messages::attachment_id.eq(attachment_id))
                .order(messages::id.asc())
                .select(Message::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(message)
    }

    async fn find_attachment(&self, attachment_id: &str) -> Result<Option<Attachment>, ApiError> {
        let mut conn = self.db.get().await?;
        let attachment = diesel_async::RunQueryDsl::get_result(
            attachments::table
                .find(attachment_id)
                .select(Attachment::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(attachment)
    }

    async fn insert_attachment(&self, attachment: NewAttachment) -> Result<Attachment, ApiError> {
        let mut conn = self.db.get().await?;
        let inserted = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(attachments::table)
                .values(&attachment)
                .returning(Attachment::as_returning()),
            &mut conn,
        )
        .await?;
        Ok(inserted)
    }

    async fn attachments_for_meeting(&self, meeting_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let mut conn = self.db.get().await?;
        let found = diesel_async::RunQueryDsl::load(
            attachments::table
                .filter(attachments::meeting_id.eq(meeting_id))
                .order(attachments::created_at.asc())
                .select(Attachment::as_select()),
            &mut conn,
        )
        .await?;
        Ok(found)
    }

    async fn update_attachment_status(
        &self,
        attachment_id: &str,
        update: &AttachmentStatusUpdate,
    ) -> Result<Option<Attachment>, ApiError> {
        let mut conn = self.db.get().await?;
        let updated = diesel_async::RunQueryDsl::get_result(
            diesel::update(attachments::table.find(attachment_id))
                .set(update)
                .returning(Attachment::as_returning()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(updated)
    }
}
