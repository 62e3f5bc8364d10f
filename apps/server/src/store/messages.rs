use std::collections::{HashMap, HashSet};

use remus_shared::api::message::{MessageView, ReplyPreview};
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, MessageId, UserId};

use super::{db_err, AttachmentRecord, MessageRecord, Store, UploadRecord};

const MESSAGE_COLUMNS: &str = "id, channel_id, author_id, content, reply_to_id, created_at";

impl Store {
    /// Newest-first page of a channel's history. `before` anchors on an
    /// existing message; an unknown anchor yields an empty page.
    pub async fn list_messages(
        &self,
        channel_id: &ChannelId,
        before: Option<&MessageId>,
        limit: i64,
    ) -> Result<Vec<MessageView>, RemusError> {
        let records = match before {
            Some(before_id) => {
                let Some(anchor) = self.get_message(before_id).await? else {
                    return Ok(Vec::new());
                };
                sqlx::query_as::<_, MessageRecord>(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE channel_id = ?1 AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                     ORDER BY created_at DESC, id DESC LIMIT ?4"
                ))
                .bind(channel_id)
                .bind(anchor.created_at)
                .bind(&anchor.id)
                .bind(limit)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?
            }
            None => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE channel_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))
                .bind(channel_id)
                .bind(limit)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?
            }
        };

        self.hydrate_messages(records).await
    }

    pub async fn get_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<MessageRecord>, RemusError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
        ))
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        let Some(mut record) = record else {
            return Ok(None);
        };
        record.attachments = self.attachments_for(&record.id).await?;
        Ok(Some(record))
    }

    /// Persist a message with its attachment rows in one transaction and
    /// return the hydrated view. The reply target must live in the same
    /// channel. Attachments are pre-filtered by the caller to uploads owned
    /// by `(channel_id, author_id)`.
    pub async fn create_message(
        &self,
        channel_id: &ChannelId,
        author_id: &UserId,
        content: &str,
        attachments: &[UploadRecord],
        reply_to_id: Option<&MessageId>,
    ) -> Result<MessageView, RemusError> {
        if let Some(reply_to_id) = reply_to_id {
            let target = self
                .get_message(reply_to_id)
                .await?
                .ok_or_else(|| RemusError::Validation("reply target does not exist".into()))?;
            if &target.channel_id != channel_id {
                return Err(RemusError::Validation(
                    "reply target is in another channel".into(),
                ));
            }
        }

        let id = MessageId::generate();
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query(&format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ))
        .bind(&id)
        .bind(channel_id)
        .bind(author_id)
        .bind(content)
        .bind(reply_to_id)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, upload) in attachments.iter().enumerate() {
            sqlx::query(
                "INSERT INTO message_attachments (message_id, position, upload_id, name, size, mime_type, url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&id)
            .bind(position as i64)
            .bind(&upload.id)
            .bind(&upload.name)
            .bind(upload.size)
            .bind(&upload.mime_type)
            .bind(&upload.url)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        let record = self
            .get_message(&id)
            .await?
            .ok_or_else(|| RemusError::Internal("message vanished after insert".into()))?;
        let mut views = self.hydrate_messages(vec![record]).await?;
        views
            .pop()
            .ok_or_else(|| RemusError::Internal("message hydration failed".into()))
    }

    /// Delete a message: clear reply pointers at it, drop upload rows that
    /// back its attachments, and return the removed record so the caller
    /// can delete files.
    pub async fn delete_message(
        &self,
        message_id: &MessageId,
    ) -> Result<MessageRecord, RemusError> {
        let record = self
            .get_message(message_id)
            .await?
            .ok_or(RemusError::NotFound)?;

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("UPDATE messages SET reply_to_id = NULL WHERE reply_to_id = ?1")
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for attachment in &record.attachments {
            sqlx::query("DELETE FROM uploads WHERE id = ?1 OR url = ?2")
                .bind(&attachment.upload_id)
                .bind(&attachment.url)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(record)
    }

    async fn attachments_for(
        &self,
        message_id: &MessageId,
    ) -> Result<Vec<AttachmentRecord>, RemusError> {
        sqlx::query_as(
            "SELECT upload_id, name, size, mime_type, url
             FROM message_attachments WHERE message_id = ?1 ORDER BY position",
        )
        .bind(message_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    /// Attach author profiles, attachment lists, and reply previews.
    pub(super) async fn hydrate_messages(
        &self,
        mut records: Vec<MessageRecord>,
    ) -> Result<Vec<MessageView>, RemusError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        // Attachments, batched across the page.
        #[derive(sqlx::FromRow)]
        struct AttachmentRow {
            message_id: MessageId,
            upload_id: remus_shared::ids::UploadId,
            name: String,
            size: i64,
            mime_type: String,
            url: String,
        }
        let placeholders = (1..=records.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "SELECT message_id, upload_id, name, size, mime_type, url
             FROM message_attachments WHERE message_id IN ({placeholders})
             ORDER BY message_id, position"
        );
        let mut q = sqlx::query_as::<_, AttachmentRow>(&query);
        for record in &records {
            q = q.bind(&record.id);
        }
        let mut attachments: HashMap<MessageId, Vec<AttachmentRecord>> = HashMap::new();
        for row in q.fetch_all(self.pool()).await.map_err(db_err)? {
            attachments
                .entry(row.message_id.clone())
                .or_default()
                .push(AttachmentRecord {
                    upload_id: row.upload_id,
                    name: row.name,
                    size: row.size,
                    mime_type: row.mime_type,
                    url: row.url,
                });
        }
        for record in &mut records {
            if let Some(list) = attachments.remove(&record.id) {
                record.attachments = list;
            }
        }

        // Reply previews.
        let reply_ids: Vec<MessageId> = records
            .iter()
            .filter_map(|r| r.reply_to_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut replies: HashMap<MessageId, MessageRecord> = HashMap::new();
        if !reply_ids.is_empty() {
            let placeholders = (1..=reply_ids.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            let query =
                format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id IN ({placeholders})");
            let mut q = sqlx::query_as::<_, MessageRecord>(&query);
            for id in &reply_ids {
                q = q.bind(id);
            }
            for row in q.fetch_all(self.pool()).await.map_err(db_err)? {
                replies.insert(row.id.clone(), row);
            }
        }

        // Author profiles for the page and the previews.
        let mut author_ids: HashSet<UserId> =
            records.iter().map(|r| r.author_id.clone()).collect();
        author_ids.extend(replies.values().map(|r| r.author_id.clone()));
        let author_ids: Vec<UserId> = author_ids.into_iter().collect();
        let profiles = self.profiles_by_ids(&author_ids).await?;

        let views = records
            .into_iter()
            .map(|record| {
                let reply_to = record.reply_to_id.as_ref().and_then(|id| {
                    replies.get(id).map(|target| {
                        Box::new(ReplyPreview {
                            id: target.id.clone(),
                            author_id: target.author_id.clone(),
                            content: target.content.clone(),
                            author_username: profiles
                                .get(&target.author_id)
                                .map(|p| p.username.clone()),
                        })
                    })
                });
                MessageView {
                    id: record.id,
                    channel_id: record.channel_id,
                    author_id: record.author_id.clone(),
                    content: record.content,
                    attachments: record.attachments.iter().map(|a| a.view()).collect(),
                    reply_to_id: record.reply_to_id,
                    reply_to,
                    created_at: record.created_at,
                    author: profiles.get(&record.author_id).map(|p| p.view()),
                }
            })
            .collect();
        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remus_shared::api::channel::ChannelKind;

    async fn channel_with_author() -> (Store, ChannelId, UserId) {
        let store = Store::open_in_memory().await.unwrap();
        let guild_id = store.node_guild_id().await.unwrap();
        let channel = store
            .create_channel(&guild_id, "general-2", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let author = UserId::from("u1");
        store.upsert_profile(&author, "dax", None).await.unwrap();
        store.add_member(&guild_id, &author).await.unwrap();
        (store, channel.id, author)
    }

    #[tokio::test]
    async fn create_and_page_history() {
        let (store, channel_id, author) = channel_with_author().await;
        for i in 0..5 {
            store
                .create_message(&channel_id, &author, &format!("msg {i}"), &[], None)
                .await
                .unwrap();
        }

        let newest = store.list_messages(&channel_id, None, 2).await.unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[0].content, "msg 4");
        assert_eq!(newest[0].author.as_ref().unwrap().username, "dax");

        let older = store
            .list_messages(&channel_id, Some(&newest[1].id), 10)
            .await
            .unwrap();
        assert_eq!(older.len(), 3);
        assert_eq!(older[0].content, "msg 2");
    }

    #[tokio::test]
    async fn reply_preview_is_hydrated() {
        let (store, channel_id, author) = channel_with_author().await;
        let first = store
            .create_message(&channel_id, &author, "original", &[], None)
            .await
            .unwrap();
        let reply = store
            .create_message(&channel_id, &author, "reply", &[], Some(&first.id))
            .await
            .unwrap();
        let preview = reply.reply_to.unwrap();
        assert_eq!(preview.id, first.id);
        assert_eq!(preview.content, "original");
        assert_eq!(preview.author_username.as_deref(), Some("dax"));
    }

    #[tokio::test]
    async fn reply_target_must_share_the_channel() {
        let (store, channel_id, author) = channel_with_author().await;
        let guild_id = store.node_guild_id().await.unwrap();
        let other = store
            .create_channel(&guild_id, "elsewhere", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let foreign = store
            .create_message(&other.id, &author, "over here", &[], None)
            .await
            .unwrap();

        let err = store
            .create_message(&channel_id, &author, "reply", &[], Some(&foreign.id))
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_clears_reply_pointers_and_upload_rows() {
        let (store, channel_id, author) = channel_with_author().await;
        let upload = store
            .create_upload(&channel_id, &author, "pic.png", 10, "image/png", "/uploads/pic.png")
            .await
            .unwrap();
        let first = store
            .create_message(&channel_id, &author, "with file", &[upload.clone()], None)
            .await
            .unwrap();
        let reply = store
            .create_message(&channel_id, &author, "reply", &[], Some(&first.id))
            .await
            .unwrap();

        let removed = store.delete_message(&first.id).await.unwrap();
        assert_eq!(removed.attachments.len(), 1);

        // Reply pointer cleared, not cascaded.
        let surviving = store.get_message(&reply.id).await.unwrap().unwrap();
        assert!(surviving.reply_to_id.is_none());

        // Upload row removed with the message.
        assert!(store.get_upload(&upload.id).await.unwrap().is_none());
    }
}
