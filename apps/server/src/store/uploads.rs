use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, UploadId, UserId};

use super::{db_err, Store, UploadRecord};

const UPLOAD_COLUMNS: &str = "id, channel_id, author_id, name, size, mime_type, url, created_at";

impl Store {
    pub async fn create_upload(
        &self,
        channel_id: &ChannelId,
        author_id: &UserId,
        name: &str,
        size: i64,
        mime_type: &str,
        url: &str,
    ) -> Result<UploadRecord, RemusError> {
        let id = UploadId::generate();
        sqlx::query(&format!(
            "INSERT INTO uploads ({UPLOAD_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ))
        .bind(&id)
        .bind(channel_id)
        .bind(author_id)
        .bind(name)
        .bind(size)
        .bind(mime_type)
        .bind(url)
        .bind(chrono::Utc::now())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        self.get_upload(&id).await?.ok_or(RemusError::NotFound)
    }

    pub async fn get_upload(&self, id: &UploadId) -> Result<Option<UploadRecord>, RemusError> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }

    /// Dereference submitted attachment ids, keeping input order minus
    /// duplicates. Rows not owned by `(channel_id, author_id)` are dropped
    /// silently.
    pub async fn uploads_owned_by(
        &self,
        ids: &[UploadId],
        channel_id: &ChannelId,
        author_id: &UserId,
    ) -> Result<Vec<UploadRecord>, RemusError> {
        let mut result = Vec::new();
        for id in ids {
            if result.iter().any(|u: &UploadRecord| &u.id == id) {
                continue;
            }
            if let Some(upload) = self.get_upload(id).await? {
                if &upload.channel_id == channel_id && &upload.author_id == author_id {
                    result.push(upload);
                }
            }
        }
        Ok(result)
    }

    pub async fn list_uploads(&self) -> Result<Vec<UploadRecord>, RemusError> {
        sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads ORDER BY created_at"
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn delete_upload(&self, id: &UploadId) -> Result<UploadRecord, RemusError> {
        let upload = self.get_upload(id).await?.ok_or(RemusError::NotFound)?;
        sqlx::query("DELETE FROM uploads WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(upload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remus_shared::api::channel::ChannelKind;

    #[tokio::test]
    async fn uploads_owned_by_filters_and_dedupes() {
        let store = Store::open_in_memory().await.unwrap();
        let guild_id = store.node_guild_id().await.unwrap();
        let channel = store
            .create_channel(&guild_id, "files", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let other = store
            .create_channel(&guild_id, "other", ChannelKind::Text, None, None)
            .await
            .unwrap();

        let owner = UserId::from("owner");
        let stranger = UserId::from("stranger");
        let mine = store
            .create_upload(&channel.id, &owner, "a.png", 1, "image/png", "/uploads/a.png")
            .await
            .unwrap();
        let theirs = store
            .create_upload(&channel.id, &stranger, "b.png", 1, "image/png", "/uploads/b.png")
            .await
            .unwrap();
        let elsewhere = store
            .create_upload(&other.id, &owner, "c.png", 1, "image/png", "/uploads/c.png")
            .await
            .unwrap();

        let resolved = store
            .uploads_owned_by(
                &[
                    mine.id.clone(),
                    mine.id.clone(),
                    theirs.id.clone(),
                    elsewhere.id.clone(),
                ],
                &channel.id,
                &owner,
            )
            .await
            .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, mine.id);
    }
}
