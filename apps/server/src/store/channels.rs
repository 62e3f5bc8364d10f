use std::collections::HashMap;

use remus_shared::api::channel::{
    ChannelKind, OverrideEntry, PermissionOverridesView, ReorderEntry,
};
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, GuildId, UserId};

use super::{db_err, ChannelRecord, OverrideRecord, Store, UploadRecord};

const CHANNEL_COLUMNS: &str =
    "id, guild_id, name, kind, category_id, position, created_by, created_at";

impl Store {
    pub async fn list_channels(&self, guild_id: &GuildId) -> Result<Vec<ChannelRecord>, RemusError> {
        let mut channels = sqlx::query_as::<_, ChannelRecord>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE guild_id = ?1
             ORDER BY category_id NULLS FIRST, position, created_at"
        ))
        .bind(guild_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let rows: Vec<OverrideRecord> = sqlx::query_as(
            "SELECT o.channel_id, o.target_kind, o.target_id, o.allow, o.deny
             FROM channel_overrides o
             JOIN channels c ON c.id = o.channel_id
             WHERE c.guild_id = ?1",
        )
        .bind(guild_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut by_channel: HashMap<ChannelId, Vec<OverrideRecord>> = HashMap::new();
        for row in rows {
            by_channel.entry(row.channel_id.clone()).or_default().push(row);
        }
        for channel in &mut channels {
            channel.overrides = by_channel.remove(&channel.id).unwrap_or_default();
        }
        Ok(channels)
    }

    pub async fn get_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<Option<ChannelRecord>, RemusError> {
        let channel = sqlx::query_as::<_, ChannelRecord>(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        let Some(mut channel) = channel else {
            return Ok(None);
        };
        channel.overrides = sqlx::query_as(
            "SELECT channel_id, target_kind, target_id, allow, deny
             FROM channel_overrides WHERE channel_id = ?1",
        )
        .bind(channel_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        Ok(Some(channel))
    }

    /// Inserts append to the tail of the `(guild_id, category_id)` group.
    pub async fn create_channel(
        &self,
        guild_id: &GuildId,
        name: &str,
        kind: ChannelKind,
        category_id: Option<&ChannelId>,
        created_by: Option<&UserId>,
    ) -> Result<ChannelRecord, RemusError> {
        if let Some(category_id) = category_id {
            if kind == ChannelKind::Category {
                return Err(RemusError::Validation("categories cannot be nested".into()));
            }
            self.require_category(guild_id, category_id).await?;
        }

        let id = ChannelId::generate();
        sqlx::query(
            "INSERT INTO channels (id, guild_id, name, kind, category_id, position, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5,
                     COALESCE((SELECT MAX(position) + 1 FROM channels
                               WHERE guild_id = ?2 AND category_id IS ?5), 0),
                     ?6, ?7)",
        )
        .bind(&id)
        .bind(guild_id)
        .bind(name)
        .bind(kind.as_str())
        .bind(category_id)
        .bind(created_by)
        .bind(chrono::Utc::now())
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        self.get_channel(&id).await?.ok_or(RemusError::NotFound)
    }

    pub async fn rename_channel(
        &self,
        channel_id: &ChannelId,
        name: &str,
    ) -> Result<(), RemusError> {
        sqlx::query("UPDATE channels SET name = ?2 WHERE id = ?1")
            .bind(channel_id)
            .bind(name)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// `None` clears the category (top level).
    pub async fn set_channel_category(
        &self,
        channel: &ChannelRecord,
        category_id: Option<&ChannelId>,
    ) -> Result<(), RemusError> {
        if channel.channel_kind() == ChannelKind::Category && category_id.is_some() {
            return Err(RemusError::Validation("categories cannot be nested".into()));
        }
        if let Some(category_id) = category_id {
            self.require_category(&channel.guild_id, category_id).await?;
        }
        sqlx::query(
            "UPDATE channels SET category_id = ?2,
                 position = COALESCE((SELECT MAX(position) + 1 FROM channels
                                      WHERE guild_id = ?3 AND category_id IS ?2 AND id != ?1), 0)
             WHERE id = ?1",
        )
        .bind(&channel.id)
        .bind(category_id)
        .bind(&channel.guild_id)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Replace a channel's override table. Writes normalize allow/deny
    /// mutual exclusion and drop empty entries.
    pub async fn set_channel_overrides(
        &self,
        channel_id: &ChannelId,
        overrides: &PermissionOverridesView,
    ) -> Result<(), RemusError> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM channel_overrides WHERE channel_id = ?1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let entries = overrides
            .roles
            .iter()
            .map(|(id, entry)| ("role", id.as_str(), entry))
            .chain(
                overrides
                    .members
                    .iter()
                    .map(|(id, entry)| ("member", id.as_str(), entry)),
            );
        for (target_kind, target_id, entry) in entries {
            let normalized = OverrideEntry::normalized(entry.allow, entry.deny);
            if normalized.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO channel_overrides (channel_id, target_kind, target_id, allow, deny)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(channel_id)
            .bind(target_kind)
            .bind(target_id)
            .bind(normalized.allow)
            .bind(normalized.deny)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Cascade delete: messages (attachments with them) and upload rows go
    /// with the channel. Returns the removed uploads so the caller can
    /// delete files from disk.
    pub async fn delete_channel(
        &self,
        channel_id: &ChannelId,
    ) -> Result<(ChannelRecord, Vec<UploadRecord>), RemusError> {
        let channel = self
            .get_channel(channel_id)
            .await?
            .ok_or(RemusError::NotFound)?;

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        let uploads: Vec<UploadRecord> = sqlx::query_as(
            "SELECT id, channel_id, author_id, name, size, mime_type, url, created_at
             FROM uploads WHERE channel_id = ?1",
        )
        .bind(channel_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        // Replies into this channel point at messages that are going away.
        sqlx::query(
            "UPDATE messages SET reply_to_id = NULL
             WHERE reply_to_id IN (SELECT id FROM messages WHERE channel_id = ?1)",
        )
        .bind(channel_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query("DELETE FROM messages WHERE channel_id = ?1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM uploads WHERE channel_id = ?1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        // Channels inside a deleted category float to the top level.
        sqlx::query("UPDATE channels SET category_id = NULL WHERE category_id = ?1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM channels WHERE id = ?1")
            .bind(channel_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok((channel, uploads))
    }

    /// Apply a reorder batch atomically. An empty-string `category_id`
    /// means top level; any other target must be a category in this guild.
    pub async fn update_channel_positions(
        &self,
        guild_id: &GuildId,
        batch: &[ReorderEntry],
    ) -> Result<(), RemusError> {
        let channels = self.list_channels(guild_id).await?;
        let by_id: HashMap<&str, &ChannelRecord> =
            channels.iter().map(|c| (c.id.as_str(), c)).collect();

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        for entry in batch {
            let channel = by_id
                .get(entry.id.as_str())
                .ok_or_else(|| RemusError::Validation(format!("unknown channel: {}", entry.id)))?;

            let category_id: Option<ChannelId> = match entry.category_id.as_deref() {
                None => channel.category_id.clone(),
                Some("") => None,
                Some(target) => {
                    let target_channel = by_id.get(target).ok_or_else(|| {
                        RemusError::Validation(format!("unknown category: {target}"))
                    })?;
                    if target_channel.channel_kind() != ChannelKind::Category {
                        return Err(RemusError::Validation(format!(
                            "categoryId does not reference a category: {target}"
                        )));
                    }
                    Some(target_channel.id.clone())
                }
            };
            if channel.channel_kind() == ChannelKind::Category && category_id.is_some() {
                return Err(RemusError::Validation("categories cannot be nested".into()));
            }

            sqlx::query("UPDATE channels SET position = ?2, category_id = ?3 WHERE id = ?1")
                .bind(&channel.id)
                .bind(entry.position)
                .bind(category_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn require_category(
        &self,
        guild_id: &GuildId,
        category_id: &ChannelId,
    ) -> Result<(), RemusError> {
        let kind: Option<String> =
            sqlx::query_scalar("SELECT kind FROM channels WHERE id = ?1 AND guild_id = ?2")
                .bind(category_id)
                .bind(guild_id)
                .fetch_optional(self.pool())
                .await
                .map_err(db_err)?;
        match kind.as_deref() {
            Some("category") => Ok(()),
            Some(_) => Err(RemusError::Validation(
                "categoryId does not reference a category".into(),
            )),
            None => Err(RemusError::Validation("unknown category".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Store, GuildId) {
        let store = Store::open_in_memory().await.unwrap();
        let guild_id = store.node_guild_id().await.unwrap();
        (store, guild_id)
    }

    #[tokio::test]
    async fn create_appends_to_tail_per_group() {
        let (store, guild_id) = seeded().await;
        let a = store
            .create_channel(&guild_id, "alpha", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let b = store
            .create_channel(&guild_id, "beta", ChannelKind::Text, None, None)
            .await
            .unwrap();
        assert!(b.position > a.position);

        let cat = store
            .create_channel(&guild_id, "Topics", ChannelKind::Category, None, None)
            .await
            .unwrap();
        let inner = store
            .create_channel(&guild_id, "inner", ChannelKind::Text, Some(&cat.id), None)
            .await
            .unwrap();
        // Positions restart per category group.
        assert_eq!(inner.position, 0);
    }

    #[tokio::test]
    async fn category_references_are_validated() {
        let (store, guild_id) = seeded().await;
        let text = store
            .create_channel(&guild_id, "plain", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let err = store
            .create_channel(&guild_id, "nested", ChannelKind::Text, Some(&text.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::Validation(_)));

        let cat = store
            .create_channel(&guild_id, "Topics", ChannelKind::Category, None, None)
            .await
            .unwrap();
        let err = store
            .create_channel(&guild_id, "sub", ChannelKind::Category, Some(&cat.id), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::Validation(_)));
    }

    #[tokio::test]
    async fn reorder_is_idempotent_and_moves_to_top_level() {
        let (store, guild_id) = seeded().await;
        let cat = store
            .create_channel(&guild_id, "Topics", ChannelKind::Category, None, None)
            .await
            .unwrap();
        let chan = store
            .create_channel(&guild_id, "inner", ChannelKind::Text, Some(&cat.id), None)
            .await
            .unwrap();

        let batch = vec![ReorderEntry {
            id: chan.id.clone(),
            position: 5,
            category_id: Some(String::new()),
        }];
        store.update_channel_positions(&guild_id, &batch).await.unwrap();
        let after = store.get_channel(&chan.id).await.unwrap().unwrap();
        assert_eq!(after.position, 5);
        assert!(after.category_id.is_none());

        // Applying the same batch again changes nothing.
        store.update_channel_positions(&guild_id, &batch).await.unwrap();
        let again = store.get_channel(&chan.id).await.unwrap().unwrap();
        assert_eq!(again.position, after.position);
        assert_eq!(again.category_id, after.category_id);
    }

    #[tokio::test]
    async fn reorder_rejects_non_category_target() {
        let (store, guild_id) = seeded().await;
        let a = store
            .create_channel(&guild_id, "a", ChannelKind::Text, None, None)
            .await
            .unwrap();
        let b = store
            .create_channel(&guild_id, "b", ChannelKind::Text, None, None)
            .await
            .unwrap();

        let err = store
            .update_channel_positions(
                &guild_id,
                &[ReorderEntry {
                    id: a.id.clone(),
                    position: 0,
                    category_id: Some(b.id.as_str().to_string()),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::Validation(_)));
    }

    #[tokio::test]
    async fn overrides_are_normalized_on_write() {
        let (store, guild_id) = seeded().await;
        let chan = store
            .create_channel(&guild_id, "a", ChannelKind::Text, None, None)
            .await
            .unwrap();

        use remus_shared::permissions::Permissions;
        let mut overrides = PermissionOverridesView::default();
        overrides.roles.insert(
            remus_shared::ids::RoleId::from(guild_id.as_str()),
            OverrideEntry {
                allow: Permissions::SEND_MESSAGES,
                deny: Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNELS,
            },
        );
        // Empty entries are dropped entirely.
        overrides.members.insert(
            UserId::from("u1"),
            OverrideEntry {
                allow: Permissions::empty(),
                deny: Permissions::empty(),
            },
        );
        store.set_channel_overrides(&chan.id, &overrides).await.unwrap();

        let loaded = store.get_channel(&chan.id).await.unwrap().unwrap();
        assert_eq!(loaded.overrides.len(), 1);
        let row = &loaded.overrides[0];
        assert_eq!(row.allow, Permissions::SEND_MESSAGES);
        assert_eq!(row.deny, Permissions::VIEW_CHANNELS);
    }

    #[tokio::test]
    async fn deleting_category_floats_children_to_top_level() {
        let (store, guild_id) = seeded().await;
        let cat = store
            .create_channel(&guild_id, "Topics", ChannelKind::Category, None, None)
            .await
            .unwrap();
        let chan = store
            .create_channel(&guild_id, "inner", ChannelKind::Text, Some(&cat.id), None)
            .await
            .unwrap();

        store.delete_channel(&cat.id).await.unwrap();
        let after = store.get_channel(&chan.id).await.unwrap().unwrap();
        assert!(after.category_id.is_none());
    }
}
