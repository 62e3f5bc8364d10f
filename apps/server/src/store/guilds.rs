use remus_shared::api::settings::{SettingsView, UpdateSettingsRequest};
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, GuildId, RoleId};
use remus_shared::permissions::Permissions;

use super::{db_err, GuildRecord, Store};

impl Store {
    /// Seed the node guild, default channels, `@everyone`, and `Admin`.
    /// Safe to run on every boot.
    pub(super) async fn bootstrap(&self, guild_name: &str) -> Result<(), RemusError> {
        let now = chrono::Utc::now();

        let guild_id = match self.meta_get("node_guild_id").await? {
            Some(id) => GuildId::from(id),
            None => {
                let existing: Option<String> =
                    sqlx::query_scalar("SELECT id FROM guilds ORDER BY created_at LIMIT 1")
                        .fetch_optional(self.pool())
                        .await
                        .map_err(db_err)?;
                let id = match existing {
                    Some(id) => GuildId::from(id),
                    None => {
                        let id = GuildId::generate();
                        sqlx::query("INSERT INTO guilds (id, name, created_at) VALUES (?1, ?2, ?3)")
                            .bind(&id)
                            .bind(guild_name)
                            .bind(now)
                            .execute(self.pool())
                            .await
                            .map_err(db_err)?;
                        for (name, kind) in [("general", "text"), ("Lounge", "voice")] {
                            sqlx::query(
                                "INSERT INTO channels (id, guild_id, name, kind, position, created_at)
                                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                            )
                            .bind(ChannelId::generate())
                            .bind(&id)
                            .bind(name)
                            .bind(kind)
                            .bind(now)
                            .execute(self.pool())
                            .await
                            .map_err(db_err)?;
                        }
                        tracing::info!(guild_id = %id, name = guild_name, "created node guild");
                        id
                    }
                };
                self.meta_set("node_guild_id", id.as_str()).await?;
                id
            }
        };

        // @everyone: id == guild id, position 0, never deleted.
        let everyone_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = ?1)")
                .bind(guild_id.as_str())
                .fetch_one(self.pool())
                .await
                .map_err(db_err)?;
        if !everyone_exists {
            sqlx::query(
                "INSERT INTO roles (id, guild_id, name, permissions, position, created_at)
                 VALUES (?1, ?1, '@everyone', ?2, 0, ?3)",
            )
            .bind(guild_id.as_str())
            .bind(Permissions::DEFAULT_EVERYONE)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        }

        let admin_exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM roles WHERE guild_id = ?1 AND name = 'Admin')",
        )
        .bind(&guild_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;
        if !admin_exists {
            let top: i64 =
                sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM roles WHERE guild_id = ?1")
                    .bind(&guild_id)
                    .fetch_one(self.pool())
                    .await
                    .map_err(db_err)?;
            sqlx::query(
                "INSERT INTO roles (id, guild_id, name, color, permissions, position, created_at)
                 VALUES (?1, ?2, 'Admin', '#e74c3c', ?3, ?4, ?5)",
            )
            .bind(RoleId::generate())
            .bind(&guild_id)
            .bind(Permissions::all())
            .bind(top + 1)
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        }

        if self.meta_get("settings").await?.is_none() {
            let value = serde_json::to_string(&SettingsView::default())
                .map_err(|e| RemusError::Internal(format!("encode settings: {e}")))?;
            self.meta_set("settings", &value).await?;
        }

        self.cache_node_guild(guild_id);
        Ok(())
    }

    pub async fn node_guild_id(&self) -> Result<GuildId, RemusError> {
        if let Some(id) = self.cached_node_guild() {
            return Ok(id);
        }
        let id = self
            .meta_get("node_guild_id")
            .await?
            .ok_or_else(|| RemusError::Internal("node guild pointer missing".into()))?;
        let id = GuildId::from(id);
        self.cache_node_guild(id.clone());
        Ok(id)
    }

    pub async fn node_guild(&self) -> Result<GuildRecord, RemusError> {
        let id = self.node_guild_id().await?;
        sqlx::query_as::<_, GuildRecord>("SELECT id, name, created_at FROM guilds WHERE id = ?1")
            .bind(&id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?
            .ok_or(RemusError::NotFound)
    }

    /// The node hosts exactly one guild; everything else is `NotFound`.
    pub async fn require_node_guild(&self, guild_id: &GuildId) -> Result<GuildRecord, RemusError> {
        let guild = self.node_guild().await?;
        if &guild.id != guild_id {
            return Err(RemusError::NotFound);
        }
        Ok(guild)
    }

    pub async fn settings(&self) -> Result<SettingsView, RemusError> {
        match self.meta_get("settings").await? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| RemusError::Internal(format!("decode settings: {e}"))),
            None => Ok(SettingsView::default()),
        }
    }

    pub async fn update_settings(
        &self,
        update: &UpdateSettingsRequest,
    ) -> Result<SettingsView, RemusError> {
        let mut settings = self.settings().await?;
        if let Some(max) = update.audit_max_entries {
            if max <= 0 {
                return Err(RemusError::Validation(
                    "auditMaxEntries must be positive".into(),
                ));
            }
            settings.audit_max_entries = max;
        }
        if let Some(max) = update.timeout_max_minutes {
            if max <= 0 {
                return Err(RemusError::Validation(
                    "timeoutMaxMinutes must be positive".into(),
                ));
            }
            settings.timeout_max_minutes = max;
        }
        let value = serde_json::to_string(&settings)
            .map_err(|e| RemusError::Internal(format!("encode settings: {e}")))?;
        self.meta_set("settings", &value).await?;
        Ok(settings)
    }

    async fn meta_get(&self, key: &str) -> Result<Option<String>, RemusError> {
        sqlx::query_scalar("SELECT value FROM meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)
    }

    async fn meta_set(&self, key: &str, value: &str) -> Result<(), RemusError> {
        sqlx::query("INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn require_node_guild_rejects_other_ids() {
        let store = Store::open_in_memory().await.unwrap();
        let guild = store.node_guild().await.unwrap();
        assert!(store.require_node_guild(&guild.id).await.is_ok());
        let err = store
            .require_node_guild(&GuildId::from("someone-else"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::NotFound));
    }

    #[tokio::test]
    async fn settings_default_then_patch() {
        let store = Store::open_in_memory().await.unwrap();
        let settings = store.settings().await.unwrap();
        assert_eq!(settings, SettingsView::default());

        let updated = store
            .update_settings(&UpdateSettingsRequest {
                audit_max_entries: Some(50),
                timeout_max_minutes: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.audit_max_entries, 50);
        assert_eq!(
            updated.timeout_max_minutes,
            SettingsView::default().timeout_max_minutes
        );

        // Persisted, not just returned.
        assert_eq!(store.settings().await.unwrap().audit_max_entries, 50);
    }

    #[tokio::test]
    async fn settings_reject_non_positive_values() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .update_settings(&UpdateSettingsRequest {
                audit_max_entries: Some(0),
                timeout_max_minutes: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RemusError::Validation(_)));
    }
}
