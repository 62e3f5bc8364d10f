use remus_shared::api::audit::AuditView;
use remus_shared::error::RemusError;
use remus_shared::ids::{AuditId, GuildId, UserId};

use super::{db_err, BanRecord, Store, UploadRecord};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: AuditId,
    pub guild_id: GuildId,
    pub action: String,
    pub actor_id: Option<UserId>,
    pub target_id: Option<String>,
    pub data: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl AuditRecord {
    pub fn view(&self) -> AuditView {
        AuditView {
            id: self.id.clone(),
            guild_id: self.guild_id.clone(),
            action: self.action.clone(),
            actor_id: self.actor_id.clone(),
            target_id: self.target_id.clone(),
            data: serde_json::from_str(&self.data).unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
        }
    }
}

impl Store {
    // ─── Ban set ────────────────────────────────────────────

    pub async fn is_banned(&self, user_id: &UserId) -> Result<bool, RemusError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM bans WHERE user_id = ?1)")
            .bind(user_id)
            .fetch_one(self.pool())
            .await
            .map_err(db_err)
    }

    pub async fn add_ban(
        &self,
        user_id: &UserId,
        reason: Option<&str>,
    ) -> Result<BanRecord, RemusError> {
        sqlx::query(
            "INSERT OR REPLACE INTO bans (user_id, banned_at, reason) VALUES (?1, ?2, ?3)",
        )
        .bind(user_id)
        .bind(chrono::Utc::now())
        .bind(reason)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        sqlx::query_as::<_, BanRecord>(
            "SELECT user_id, banned_at, reason FROM bans WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn remove_ban(&self, user_id: &UserId) -> Result<bool, RemusError> {
        let result = sqlx::query("DELETE FROM bans WHERE user_id = ?1")
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_bans(&self) -> Result<Vec<BanRecord>, RemusError> {
        sqlx::query_as::<_, BanRecord>(
            "SELECT user_id, banned_at, reason FROM bans ORDER BY banned_at",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    // ─── Purge ──────────────────────────────────────────────

    /// Atomically remove a user's member rows, messages, uploads, and
    /// profile. Returns the removed upload rows so the caller can delete
    /// files from disk; emitting `guild:memberLeft` is also the caller's
    /// job.
    pub async fn purge_user(&self, user_id: &UserId) -> Result<Vec<UploadRecord>, RemusError> {
        let uploads: Vec<UploadRecord> = sqlx::query_as(
            "SELECT id, channel_id, author_id, name, size, mime_type, url, created_at
             FROM uploads WHERE author_id = ?1",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM member_roles WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM members WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "UPDATE messages SET reply_to_id = NULL
             WHERE reply_to_id IN (SELECT id FROM messages WHERE author_id = ?1)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query("DELETE FROM messages WHERE author_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM uploads WHERE author_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM profiles WHERE id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(uploads)
    }

    // ─── Audit log ──────────────────────────────────────────

    /// Append an audit row and evict FIFO overflow beyond
    /// `settings.audit_max_entries`, in one transaction.
    pub async fn add_audit(
        &self,
        guild_id: &GuildId,
        action: &str,
        actor_id: Option<&UserId>,
        target_id: Option<&str>,
        data: serde_json::Value,
    ) -> Result<(), RemusError> {
        let max_entries = self.settings().await?.audit_max_entries;

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO audit (id, guild_id, action, actor_id, target_id, data, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(AuditId::generate())
        .bind(guild_id)
        .bind(action)
        .bind(actor_id)
        .bind(target_id)
        .bind(data.to_string())
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "DELETE FROM audit WHERE guild_id = ?1 AND id NOT IN (
                 SELECT id FROM audit WHERE guild_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2
             )",
        )
        .bind(guild_id)
        .bind(max_entries)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    pub async fn list_audit(
        &self,
        guild_id: &GuildId,
        limit: i64,
    ) -> Result<Vec<AuditRecord>, RemusError> {
        sqlx::query_as::<_, AuditRecord>(
            "SELECT id, guild_id, action, actor_id, target_id, data, created_at
             FROM audit WHERE guild_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .bind(guild_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }
}
