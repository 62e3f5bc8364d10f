use std::collections::{HashMap, HashSet};

use remus_shared::error::RemusError;
use remus_shared::ids::{GuildId, RoleId, UserId};

use super::{db_err, MemberRecord, Store};

const MEMBER_COLUMNS: &str =
    "guild_id, user_id, nickname, joined_at, timeout_until, voice_muted, voice_deafened";

impl Store {
    pub async fn get_member(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<Option<MemberRecord>, RemusError> {
        let member = sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE guild_id = ?1 AND user_id = ?2"
        ))
        .bind(guild_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)?;

        let Some(mut member) = member else {
            return Ok(None);
        };
        let mut role_ids: Vec<RoleId> = sqlx::query_scalar(
            "SELECT role_id FROM member_roles WHERE guild_id = ?1 AND user_id = ?2",
        )
        .bind(guild_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        // Normalize: every member implicitly holds @everyone.
        let everyone = RoleId::from(guild_id.as_str());
        if !role_ids.contains(&everyone) {
            role_ids.insert(0, everyone);
        }
        member.role_ids = role_ids;
        Ok(Some(member))
    }

    pub async fn list_members(&self, guild_id: &GuildId) -> Result<Vec<MemberRecord>, RemusError> {
        let mut members = sqlx::query_as::<_, MemberRecord>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE guild_id = ?1 ORDER BY joined_at"
        ))
        .bind(guild_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        #[derive(sqlx::FromRow)]
        struct RoleRow {
            user_id: UserId,
            role_id: RoleId,
        }
        let rows: Vec<RoleRow> =
            sqlx::query_as("SELECT user_id, role_id FROM member_roles WHERE guild_id = ?1")
                .bind(guild_id)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?;
        let mut by_user: HashMap<UserId, Vec<RoleId>> = HashMap::new();
        for row in rows {
            by_user.entry(row.user_id).or_default().push(row.role_id);
        }

        let everyone = RoleId::from(guild_id.as_str());
        for member in &mut members {
            let mut role_ids = by_user.remove(&member.user_id).unwrap_or_default();
            if !role_ids.contains(&everyone) {
                role_ids.insert(0, everyone.clone());
            }
            member.role_ids = role_ids;
        }
        Ok(members)
    }

    /// Idempotent join.
    pub async fn add_member(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<MemberRecord, RemusError> {
        sqlx::query(
            "INSERT OR IGNORE INTO members (guild_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(chrono::Utc::now())
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        self.get_member(guild_id, user_id)
            .await?
            .ok_or(RemusError::NotFound)
    }

    pub async fn remove_member(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> Result<bool, RemusError> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM member_roles WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let result = sqlx::query("DELETE FROM members WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_nickname(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        nickname: Option<&str>,
    ) -> Result<MemberRecord, RemusError> {
        sqlx::query("UPDATE members SET nickname = ?3 WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id)
            .bind(user_id)
            .bind(nickname)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        self.get_member(guild_id, user_id)
            .await?
            .ok_or(RemusError::NotFound)
    }

    /// Replace the member's explicit role set. Unknown roles and roles from
    /// other guilds are rejected; the implicit `@everyone` id is tolerated
    /// in the input and never stored.
    pub async fn set_member_roles(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        role_ids: &[RoleId],
    ) -> Result<MemberRecord, RemusError> {
        let valid: Vec<RoleId> =
            sqlx::query_scalar("SELECT id FROM roles WHERE guild_id = ?1")
                .bind(guild_id)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?;
        let valid: HashSet<RoleId> = valid.into_iter().collect();

        let everyone = RoleId::from(guild_id.as_str());
        let mut unique: Vec<RoleId> = Vec::new();
        for role_id in role_ids {
            if role_id == &everyone || unique.contains(role_id) {
                continue;
            }
            if !valid.contains(role_id) {
                return Err(RemusError::Validation(format!("unknown role: {role_id}")));
            }
            unique.push(role_id.clone());
        }

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM member_roles WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for role_id in &unique {
            sqlx::query(
                "INSERT INTO member_roles (guild_id, user_id, role_id) VALUES (?1, ?2, ?3)",
            )
            .bind(guild_id)
            .bind(user_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        self.get_member(guild_id, user_id)
            .await?
            .ok_or(RemusError::NotFound)
    }

    pub async fn set_timeout(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<MemberRecord, RemusError> {
        sqlx::query("UPDATE members SET timeout_until = ?3 WHERE guild_id = ?1 AND user_id = ?2")
            .bind(guild_id)
            .bind(user_id)
            .bind(until)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        self.get_member(guild_id, user_id)
            .await?
            .ok_or(RemusError::NotFound)
    }

    pub async fn set_voice_state(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        muted: Option<bool>,
        deafened: Option<bool>,
    ) -> Result<MemberRecord, RemusError> {
        sqlx::query(
            "UPDATE members SET
                 voice_muted = COALESCE(?3, voice_muted),
                 voice_deafened = COALESCE(?4, voice_deafened)
             WHERE guild_id = ?1 AND user_id = ?2",
        )
        .bind(guild_id)
        .bind(user_id)
        .bind(muted)
        .bind(deafened)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        self.get_member(guild_id, user_id)
            .await?
            .ok_or(RemusError::NotFound)
    }
}
