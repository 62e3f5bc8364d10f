use remus_shared::api::role::{CreateRoleRequest, UpdateRoleRequest};
use remus_shared::error::RemusError;
use remus_shared::ids::{GuildId, RoleId};
use remus_shared::permissions::Permissions;

use super::{db_err, RoleRecord, Store};

const ROLE_COLUMNS: &str =
    "id, guild_id, name, color, permissions, hoist, position, icon_url, created_at";

impl Store {
    pub async fn list_roles(&self, guild_id: &GuildId) -> Result<Vec<RoleRecord>, RemusError> {
        sqlx::query_as::<_, RoleRecord>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE guild_id = ?1 ORDER BY position DESC, created_at"
        ))
        .bind(guild_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)
    }

    pub async fn get_role(&self, role_id: &RoleId) -> Result<Option<RoleRecord>, RemusError> {
        sqlx::query_as::<_, RoleRecord>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"
        ))
        .bind(role_id)
        .fetch_optional(self.pool())
        .await
        .map_err(db_err)
    }

    /// New roles are inserted at the top of the stack (max position + 1).
    pub async fn create_role(
        &self,
        guild_id: &GuildId,
        req: &CreateRoleRequest,
    ) -> Result<RoleRecord, RemusError> {
        let top: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) FROM roles WHERE guild_id = ?1",
        )
        .bind(guild_id)
        .fetch_one(self.pool())
        .await
        .map_err(db_err)?;

        let id = RoleId::generate();
        sqlx::query(
            "INSERT INTO roles (id, guild_id, name, color, permissions, hoist, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&id)
        .bind(guild_id)
        .bind(&req.name)
        .bind(req.color.as_deref().unwrap_or("#99aab5"))
        .bind(req.permissions.unwrap_or_default())
        .bind(req.hoist.unwrap_or(false))
        .bind(top + 1)
        .bind(chrono::Utc::now())
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        self.get_role(&id).await?.ok_or(RemusError::NotFound)
    }

    pub async fn update_role(
        &self,
        role_id: &RoleId,
        req: &UpdateRoleRequest,
    ) -> Result<RoleRecord, RemusError> {
        let role = self.get_role(role_id).await?.ok_or(RemusError::NotFound)?;
        if role.is_everyone() && (req.name.is_some() || req.position.is_some()) {
            return Err(RemusError::Conflict(
                "@everyone cannot be renamed or repositioned".into(),
            ));
        }

        sqlx::query(
            "UPDATE roles SET
                 name = COALESCE(?2, name),
                 color = COALESCE(?3, color),
                 permissions = COALESCE(?4, permissions),
                 hoist = COALESCE(?5, hoist),
                 position = COALESCE(?6, position)
             WHERE id = ?1",
        )
        .bind(role_id)
        .bind(&req.name)
        .bind(&req.color)
        .bind(req.permissions)
        .bind(req.hoist)
        .bind(req.position)
        .execute(self.pool())
        .await
        .map_err(db_err)?;

        self.get_role(role_id).await?.ok_or(RemusError::NotFound)
    }

    pub async fn set_role_icon(
        &self,
        role_id: &RoleId,
        icon_url: &str,
    ) -> Result<RoleRecord, RemusError> {
        sqlx::query("UPDATE roles SET icon_url = ?2 WHERE id = ?1")
            .bind(role_id)
            .bind(icon_url)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        self.get_role(role_id).await?.ok_or(RemusError::NotFound)
    }

    /// Delete a role and scrub it from every member's role set in the same
    /// transaction. `@everyone` is protected.
    pub async fn delete_role(&self, role_id: &RoleId) -> Result<RoleRecord, RemusError> {
        let role = self.get_role(role_id).await?.ok_or(RemusError::NotFound)?;
        if role.is_everyone() {
            return Err(RemusError::Conflict("@everyone cannot be deleted".into()));
        }

        let mut tx = self.pool().begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM member_roles WHERE guild_id = ?1 AND role_id = ?2")
            .bind(&role.guild_id)
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM roles WHERE id = ?1")
            .bind(role_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(role)
    }
}
