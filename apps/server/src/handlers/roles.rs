use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::Multipart;
use remus_shared::api::role::{CreateRoleRequest, RoleView, UpdateRoleRequest};
use remus_shared::api::ws::ServerEvent;
use remus_shared::constants::{MAX_NAME_LENGTH, MAX_ROLE_ICON_BYTES};
use remus_shared::error::RemusError;
use remus_shared::ids::RoleId;
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::guild_member::GuildMember;
use crate::perms;
use crate::state::AppState;
use crate::store::RoleRecord;
use crate::ws::RoomKey;

fn validate_role_name(name: &str) -> Result<(), ServerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ServerError(RemusError::Validation(format!(
            "role name must be 1-{MAX_NAME_LENGTH} characters"
        ))));
    }
    Ok(())
}

/// Actors may not hand out bits they do not themselves hold
/// (Administrators excepted).
fn check_escalation(actor: &GuildMember, granted: Permissions) -> Result<(), ServerError> {
    if actor.permissions.contains(Permissions::ADMINISTRATOR) {
        return Ok(());
    }
    if !actor.permissions.contains(granted) {
        return Err(ServerError(RemusError::Forbidden));
    }
    Ok(())
}

async fn require_manageable(
    state: &AppState,
    actor: &GuildMember,
    role_id: &RoleId,
) -> Result<RoleRecord, ServerError> {
    let role = state
        .store
        .get_role(role_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;
    if role.guild_id != actor.guild_id {
        return Err(ServerError(RemusError::NotFound));
    }
    let roles = state.store.list_roles(&actor.guild_id).await?;
    if !perms::can_manage_role(&actor.member, actor.permissions, &roles, &role) {
        return Err(ServerError(RemusError::Forbidden));
    }
    Ok(role)
}

/// GET /api/guilds/:guild_id/roles
pub async fn list_roles(
    State(state): State<AppState>,
    guild_member: GuildMember,
) -> Result<Json<Vec<RoleView>>, ServerError> {
    let roles = state.store.list_roles(&guild_member.guild_id).await?;
    Ok(Json(roles.iter().map(|r| r.view()).collect()))
}

/// POST /api/guilds/:guild_id/roles
pub async fn create_role(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Json(body): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleView>), ServerError> {
    guild_member.require(Permissions::MANAGE_ROLES)?;
    validate_role_name(&body.name)?;
    check_escalation(&guild_member, body.permissions.unwrap_or_default())?;

    let role = state.store.create_role(&guild_member.guild_id, &body).await?;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "role.create",
            Some(&guild_member.user_id),
            Some(role.id.as_str()),
            serde_json::json!({ "name": role.name }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(role.view())))
}

/// PATCH /api/roles/:role_id
pub async fn update_role(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path(role_id): Path<RoleId>,
    Json(body): Json<UpdateRoleRequest>,
) -> Result<Json<RoleView>, ServerError> {
    guild_member.require(Permissions::MANAGE_ROLES)?;
    if let Some(name) = &body.name {
        validate_role_name(name)?;
    }
    if let Some(granted) = body.permissions {
        check_escalation(&guild_member, granted)?;
    }
    require_manageable(&state, &guild_member, &role_id).await?;

    let role = state.store.update_role(&role_id, &body).await?;
    broadcast_member_refresh(&state, &guild_member).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "role.update",
            Some(&guild_member.user_id),
            Some(role.id.as_str()),
            serde_json::json!({ "name": role.name }),
        )
        .await?;
    Ok(Json(role.view()))
}

/// DELETE /api/roles/:role_id — also scrubs the role from member role sets.
pub async fn delete_role(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path(role_id): Path<RoleId>,
) -> Result<StatusCode, ServerError> {
    guild_member.require(Permissions::MANAGE_ROLES)?;
    require_manageable(&state, &guild_member, &role_id).await?;

    let role = state.store.delete_role(&role_id).await?;
    broadcast_member_refresh(&state, &guild_member).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "role.delete",
            Some(&guild_member.user_id),
            Some(role.id.as_str()),
            serde_json::json!({ "name": role.name }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// POST /api/roles/:role_id/icon — multipart, capped at 2 MB.
pub async fn upload_role_icon(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path(role_id): Path<RoleId>,
    mut multipart: Multipart,
) -> Result<Json<RoleView>, ServerError> {
    guild_member.require(Permissions::MANAGE_ROLES)?;
    require_manageable(&state, &guild_member, &role_id).await?;

    let mut icon: Option<(String, Vec<u8>)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("icon") && field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("icon.png").to_string();
        let data = field.bytes().await.map_err(|_| {
            ServerError(RemusError::Validation("failed to read icon data".into()))
        })?;
        if data.len() > MAX_ROLE_ICON_BYTES {
            return Err(ServerError(RemusError::UploadTooLarge(
                "role icon exceeds 2 MB".into(),
            )));
        }
        icon = Some((file_name, data.to_vec()));
    }
    let (file_name, data) =
        icon.ok_or(ServerError(RemusError::Validation("missing icon field".into())))?;

    let extension = file_name
        .rsplit('.')
        .next()
        .filter(|ext| matches!(*ext, "png" | "jpg" | "jpeg" | "gif" | "webp"))
        .unwrap_or("png");
    let disk_name = format!("{}.{extension}", role_id.as_str());
    let dir = state.config.role_icons_path();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ServerError(RemusError::Internal(format!("create role-icons dir: {e}"))))?;
    tokio::fs::write(dir.join(&disk_name), data)
        .await
        .map_err(|e| ServerError(RemusError::Internal(format!("write role icon: {e}"))))?;

    let role = state
        .store
        .set_role_icon(&role_id, &format!("/role-icons/{disk_name}"))
        .await?;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "role.icon",
            Some(&guild_member.user_id),
            Some(role.id.as_str()),
            serde_json::json!({ "name": disk_name }),
        )
        .await?;
    Ok(Json(role.view()))
}

/// Role edits change effective permissions for many members at once; let
/// the clients re-pull by pushing fresh member views.
async fn broadcast_member_refresh(state: &AppState, guild_member: &GuildMember) {
    match crate::handlers::guilds::member_views(state, &guild_member.guild_id).await {
        Ok(members) => {
            for member in members {
                state.ws.emit_room(
                    &RoomKey::Guild(guild_member.guild_id.clone()),
                    &ServerEvent::MemberUpdate {
                        guild_id: guild_member.guild_id.clone(),
                        member,
                    },
                    None,
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "member refresh after role change failed"),
    }
}

/// Routes nested under /api/guilds/:guild_id/roles.
pub fn guild_routes() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::get(list_roles).post(create_role))
}

/// Routes nested under /api/roles.
pub fn detail_routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/{role_id}",
            axum::routing::patch(update_role).delete(delete_role),
        )
        .route("/{role_id}/icon", axum::routing::post(upload_role_icon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_length_checked() {
        assert!(validate_role_name("Mods").is_ok());
        assert!(validate_role_name("").is_err());
        assert!(validate_role_name(&"r".repeat(101)).is_err());
    }

    #[test]
    fn routes_build_without_panic() {
        let _ = guild_routes();
        let _ = detail_routes();
    }
}
