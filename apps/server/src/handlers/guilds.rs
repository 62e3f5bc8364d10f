use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use remus_shared::api::audit::AuditView;
use remus_shared::api::guild::GuildView;
use remus_shared::api::member::MemberView;
use remus_shared::api::settings::{SettingsView, UpdateSettingsRequest};
use remus_shared::api::ws::ServerEvent;
use remus_shared::error::RemusError;
use remus_shared::ids::{GuildId, UserId};
use remus_shared::permissions::Permissions;
use serde::Deserialize;

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::extractors::guild_member::GuildMember;
use crate::perms;
use crate::state::AppState;
use crate::ws::RoomKey;

/// Hydrate member views with their profiles.
pub async fn member_views(
    state: &AppState,
    guild_id: &GuildId,
) -> Result<Vec<MemberView>, RemusError> {
    let members = state.store.list_members(guild_id).await?;
    let user_ids: Vec<UserId> = members.iter().map(|m| m.user_id.clone()).collect();
    let profiles = state.store.profiles_by_ids(&user_ids).await?;
    Ok(members
        .iter()
        .map(|m| m.view(profiles.get(&m.user_id).map(|p| p.view())))
        .collect())
}

async fn member_view(
    state: &AppState,
    guild_id: &GuildId,
    user_id: &UserId,
) -> Result<MemberView, RemusError> {
    let member = state
        .store
        .get_member(guild_id, user_id)
        .await?
        .ok_or(RemusError::NotFound)?;
    let profile = state.store.get_profile(user_id).await?;
    Ok(member.view(profile.map(|p| p.view())))
}

/// GET /api/guilds — the single node guild, fully hydrated, with the
/// caller's effective guild-level permissions.
pub async fn list_guilds(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<GuildView>>, ServerError> {
    let guild = state.store.node_guild().await?;
    let permissions = perms::permissions(&state.store, &guild.id, &auth.user_id, None).await?;
    let roles = state.store.list_roles(&guild.id).await?;
    let channels = state.store.list_channels(&guild.id).await?;
    let members = member_views(&state, &guild.id).await?;

    Ok(Json(vec![GuildView {
        id: guild.id,
        name: guild.name,
        created_at: guild.created_at,
        members,
        roles: roles.iter().map(|r| r.view()).collect(),
        permissions,
        icon_url: state
            .config
            .server_icon
            .as_ref()
            .map(|_| "/api/server/icon".to_string()),
        channels: channels.iter().map(|c| c.view()).collect(),
    }]))
}

/// POST /api/guilds — single-guild invariant.
pub async fn create_guild() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

/// POST /api/guilds/:guild_id/join [`guild:memberJoined`]
pub async fn join_guild(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(guild_id): Path<GuildId>,
) -> Result<Json<MemberView>, ServerError> {
    state.store.require_node_guild(&guild_id).await?;
    state.store.add_member(&guild_id, &auth.user_id).await?;
    let view = member_view(&state, &guild_id, &auth.user_id).await?;

    state.ws.emit_room(
        &RoomKey::Guild(guild_id.clone()),
        &ServerEvent::GuildMemberJoined {
            guild_id: guild_id.clone(),
            member: view.clone(),
        },
        None,
    );
    // The joiner's own live sockets start receiving guild events too.
    for session_id in state.ws.sessions_of_user(&auth.user_id) {
        state
            .ws
            .join_room(&session_id, RoomKey::Guild(guild_id.clone()));
    }
    state
        .store
        .add_audit(
            &guild_id,
            "member.join",
            Some(&auth.user_id),
            Some(auth.user_id.as_str()),
            serde_json::json!({}),
        )
        .await?;
    Ok(Json(view))
}

/// POST /api/guilds/:guild_id/leave [`guild:memberLeft`] — leaving this
/// node purges the user entirely.
pub async fn leave_guild(
    State(state): State<AppState>,
    guild_member: GuildMember,
) -> Result<StatusCode, ServerError> {
    let guild_id = guild_member.guild_id.clone();
    let user_id = guild_member.user_id.clone();

    state
        .store
        .add_audit(
            &guild_id,
            "member.leave",
            Some(&user_id),
            Some(user_id.as_str()),
            serde_json::json!({}),
        )
        .await?;

    let uploads = state.store.purge_user(&user_id).await?;
    crate::handlers::files::remove_upload_files(&state, &uploads).await;
    state.voice.force_mute_user(&user_id).await;

    state.ws.emit_room(
        &RoomKey::Guild(guild_id.clone()),
        &ServerEvent::GuildMemberLeft {
            guild_id: guild_id.clone(),
            user_id: user_id.clone(),
        },
        None,
    );
    for session_id in state.ws.sessions_of_user(&user_id) {
        state
            .ws
            .leave_room(&session_id, &RoomKey::Guild(guild_id.clone()));
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// GET /api/guilds/:guild_id/audit (VIEW_AUDIT_LOG)
pub async fn list_audit(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditView>>, ServerError> {
    guild_member.require(Permissions::VIEW_AUDIT_LOG)?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let entries = state.store.list_audit(&guild_member.guild_id, limit).await?;
    Ok(Json(entries.iter().map(|e| e.view()).collect()))
}

/// GET /api/guilds/:guild_id/settings (MANAGE_SERVER)
pub async fn get_settings(
    State(state): State<AppState>,
    guild_member: GuildMember,
) -> Result<Json<SettingsView>, ServerError> {
    guild_member.require(Permissions::MANAGE_SERVER)?;
    Ok(Json(state.store.settings().await?))
}

/// PATCH /api/guilds/:guild_id/settings (MANAGE_SERVER)
pub async fn update_settings(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsView>, ServerError> {
    guild_member.require(Permissions::MANAGE_SERVER)?;
    let settings = state.store.update_settings(&body).await?;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "settings.update",
            Some(&guild_member.user_id),
            None,
            serde_json::to_value(settings).unwrap_or_default(),
        )
        .await?;
    Ok(Json(settings))
}

pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", axum::routing::get(list_guilds).post(create_guild))
        .route("/{guild_id}/join", axum::routing::post(join_guild))
        .route("/{guild_id}/leave", axum::routing::post(leave_guild))
        .route("/{guild_id}/audit", axum::routing::get(list_audit))
        .route(
            "/{guild_id}/settings",
            axum::routing::get(get_settings).patch(update_settings),
        )
}
