use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use remus_shared::api::audit::AuditView;
use remus_shared::api::member::{BanRequest, BanView, MemberView};
use remus_shared::api::message::{MessageHistoryQuery, MessageView};
use remus_shared::api::role::RoleView;
use remus_shared::api::settings::{SettingsView, UpdateSettingsRequest};
use remus_shared::api::upload::UploadView;
use remus_shared::api::user::ProfileView;
use remus_shared::api::ws::ServerEvent;
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, MessageId, RoleId, UploadId, UserId};
use serde::Serialize;

use crate::error::ServerError;
use crate::extractors::admin::AdminAuth;
use crate::state::AppState;
use crate::ws::RoomKey;

// Operator mirror of the user/role/member/audit/settings/message/upload
// surfaces. Loopback + X-Remus-Admin-Key only; no permission engine, the
// operator owns the box.

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    #[serde(flatten)]
    pub profile: ProfileView,
    pub banned: bool,
}

/// GET /api/admin/users
pub async fn list_users(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminUserView>>, ServerError> {
    let profiles = state.store.list_profiles().await?;
    let mut users = Vec::with_capacity(profiles.len());
    for profile in profiles {
        let banned = state.store.is_banned(&profile.id).await?;
        users.push(AdminUserView {
            profile: profile.view(),
            banned,
        });
    }
    Ok(Json(users))
}

/// DELETE /api/admin/users/:user_id — purge without banning.
pub async fn purge_user(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    let uploads = state.store.purge_user(&user_id).await?;
    crate::handlers::files::remove_upload_files(&state, &uploads).await;
    state.voice.force_mute_user(&user_id).await;
    state.ws.close_user_sessions(&user_id, None);
    state.ws.emit_room(
        &RoomKey::Guild(guild_id.clone()),
        &ServerEvent::GuildMemberLeft {
            guild_id: guild_id.clone(),
            user_id: user_id.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &guild_id,
            "member.leave",
            None,
            Some(user_id.as_str()),
            serde_json::json!({ "admin": true }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/admin/members
pub async fn list_members(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<MemberView>>, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    Ok(Json(
        crate::handlers::guilds::member_views(&state, &guild_id).await?,
    ))
}

/// POST /api/admin/members/:user_id/kick
pub async fn kick_member(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    if !state.store.remove_member(&guild_id, &user_id).await? {
        return Err(ServerError(RemusError::NotFound));
    }
    state.voice.force_mute_user(&user_id).await;
    state.ws.close_user_sessions(
        &user_id,
        Some(ServerEvent::GuildKicked {
            guild_id: guild_id.clone(),
            reason: "kicked".into(),
        }),
    );
    state.ws.emit_room(
        &RoomKey::Guild(guild_id.clone()),
        &ServerEvent::GuildMemberLeft {
            guild_id: guild_id.clone(),
            user_id: user_id.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &guild_id,
            "member.kick",
            None,
            Some(user_id.as_str()),
            serde_json::json!({ "admin": true }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/admin/bans
pub async fn list_bans(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<BanView>>, ServerError> {
    let bans = state.store.list_bans().await?;
    Ok(Json(bans.iter().map(|b| b.view()).collect()))
}

/// POST /api/admin/users/:user_id/ban
pub async fn ban_user(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    body: Result<Json<BanRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<StatusCode, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    let reason = body.ok().and_then(|Json(b)| b.reason);
    crate::handlers::members::ban_user(&state, &guild_id, &user_id, reason.as_deref()).await?;
    state
        .store
        .add_audit(
            &guild_id,
            "member.ban",
            None,
            Some(user_id.as_str()),
            serde_json::json!({ "admin": true, "reason": reason }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// DELETE /api/admin/bans/:user_id
pub async fn unban_user(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<StatusCode, ServerError> {
    if !state.store.remove_ban(&user_id).await? {
        return Err(ServerError(RemusError::NotFound));
    }
    let guild_id = state.store.node_guild_id().await?;
    state
        .store
        .add_audit(
            &guild_id,
            "member.unban",
            None,
            Some(user_id.as_str()),
            serde_json::json!({ "admin": true }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/admin/roles
pub async fn list_roles(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<RoleView>>, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    let roles = state.store.list_roles(&guild_id).await?;
    Ok(Json(roles.iter().map(|r| r.view()).collect()))
}

/// DELETE /api/admin/roles/:role_id
pub async fn delete_role(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(role_id): Path<RoleId>,
) -> Result<StatusCode, ServerError> {
    let role = state.store.delete_role(&role_id).await?;
    state
        .store
        .add_audit(
            &role.guild_id,
            "role.delete",
            None,
            Some(role.id.as_str()),
            serde_json::json!({ "admin": true, "name": role.name }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/admin/audit
pub async fn list_audit(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Query(query): Query<crate::handlers::guilds::AuditQuery>,
) -> Result<Json<Vec<AuditView>>, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let entries = state.store.list_audit(&guild_id, limit).await?;
    Ok(Json(entries.iter().map(|e| e.view()).collect()))
}

/// GET /api/admin/settings
pub async fn get_settings(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<SettingsView>, ServerError> {
    Ok(Json(state.store.settings().await?))
}

/// PATCH /api/admin/settings
pub async fn update_settings(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<SettingsView>, ServerError> {
    let settings = state.store.update_settings(&body).await?;
    let guild_id = state.store.node_guild_id().await?;
    state
        .store
        .add_audit(
            &guild_id,
            "settings.update",
            None,
            None,
            serde_json::to_value(settings).unwrap_or_default(),
        )
        .await?;
    Ok(Json(settings))
}

/// GET /api/admin/channels/:channel_id/messages
pub async fn list_messages(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
    Query(params): Query<MessageHistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 100) as i64;
    let messages = state
        .store
        .list_messages(&channel_id, params.before.as_ref(), limit)
        .await?;
    Ok(Json(messages))
}

/// DELETE /api/admin/messages/:message_id
pub async fn delete_message(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> Result<StatusCode, ServerError> {
    let removed = state.store.delete_message(&message_id).await?;
    crate::handlers::files::remove_attachment_files(&state, &removed.attachments).await;
    state.ws.emit_room(
        &RoomKey::Channel(removed.channel_id.clone()),
        &ServerEvent::MessageDelete {
            channel_id: removed.channel_id.clone(),
            message_id,
        },
        None,
    );
    let guild_id = state.store.node_guild_id().await?;
    state
        .store
        .add_audit(
            &guild_id,
            "message.delete",
            None,
            Some(removed.id.as_str()),
            serde_json::json!({ "admin": true, "channelId": removed.channel_id }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// GET /api/admin/uploads
pub async fn list_uploads(
    _admin: AdminAuth,
    State(state): State<AppState>,
) -> Result<Json<Vec<UploadView>>, ServerError> {
    let uploads = state.store.list_uploads().await?;
    Ok(Json(uploads.iter().map(|u| u.view()).collect()))
}

/// DELETE /api/admin/uploads/:upload_id
pub async fn delete_upload(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(upload_id): Path<UploadId>,
) -> Result<StatusCode, ServerError> {
    let upload = state.store.delete_upload(&upload_id).await?;
    crate::handlers::files::remove_upload_files(&state, std::slice::from_ref(&upload)).await;
    let guild_id = state.store.node_guild_id().await?;
    state
        .store
        .add_audit(
            &guild_id,
            "upload.delete",
            None,
            Some(upload.id.as_str()),
            serde_json::json!({ "admin": true, "name": upload.name }),
        )
        .await?;
    Ok(StatusCode::OK)
}

pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/users", axum::routing::get(list_users))
        .route("/users/{user_id}", axum::routing::delete(purge_user))
        .route("/users/{user_id}/ban", axum::routing::post(ban_user))
        .route("/bans", axum::routing::get(list_bans))
        .route("/bans/{user_id}", axum::routing::delete(unban_user))
        .route("/members", axum::routing::get(list_members))
        .route("/members/{user_id}/kick", axum::routing::post(kick_member))
        .route("/roles", axum::routing::get(list_roles))
        .route("/roles/{role_id}", axum::routing::delete(delete_role))
        .route("/audit", axum::routing::get(list_audit))
        .route(
            "/settings",
            axum::routing::get(get_settings).patch(update_settings),
        )
        .route(
            "/channels/{channel_id}/messages",
            axum::routing::get(list_messages),
        )
        .route(
            "/messages/{message_id}",
            axum::routing::delete(delete_message),
        )
        .route("/uploads", axum::routing::get(list_uploads))
        .route("/uploads/{upload_id}", axum::routing::delete(delete_upload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panic() {
        let _ = routes();
    }
}
