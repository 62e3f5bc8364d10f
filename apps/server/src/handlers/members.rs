use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use remus_shared::api::member::{
    BanRequest, MemberView, MoveMemberRequest, TimeoutRequest, UpdateMemberRolesRequest,
    UpdateNicknameRequest, VoiceStateRequest,
};
use remus_shared::api::ws::ServerEvent;
use remus_shared::constants::MAX_NAME_LENGTH;
use remus_shared::error::RemusError;
use remus_shared::ids::{GuildId, UserId};
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::guild_member::GuildMember;
use crate::perms;
use crate::state::AppState;
use crate::store::MemberRecord;
use crate::ws::RoomKey;

/// GET /api/guilds/:guild_id/members
pub async fn list_members(
    State(state): State<AppState>,
    guild_member: GuildMember,
) -> Result<Json<Vec<MemberView>>, ServerError> {
    Ok(Json(
        crate::handlers::guilds::member_views(&state, &guild_member.guild_id).await?,
    ))
}

async fn require_target(
    state: &AppState,
    guild_id: &GuildId,
    user_id: &UserId,
) -> Result<MemberRecord, ServerError> {
    state
        .store
        .get_member(guild_id, user_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))
}

/// Hierarchy gate for moderation: Administrator, strictly higher top
/// position, or the target is the actor themselves.
async fn require_dominance(
    state: &AppState,
    actor: &GuildMember,
    target: &MemberRecord,
) -> Result<(), ServerError> {
    let roles = state.store.list_roles(&actor.guild_id).await?;
    if perms::can_manage_member(&actor.member, actor.permissions, &roles, target) {
        Ok(())
    } else {
        Err(ServerError(RemusError::Forbidden))
    }
}

async fn push_member_update(state: &AppState, guild_id: &GuildId, user_id: &UserId) {
    let member = match state.store.get_member(guild_id, user_id).await {
        Ok(Some(member)) => member,
        _ => return,
    };
    let profile = state.store.get_profile(user_id).await.ok().flatten();
    state.ws.emit_room(
        &RoomKey::Guild(guild_id.clone()),
        &ServerEvent::MemberUpdate {
            guild_id: guild_id.clone(),
            member: member.view(profile.map(|p| p.view())),
        },
        None,
    );
}

/// PATCH .../members/:user_id/nickname [`member:update`]
pub async fn update_nickname(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    Json(body): Json<UpdateNicknameRequest>,
) -> Result<Json<MemberView>, ServerError> {
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    if user_id != guild_member.user_id {
        guild_member.require(Permissions::MANAGE_SERVER)?;
        require_dominance(&state, &guild_member, &target).await?;
    }

    let nickname = match body.nickname.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(nick) if nick.chars().count() > MAX_NAME_LENGTH => {
            return Err(ServerError(RemusError::Validation(format!(
                "nickname must be at most {MAX_NAME_LENGTH} characters"
            ))))
        }
        Some(nick) => Some(nick.to_string()),
    };
    let member = state
        .store
        .update_nickname(&guild_member.guild_id, &user_id, nickname.as_deref())
        .await?;

    push_member_update(&state, &guild_member.guild_id, &user_id).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.nickname",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "nickname": member.nickname }),
        )
        .await?;
    let profile = state.store.get_profile(&user_id).await?;
    Ok(Json(member.view(profile.map(|p| p.view()))))
}

/// PATCH .../members/:user_id/roles [`member:update`]
pub async fn update_roles(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    Json(body): Json<UpdateMemberRolesRequest>,
) -> Result<Json<MemberView>, ServerError> {
    guild_member.require(Permissions::MANAGE_ROLES)?;
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    // Every role entering or leaving the set must itself be manageable.
    let roles = state.store.list_roles(&guild_member.guild_id).await?;
    let before: std::collections::HashSet<_> = target.role_ids.iter().cloned().collect();
    let after: std::collections::HashSet<_> = body.role_ids.iter().cloned().collect();
    for changed in before.symmetric_difference(&after) {
        if changed.as_str() == guild_member.guild_id.as_str() {
            continue;
        }
        let Some(role) = roles.iter().find(|r| &r.id == changed) else {
            continue;
        };
        if !perms::can_manage_role(&guild_member.member, guild_member.permissions, &roles, role) {
            return Err(ServerError(RemusError::Forbidden));
        }
    }

    let member = state
        .store
        .set_member_roles(&guild_member.guild_id, &user_id, &body.role_ids)
        .await?;
    push_member_update(&state, &guild_member.guild_id, &user_id).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.roles",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "roleIds": member.role_ids }),
        )
        .await?;
    let profile = state.store.get_profile(&user_id).await?;
    Ok(Json(member.view(profile.map(|p| p.view()))))
}

/// PATCH .../members/:user_id/timeout [`member:update`] — minutes null or
/// zero clears; otherwise clamped to `settings.timeoutMaxMinutes`.
pub async fn update_timeout(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    Json(body): Json<TimeoutRequest>,
) -> Result<Json<MemberView>, ServerError> {
    guild_member.require(Permissions::TIMEOUT_MEMBERS)?;
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    let until = match body.minutes {
        None | Some(0) => None,
        Some(minutes) if minutes < 0 => {
            return Err(ServerError(RemusError::Validation(
                "minutes cannot be negative".into(),
            )))
        }
        Some(minutes) => {
            let max = state.store.settings().await?.timeout_max_minutes;
            Some(chrono::Utc::now() + chrono::Duration::minutes(minutes.min(max)))
        }
    };
    let member = state
        .store
        .set_timeout(&guild_member.guild_id, &user_id, until)
        .await?;

    push_member_update(&state, &guild_member.guild_id, &user_id).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.timeout",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "until": member.timeout_until }),
        )
        .await?;
    let profile = state.store.get_profile(&user_id).await?;
    Ok(Json(member.view(profile.map(|p| p.view()))))
}

/// PATCH .../members/:user_id/voice [`member:update`] — server mute and
/// deafen. Muting also force-closes the member's live audio producers.
pub async fn update_voice(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    Json(body): Json<VoiceStateRequest>,
) -> Result<Json<MemberView>, ServerError> {
    if body.muted.is_some() {
        guild_member.require(Permissions::VOICE_MUTE_MEMBERS)?;
    }
    if body.deafened.is_some() {
        guild_member.require(Permissions::VOICE_DEAFEN_MEMBERS)?;
    }
    if body.muted.is_none() && body.deafened.is_none() {
        return Err(ServerError(RemusError::Validation(
            "at least one of muted or deafened must be provided".into(),
        )));
    }
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    let member = state
        .store
        .set_voice_state(&guild_member.guild_id, &user_id, body.muted, body.deafened)
        .await?;
    if body.muted == Some(true) {
        state.voice.force_mute_user(&user_id).await;
    }

    push_member_update(&state, &guild_member.guild_id, &user_id).await;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.voice",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "muted": member.voice_muted, "deafened": member.voice_deafened }),
        )
        .await?;
    let profile = state.store.get_profile(&user_id).await?;
    Ok(Json(member.view(profile.map(|p| p.view()))))
}

/// POST .../members/:user_id/kick [`guild:kicked`, `guild:memberLeft`]
pub async fn kick_member(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
) -> Result<StatusCode, ServerError> {
    guild_member.require(Permissions::KICK_MEMBERS)?;
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    state
        .store
        .remove_member(&guild_member.guild_id, &user_id)
        .await?;
    state.voice.force_mute_user(&user_id).await;

    // `guild:kicked` reaches the target first, then their sockets close.
    state.ws.close_user_sessions(
        &user_id,
        Some(ServerEvent::GuildKicked {
            guild_id: guild_member.guild_id.clone(),
            reason: "kicked".into(),
        }),
    );
    state.ws.emit_room(
        &RoomKey::Guild(guild_member.guild_id.clone()),
        &ServerEvent::GuildMemberLeft {
            guild_id: guild_member.guild_id.clone(),
            user_id: user_id.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.kick",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({}),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// POST .../members/:user_id/ban — ban implies purge and disconnect.
pub async fn ban_member(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    body: Result<Json<BanRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<StatusCode, ServerError> {
    guild_member.require(Permissions::BAN_MEMBERS)?;
    if user_id == guild_member.user_id {
        return Err(ServerError(RemusError::Validation(
            "cannot ban yourself".into(),
        )));
    }
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    // The reason body is optional; a bodyless POST bans without one.
    let reason = body.ok().and_then(|Json(b)| b.reason);
    ban_user(&state, &guild_member.guild_id, &user_id, reason.as_deref()).await?;
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.ban",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "reason": reason }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// Shared ban path for the member endpoint and the admin mirror: persist
/// the ban, purge the user's artifacts, close their sockets.
pub async fn ban_user(
    state: &AppState,
    guild_id: &GuildId,
    user_id: &UserId,
    reason: Option<&str>,
) -> Result<(), RemusError> {
    state.store.add_ban(user_id, reason).await?;
    let uploads = state.store.purge_user(user_id).await?;
    crate::handlers::files::remove_upload_files(state, &uploads).await;
    state.voice.force_mute_user(user_id).await;

    state.ws.close_user_sessions(
        user_id,
        Some(ServerEvent::GuildKicked {
            guild_id: guild_id.clone(),
            reason: "banned".into(),
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
    Ok(())
}

/// POST .../members/:user_id/move [`voice:move`]
pub async fn move_member(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Path((_, user_id)): Path<(GuildId, UserId)>,
    Json(body): Json<MoveMemberRequest>,
) -> Result<StatusCode, ServerError> {
    guild_member.require(Permissions::VOICE_MOVE_MEMBERS)?;
    let target = require_target(&state, &guild_member.guild_id, &user_id).await?;
    require_dominance(&state, &guild_member, &target).await?;

    let channel = state
        .store
        .get_channel(&body.channel_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;
    if channel.kind != "voice" {
        return Err(ServerError(RemusError::Validation(
            "move target must be a voice channel".into(),
        )));
    }

    state.voice.move_user(&user_id, &body.channel_id);
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "member.move",
            Some(&guild_member.user_id),
            Some(user_id.as_str()),
            serde_json::json!({ "channelId": body.channel_id }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// Routes nested under /api/guilds/:guild_id/members.
pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", axum::routing::get(list_members))
        .route("/{user_id}/nickname", axum::routing::patch(update_nickname))
        .route("/{user_id}/roles", axum::routing::patch(update_roles))
        .route("/{user_id}/timeout", axum::routing::patch(update_timeout))
        .route("/{user_id}/voice", axum::routing::patch(update_voice))
        .route("/{user_id}/kick", axum::routing::post(kick_member))
        .route("/{user_id}/ban", axum::routing::post(ban_member))
        .route("/{user_id}/move", axum::routing::post(move_member))
}
