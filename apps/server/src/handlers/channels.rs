use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use remus_shared::api::channel::{
    ChannelView, CreateChannelRequest, ReorderEntry, UpdateChannelRequest,
};
use remus_shared::api::ws::ServerEvent;
use remus_shared::constants::MAX_NAME_LENGTH;
use remus_shared::error::RemusError;
use remus_shared::ids::ChannelId;
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::channel_member::ChannelMember;
use crate::extractors::guild_member::GuildMember;
use crate::state::AppState;
use crate::ws::RoomKey;

fn validate_channel_name(name: &str) -> Result<(), ServerError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ServerError(RemusError::Validation(format!(
            "channel name must be 1-{MAX_NAME_LENGTH} characters"
        ))));
    }
    Ok(())
}

/// GET /api/guilds/:guild_id/channels
pub async fn list_channels(
    State(state): State<AppState>,
    guild_member: GuildMember,
) -> Result<Json<Vec<ChannelView>>, ServerError> {
    let channels = state.store.list_channels(&guild_member.guild_id).await?;
    Ok(Json(channels.iter().map(|c| c.view()).collect()))
}

/// POST /api/guilds/:guild_id/channels [`channel:new`]
pub async fn create_channel(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Json(body): Json<CreateChannelRequest>,
) -> Result<(StatusCode, Json<ChannelView>), ServerError> {
    guild_member.require(Permissions::MANAGE_CHANNELS)?;
    validate_channel_name(&body.name)?;

    let channel = state
        .store
        .create_channel(
            &guild_member.guild_id,
            body.name.trim(),
            body.kind,
            body.category_id.as_ref(),
            Some(&guild_member.user_id),
        )
        .await?;
    let view = channel.view();

    state.ws.emit_room(
        &RoomKey::Guild(guild_member.guild_id.clone()),
        &ServerEvent::ChannelNew {
            channel: view.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "channel.create",
            Some(&guild_member.user_id),
            Some(channel.id.as_str()),
            serde_json::json!({ "name": channel.name, "type": channel.kind }),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// PATCH /api/guilds/:guild_id/channels/order [`channel:update` ×N]
pub async fn reorder_channels(
    State(state): State<AppState>,
    guild_member: GuildMember,
    Json(batch): Json<Vec<ReorderEntry>>,
) -> Result<StatusCode, ServerError> {
    guild_member.require(Permissions::MANAGE_CHANNELS)?;
    if batch.is_empty() {
        return Err(ServerError(RemusError::Validation(
            "reorder batch cannot be empty".into(),
        )));
    }
    {
        let mut seen = std::collections::HashSet::new();
        for entry in &batch {
            if !seen.insert(entry.id.clone()) {
                return Err(ServerError(RemusError::Validation(
                    "duplicate channel in reorder batch".into(),
                )));
            }
        }
    }

    state
        .store
        .update_channel_positions(&guild_member.guild_id, &batch)
        .await?;

    for entry in &batch {
        if let Some(channel) = state.store.get_channel(&entry.id).await? {
            state.ws.emit_room(
                &RoomKey::Guild(guild_member.guild_id.clone()),
                &ServerEvent::ChannelUpdate {
                    channel: channel.view(),
                },
                None,
            );
        }
    }
    state
        .store
        .add_audit(
            &guild_member.guild_id,
            "channel.reorder",
            Some(&guild_member.user_id),
            None,
            serde_json::json!({ "count": batch.len() }),
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/channels/:channel_id [`channel:update`]
pub async fn update_channel(
    State(state): State<AppState>,
    channel_member: ChannelMember,
    Json(body): Json<UpdateChannelRequest>,
) -> Result<Json<ChannelView>, ServerError> {
    channel_member.require(Permissions::MANAGE_CHANNELS)?;

    let channel = state
        .store
        .get_channel(&channel_member.channel_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;

    if body.name.is_none() && body.category_id.is_none() && body.permission_overrides.is_none() {
        return Err(ServerError(RemusError::Validation(
            "at least one field must be provided".into(),
        )));
    }

    if let Some(name) = &body.name {
        validate_channel_name(name)?;
        state
            .store
            .rename_channel(&channel_member.channel_id, name.trim())
            .await?;
    }
    if let Some(category) = &body.category_id {
        // Empty string moves the channel to the top level.
        let target = if category.is_empty() {
            None
        } else {
            Some(ChannelId::from(category.as_str()))
        };
        state
            .store
            .set_channel_category(&channel, target.as_ref())
            .await?;
    }
    if let Some(overrides) = &body.permission_overrides {
        state
            .store
            .set_channel_overrides(&channel_member.channel_id, overrides)
            .await?;
    }

    let updated = state
        .store
        .get_channel(&channel_member.channel_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;
    let view = updated.view();

    state.ws.emit_room(
        &RoomKey::Guild(channel_member.guild_id.clone()),
        &ServerEvent::ChannelUpdate {
            channel: view.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &channel_member.guild_id,
            "channel.update",
            Some(&channel_member.user_id),
            Some(channel_member.channel_id.as_str()),
            serde_json::json!({ "name": updated.name }),
        )
        .await?;
    Ok(Json(view))
}

/// DELETE /api/channels/:channel_id [`channel:delete`]
pub async fn delete_channel(
    State(state): State<AppState>,
    channel_member: ChannelMember,
) -> Result<StatusCode, ServerError> {
    channel_member.require(Permissions::MANAGE_CHANNELS)?;

    let (channel, uploads) = state
        .store
        .delete_channel(&channel_member.channel_id)
        .await?;
    crate::handlers::files::remove_upload_files(&state, &uploads).await;

    state.ws.emit_room(
        &RoomKey::Guild(channel_member.guild_id.clone()),
        &ServerEvent::ChannelDelete {
            channel_id: channel_member.channel_id.clone(),
        },
        None,
    );
    state
        .store
        .add_audit(
            &channel_member.guild_id,
            "channel.delete",
            Some(&channel_member.user_id),
            Some(channel.id.as_str()),
            serde_json::json!({ "name": channel.name, "uploads": uploads.len() }),
        )
        .await?;
    Ok(StatusCode::OK)
}

/// Routes nested under /api/guilds/:guild_id/channels.
pub fn guild_routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/", axum::routing::get(list_channels).post(create_channel))
        .route("/order", axum::routing::patch(reorder_channels))
}

/// Routes nested under /api/channels/:channel_id.
pub fn detail_routes() -> axum::Router<AppState> {
    axum::Router::new().route(
        "/",
        axum::routing::patch(update_channel).delete(delete_channel),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_length_checked() {
        assert!(validate_channel_name("general").is_ok());
        assert!(validate_channel_name("  ").is_err());
        assert!(validate_channel_name(&"x".repeat(101)).is_err());
        assert!(validate_channel_name(&"x".repeat(100)).is_ok());
    }

    #[test]
    fn routes_build_without_panic() {
        let _ = guild_routes();
        let _ = detail_routes();
    }
}
