use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use remus_shared::api::message::{CreateMessageRequest, MessageHistoryQuery, MessageView};
use remus_shared::api::ws::ServerEvent;
use remus_shared::constants::MAX_MESSAGE_LENGTH;
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, MessageId, UploadId, UserId};
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::channel_member::ChannelMember;
use crate::state::AppState;
use crate::ws::RoomKey;

/// Shared message-creation path for the REST POST and the socket
/// `message:send`: validate, dereference attachments, persist, fan out
/// `message:new` to the channel room.
pub async fn post_message(
    state: &AppState,
    author_id: &UserId,
    channel_id: &ChannelId,
    content: Option<&str>,
    attachment_ids: &[UploadId],
    reply_to_id: Option<&MessageId>,
) -> Result<MessageView, RemusError> {
    let guild_id = state.store.node_guild_id().await?;
    let channel = state
        .store
        .get_channel(channel_id)
        .await?
        .ok_or(RemusError::NotFound)?;
    if channel.kind != "text" {
        return Err(RemusError::Validation("not a text channel".into()));
    }
    let perms =
        crate::perms::permissions(&state.store, &guild_id, author_id, Some(channel_id)).await?;
    if !perms.contains(Permissions::VIEW_CHANNELS | Permissions::SEND_MESSAGES) {
        return Err(RemusError::Forbidden);
    }

    let content = content.unwrap_or("").trim().to_string();
    if content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(RemusError::Validation(format!(
            "content exceeds {MAX_MESSAGE_LENGTH} characters"
        )));
    }

    // Only uploads owned by (channel, author) survive; duplicates collapse.
    let attachments = state
        .store
        .uploads_owned_by(attachment_ids, channel_id, author_id)
        .await?;
    if content.is_empty() && attachments.is_empty() {
        return Err(RemusError::Validation(
            "message needs content or at least one attachment".into(),
        ));
    }

    let message = state
        .store
        .create_message(channel_id, author_id, &content, &attachments, reply_to_id)
        .await?;

    state.ws.emit_room(
        &RoomKey::Channel(channel_id.clone()),
        &ServerEvent::MessageNew {
            message: message.clone(),
        },
        None,
    );
    Ok(message)
}

/// GET /api/channels/:channel_id/messages
pub async fn list_messages(
    State(state): State<AppState>,
    channel_member: ChannelMember,
    Query(params): Query<MessageHistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    channel_member.require(Permissions::VIEW_CHANNELS | Permissions::READ_HISTORY)?;
    let limit = params.limit.unwrap_or(50).clamp(1, 100) as i64;
    let messages = state
        .store
        .list_messages(&channel_member.channel_id, params.before.as_ref(), limit)
        .await?;
    Ok(Json(messages))
}

/// POST /api/channels/:channel_id/messages [`message:new`]
pub async fn create_message(
    State(state): State<AppState>,
    channel_member: ChannelMember,
    Json(body): Json<CreateMessageRequest>,
) -> Result<(StatusCode, Json<MessageView>), ServerError> {
    let message = post_message(
        &state,
        &channel_member.user_id,
        &channel_member.channel_id,
        body.content.as_deref(),
        body.attachments.as_deref().unwrap_or(&[]),
        body.reply_to_id.as_ref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// DELETE /api/channels/:channel_id/messages/:message_id [`message:delete`]
/// Author may delete their own; MANAGE_MESSAGES deletes anything.
pub async fn delete_message(
    State(state): State<AppState>,
    channel_member: ChannelMember,
    Path((_, message_id)): Path<(ChannelId, MessageId)>,
) -> Result<StatusCode, ServerError> {
    let message = state
        .store
        .get_message(&message_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;
    if message.channel_id != channel_member.channel_id {
        return Err(ServerError(RemusError::NotFound));
    }
    if message.author_id != channel_member.user_id {
        channel_member.require(Permissions::MANAGE_MESSAGES)?;
    }

    let removed = state.store.delete_message(&message_id).await?;
    crate::handlers::files::remove_attachment_files(&state, &removed.attachments).await;

    state.ws.emit_room(
        &RoomKey::Channel(channel_member.channel_id.clone()),
        &ServerEvent::MessageDelete {
            channel_id: channel_member.channel_id.clone(),
            message_id,
        },
        None,
    );
    state
        .store
        .add_audit(
            &channel_member.guild_id,
            "message.delete",
            Some(&channel_member.user_id),
            Some(removed.id.as_str()),
            serde_json::json!({ "channelId": channel_member.channel_id }),
        )
        .await?;
    Ok(StatusCode::OK)
}

pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/",
            axum::routing::get(list_messages).post(create_message),
        )
        .route("/{message_id}", axum::routing::delete(delete_message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_build_without_panic() {
        let _ = routes();
    }
}
