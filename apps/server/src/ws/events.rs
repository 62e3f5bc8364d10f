use remus_shared::api::ws::{AckData, ClientEnvelope, ClientEvent, ServerEvent};
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, SessionId, UserId};
use remus_shared::permissions::Permissions;

use crate::handlers::messages::post_message;
use crate::perms;
use crate::state::AppState;
use crate::ws::RoomKey;

/// Entry point for every inbound gateway event. Requests carrying a `seq`
/// get an ack or nack; fire-and-forget failures are dropped with a debug
/// log.
pub async fn handle(
    state: &AppState,
    session_id: &SessionId,
    user_id: &UserId,
    envelope: ClientEnvelope,
) {
    // Ban enforcement on every socket entrypoint, not just the handshake.
    match state.store.is_banned(user_id).await {
        Ok(false) => {}
        Ok(true) => {
            state.ws.close_user_sessions(
                user_id,
                Some(ServerEvent::AuthBanned { reason: None }),
            );
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "ban check failed for socket event");
            return;
        }
    }

    let seq = envelope.seq;
    let result = dispatch(state, session_id, user_id, envelope.event).await;
    match (seq, result) {
        (Some(seq), Ok(data)) => {
            state
                .ws
                .send_to_session(session_id, ServerEvent::Ack { seq, data });
        }
        (Some(seq), Err(e)) => {
            state.ws.send_to_session(
                session_id,
                ServerEvent::Nack {
                    seq,
                    error: e.to_string(),
                },
            );
        }
        (None, Ok(_)) => {}
        (None, Err(e)) => {
            tracing::debug!(user_id = %user_id, error = %e, "socket event rejected");
        }
    }
}

async fn dispatch(
    state: &AppState,
    session_id: &SessionId,
    user_id: &UserId,
    event: ClientEvent,
) -> Result<AckData, RemusError> {
    match event {
        ClientEvent::GuildJoinRoom { guild_id } => {
            state.store.require_node_guild(&guild_id).await?;
            state
                .store
                .get_member(&guild_id, user_id)
                .await?
                .ok_or(RemusError::Forbidden)?;
            state.ws.join_room(session_id, RoomKey::Guild(guild_id));
            Ok(AckData::Ok {})
        }

        ClientEvent::ChannelJoin { channel_id } => {
            require_channel_perms(state, user_id, &channel_id, Permissions::VIEW_CHANNELS).await?;
            state
                .ws
                .join_room(session_id, RoomKey::Channel(channel_id));
            Ok(AckData::Ok {})
        }

        ClientEvent::TypingStart { channel_id } => {
            require_channel_perms(
                state,
                user_id,
                &channel_id,
                Permissions::VIEW_CHANNELS | Permissions::SEND_MESSAGES,
            )
            .await?;
            state.ws.emit_room(
                &RoomKey::Channel(channel_id.clone()),
                &ServerEvent::TypingStart {
                    channel_id,
                    user_id: user_id.clone(),
                },
                Some(session_id),
            );
            Ok(AckData::Ok {})
        }

        ClientEvent::TypingStop { channel_id } => {
            require_channel_perms(
                state,
                user_id,
                &channel_id,
                Permissions::VIEW_CHANNELS | Permissions::SEND_MESSAGES,
            )
            .await?;
            state.ws.emit_room(
                &RoomKey::Channel(channel_id.clone()),
                &ServerEvent::TypingStop {
                    channel_id,
                    user_id: user_id.clone(),
                },
                Some(session_id),
            );
            Ok(AckData::Ok {})
        }

        ClientEvent::MessageSend {
            channel_id,
            content,
            attachments,
            reply_to_id,
        } => {
            let message = post_message(
                state,
                user_id,
                &channel_id,
                content.as_deref(),
                attachments.as_deref().unwrap_or(&[]),
                reply_to_id.as_ref(),
            )
            .await?;
            Ok(AckData::Message { message })
        }

        ClientEvent::VoiceSnapshot { guild_id } => state.voice.snapshot(&guild_id).await,

        ClientEvent::VoiceJoin { channel_id } => {
            state.voice.join(session_id, user_id, &channel_id).await
        }

        ClientEvent::VoiceGetRouterRtpCapabilities => Ok(state.voice.router_rtp_capabilities()),

        ClientEvent::VoiceCreateSendTransport | ClientEvent::VoiceCreateRecvTransport => {
            state.voice.create_transport(session_id).await
        }

        ClientEvent::VoiceConnectTransport {
            transport_id,
            dtls_parameters,
        } => {
            state
                .voice
                .connect_transport(session_id, &transport_id, dtls_parameters)
                .await
        }

        ClientEvent::VoiceProduce {
            transport_id,
            kind,
            rtp_parameters,
            app_data,
        } => {
            state
                .voice
                .produce(session_id, user_id, &transport_id, kind, rtp_parameters, app_data)
                .await
        }

        ClientEvent::VoiceConsume {
            producer_id,
            transport_id,
            rtp_capabilities,
        } => {
            state
                .voice
                .consume(session_id, &producer_id, &transport_id, rtp_capabilities)
                .await
        }

        ClientEvent::VoiceResumeConsumer { consumer_id } => {
            state.voice.resume_consumer(session_id, &consumer_id).await
        }

        ClientEvent::VoiceCloseProducer { producer_id } => {
            state.voice.close_producer(session_id, &producer_id).await
        }

        ClientEvent::VoiceSpeaking {
            channel_id,
            speaking,
        } => {
            state
                .voice
                .speaking(session_id, user_id, &channel_id, speaking)
                .await?;
            Ok(AckData::Ok {})
        }

        ClientEvent::VoiceLeave => state.voice.leave(session_id).await,
    }
}

async fn require_channel_perms(
    state: &AppState,
    user_id: &UserId,
    channel_id: &ChannelId,
    required: Permissions,
) -> Result<(), RemusError> {
    let guild_id = state.store.node_guild_id().await?;
    let perms = perms::permissions(&state.store, &guild_id, user_id, Some(channel_id)).await?;
    if perms.contains(required) {
        Ok(())
    } else {
        Err(RemusError::Forbidden)
    }
}
