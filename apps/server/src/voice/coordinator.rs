use std::collections::BTreeMap;
use std::sync::Arc;

use remus_shared::api::voice::{
    ConsumerParams, MediaKind, ParticipantView, TransportParams, VoicePresenceView,
};
use remus_shared::api::ws::{AckData, ServerEvent};
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, ConsumerId, GuildId, ProducerId, SessionId, TransportId, UserId};
use remus_shared::permissions::Permissions;

use crate::config::ServerConfig;
use crate::perms;
use crate::rate_limit::{RateBuckets, VOICE_JOINS_PER_MINUTE, WINDOW};
use crate::store::Store;
use crate::voice::media::{MediaError, MediaRouter, WebRtcTransportOptions};
use crate::voice::rooms::{Peer, ProducerEntry, VoiceRooms};
use crate::ws::{RoomKey, WsState};

/// Per-voice-channel signaling: peers, transports, producer/consumer
/// negotiation, presence and speaking fan-out, moderation hooks. Drives the
/// media worker through the adapter and owns all transient room state.
pub struct VoiceCoordinator {
    router: Arc<dyn MediaRouter>,
    rooms: VoiceRooms,
    ws: Arc<WsState>,
    store: Store,
    rate: Arc<RateBuckets>,
    transport_options: WebRtcTransportOptions,
}

impl From<MediaError> for RemusError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::NotConnected | MediaError::UnknownProducer | MediaError::CannotConsume => {
                RemusError::Validation(e.to_string())
            }
            MediaError::Worker(msg) => RemusError::Internal(msg),
        }
    }
}

impl VoiceCoordinator {
    pub fn new(
        router: Arc<dyn MediaRouter>,
        ws: Arc<WsState>,
        store: Store,
        rate: Arc<RateBuckets>,
        config: &ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            rooms: VoiceRooms::new(),
            ws,
            store,
            rate,
            transport_options: WebRtcTransportOptions {
                listen_ip: config.media.listen_ip.clone(),
                announced_ip: config.media.announced_ip.clone(),
                port_range: (config.media.min_port as u16, config.media.max_port as u16),
                enable_udp: true,
                enable_tcp: true,
                prefer_udp: true,
            },
        })
    }

    // ─── Join / leave ───────────────────────────────────────

    pub async fn join(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        channel_id: &ChannelId,
    ) -> Result<AckData, RemusError> {
        if !self
            .rate
            .check("voice:join", user_id, VOICE_JOINS_PER_MINUTE, WINDOW)
        {
            return Err(RemusError::RateLimited);
        }

        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or(RemusError::NotFound)?;
        if channel.kind != "voice" {
            return Err(RemusError::Validation("not a voice channel".into()));
        }
        let guild_id = channel.guild_id.clone();
        let perms = perms::permissions(&self.store, &guild_id, user_id, Some(channel_id)).await?;
        if !perms.contains(Permissions::VIEW_CHANNELS | Permissions::VOICE_CONNECT) {
            return Err(RemusError::Forbidden);
        }

        // One voice channel per session; switching leaves the old one first.
        if self.rooms.channel_of(session_id).is_some() {
            self.cleanup_session(session_id).await;
        }

        self.rooms.insert_peer(Peer::new(
            session_id.clone(),
            user_id.clone(),
            channel_id.clone(),
        ));
        self.ws
            .join_room(session_id, RoomKey::Voice(channel_id.clone()));

        let participants = self.participants(channel_id, Some(session_id)).await?;

        // Everyone already in the room sees the refreshed roster.
        let roster = self.participants(channel_id, None).await?;
        self.ws.emit_room(
            &RoomKey::Voice(channel_id.clone()),
            &ServerEvent::VoiceParticipants {
                channel_id: channel_id.clone(),
                participants: roster,
            },
            Some(session_id),
        );

        let existing: Vec<_> = self
            .rooms
            .with_room(channel_id, |room| {
                room.producers
                    .values()
                    .filter(|entry| &entry.peer_id != session_id)
                    .map(|entry| entry.view())
                    .collect()
            })
            .unwrap_or_default();
        self.ws.send_to_session(
            session_id,
            ServerEvent::VoiceExistingProducers { producers: existing },
        );

        self.broadcast_presence(&guild_id, channel_id).await;

        Ok(AckData::Participants { participants })
    }

    pub async fn leave(&self, session_id: &SessionId) -> Result<AckData, RemusError> {
        self.cleanup_session(session_id).await;
        Ok(AckData::Ok {})
    }

    /// Socket-level disconnect hook; same cleanup as an explicit leave.
    pub async fn handle_disconnect(&self, session_id: &SessionId) {
        self.cleanup_session(session_id).await;
    }

    // ─── Capabilities & transports ──────────────────────────

    pub fn router_rtp_capabilities(&self) -> AckData {
        AckData::RouterRtpCapabilities {
            router_rtp_capabilities: self.router.rtp_capabilities(),
        }
    }

    pub async fn create_transport(&self, session_id: &SessionId) -> Result<AckData, RemusError> {
        self.rooms
            .channel_of(session_id)
            .ok_or_else(|| RemusError::Validation("not in a voice channel".into()))?;

        let transport = self
            .router
            .create_webrtc_transport(self.transport_options.clone())
            .await?;
        let params = TransportParams {
            id: transport.id(),
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
        };
        self.rooms.with_peer_mut(session_id, |peer| {
            peer.transports.insert(transport.id(), transport.clone());
        });
        Ok(AckData::Transport { transport: params })
    }

    pub async fn connect_transport(
        &self,
        session_id: &SessionId,
        transport_id: &TransportId,
        dtls_parameters: serde_json::Value,
    ) -> Result<AckData, RemusError> {
        let transport = self
            .rooms
            .with_peer_mut(session_id, |peer| peer.transports.get(transport_id).cloned())
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown transport".into()))?;
        transport.connect(dtls_parameters).await?;
        Ok(AckData::Ok {})
    }

    // ─── Producers ──────────────────────────────────────────

    pub async fn produce(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        app_data: serde_json::Value,
    ) -> Result<AckData, RemusError> {
        let channel_id = self
            .rooms
            .channel_of(session_id)
            .ok_or_else(|| RemusError::Validation("not in a voice channel".into()))?;
        let guild_id = self.store.node_guild_id().await?;
        let perms =
            perms::permissions(&self.store, &guild_id, user_id, Some(&channel_id)).await?;

        let share_type = app_data.get("type").and_then(|t| t.as_str()).unwrap_or("");
        let is_screen_share =
            kind == MediaKind::Video || share_type == "screen" || share_type == "screen-audio";
        if is_screen_share {
            if !perms.contains(Permissions::SCREENSHARE) {
                return Err(RemusError::Forbidden);
            }
        } else {
            if !perms.contains(Permissions::VOICE_SPEAK) {
                return Err(RemusError::Forbidden);
            }
            let member = self
                .store
                .get_member(&guild_id, user_id)
                .await?
                .ok_or(RemusError::Forbidden)?;
            if member.voice_muted {
                return Err(RemusError::Forbidden);
            }
        }

        let transport = self
            .rooms
            .with_peer_mut(session_id, |peer| peer.transports.get(transport_id).cloned())
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown transport".into()))?;

        let mut app_data = if app_data.is_object() {
            app_data
        } else {
            serde_json::json!({})
        };
        app_data["peerId"] = serde_json::json!(session_id);
        app_data["userId"] = serde_json::json!(user_id);

        let producer = transport.produce(kind, rtp_parameters, app_data).await?;
        let entry = ProducerEntry {
            producer: producer.clone(),
            peer_id: session_id.clone(),
            user_id: user_id.clone(),
        };
        let view = entry.view();
        self.rooms.with_peer_mut(session_id, |peer| {
            peer.producers.insert(producer.id(), producer.clone());
        });
        self.rooms.with_room_mut(&channel_id, |room| {
            room.producers.insert(producer.id(), entry);
        });

        self.ws.emit_room(
            &RoomKey::Voice(channel_id),
            &ServerEvent::VoiceNewProducer { producer: view },
            Some(session_id),
        );

        Ok(AckData::Produced {
            producer_id: producer.id(),
        })
    }

    pub async fn close_producer(
        &self,
        session_id: &SessionId,
        producer_id: &ProducerId,
    ) -> Result<AckData, RemusError> {
        let channel_id = self
            .rooms
            .channel_of(session_id)
            .ok_or_else(|| RemusError::Validation("not in a voice channel".into()))?;
        let producer = self
            .rooms
            .with_peer_mut(session_id, |peer| peer.producers.remove(producer_id))
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown producer".into()))?;
        self.rooms.with_room_mut(&channel_id, |room| {
            room.producers.remove(producer_id);
        });
        producer.close().await;

        self.ws.emit_room(
            &RoomKey::Voice(channel_id),
            &ServerEvent::VoiceProducerClosed {
                producer_id: producer_id.clone(),
                peer_id: session_id.clone(),
            },
            None,
        );
        Ok(AckData::Ok {})
    }

    // ─── Consumers ──────────────────────────────────────────

    pub async fn consume(
        &self,
        session_id: &SessionId,
        producer_id: &ProducerId,
        transport_id: &TransportId,
        rtp_capabilities: serde_json::Value,
    ) -> Result<AckData, RemusError> {
        let channel_id = self
            .rooms
            .channel_of(session_id)
            .ok_or_else(|| RemusError::Validation("not in a voice channel".into()))?;
        if !self.router.can_consume(producer_id, &rtp_capabilities) {
            return Err(RemusError::Validation("cannot consume producer".into()));
        }
        let source = self
            .rooms
            .with_room(&channel_id, |room| room.producers.get(producer_id).cloned())
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown producer".into()))?;
        let transport = self
            .rooms
            .with_peer_mut(session_id, |peer| peer.transports.get(transport_id).cloned())
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown transport".into()))?;

        // Consumers start paused; the client resumes once its side is wired.
        let consumer = transport
            .consume(producer_id, rtp_capabilities, true)
            .await?;
        let params = ConsumerParams {
            id: consumer.id(),
            producer_id: producer_id.clone(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
            app_data: source.producer.app_data(),
            peer_id: source.peer_id.clone(),
        };
        self.rooms.with_peer_mut(session_id, |peer| {
            peer.consumers.insert(consumer.id(), consumer.clone());
        });
        Ok(AckData::Consumed { consumer: params })
    }

    pub async fn resume_consumer(
        &self,
        session_id: &SessionId,
        consumer_id: &ConsumerId,
    ) -> Result<AckData, RemusError> {
        let consumer = self
            .rooms
            .with_peer_mut(session_id, |peer| peer.consumers.get(consumer_id).cloned())
            .flatten()
            .ok_or_else(|| RemusError::Validation("unknown consumer".into()))?;
        consumer.resume().await?;
        Ok(AckData::Ok {})
    }

    // ─── Speaking & presence ────────────────────────────────

    pub async fn speaking(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
        channel_id: &ChannelId,
        speaking: bool,
    ) -> Result<(), RemusError> {
        let current = self
            .rooms
            .channel_of(session_id)
            .ok_or_else(|| RemusError::Validation("not in a voice channel".into()))?;
        if &current != channel_id {
            return Err(RemusError::Validation("not in that voice channel".into()));
        }
        let guild_id = self.store.node_guild_id().await?;
        let perms =
            perms::permissions(&self.store, &guild_id, user_id, Some(channel_id)).await?;
        if !perms.contains(Permissions::VOICE_SPEAK) {
            return Err(RemusError::Forbidden);
        }

        let speaking_ids = self
            .rooms
            .with_room_mut(channel_id, |room| {
                if speaking {
                    room.speaking.insert(session_id.clone());
                } else {
                    room.speaking.remove(session_id);
                }
                let mut ids: Vec<SessionId> = room.speaking.iter().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default();

        let room_key = RoomKey::Voice(channel_id.clone());
        self.ws.emit_room(
            &room_key,
            &ServerEvent::VoiceSpeaking {
                channel_id: channel_id.clone(),
                peer_id: session_id.clone(),
                user_id: user_id.clone(),
                speaking,
            },
            None,
        );
        self.ws.emit_room(
            &room_key,
            &ServerEvent::VoiceSpeakingAll {
                channel_id: channel_id.clone(),
                speaking_user_ids: speaking_ids,
            },
            None,
        );
        self.broadcast_presence(&guild_id, channel_id).await;
        Ok(())
    }

    /// Presence for one channel: peer session ids (one user on two sockets
    /// appears twice), their profiles, and the speaking set.
    pub async fn presence(&self, channel_id: &ChannelId) -> Result<VoicePresenceView, RemusError> {
        let Some((session_ids, user_ids, speaking)) =
            self.rooms.with_room(channel_id, |room| {
                let mut session_ids: Vec<SessionId> = room.peers.keys().cloned().collect();
                session_ids.sort();
                let user_ids: Vec<UserId> =
                    room.peers.values().map(|peer| peer.user_id.clone()).collect();
                let mut speaking: Vec<SessionId> = room.speaking.iter().cloned().collect();
                speaking.sort();
                (session_ids, user_ids, speaking)
            })
        else {
            return Ok(VoicePresenceView::default());
        };

        let unique: Vec<UserId> = {
            let mut seen = std::collections::HashSet::new();
            user_ids
                .into_iter()
                .filter(|id| seen.insert(id.clone()))
                .collect()
        };
        let profiles = self.store.profiles_by_ids(&unique).await?;
        let users = unique
            .iter()
            .filter_map(|id| profiles.get(id).map(|p| p.view()))
            .collect();

        Ok(VoicePresenceView {
            user_ids: session_ids,
            users,
            speaking_user_ids: speaking,
        })
    }

    pub async fn snapshot(&self, guild_id: &GuildId) -> Result<AckData, RemusError> {
        self.store.require_node_guild(guild_id).await?;
        Ok(AckData::Snapshot {
            channels: self.presence_map().await?,
        })
    }

    async fn presence_map(
        &self,
    ) -> Result<BTreeMap<ChannelId, VoicePresenceView>, RemusError> {
        let mut channels = BTreeMap::new();
        for channel_id in self.rooms.occupied_channels() {
            channels.insert(channel_id.clone(), self.presence(&channel_id).await?);
        }
        Ok(channels)
    }

    async fn broadcast_presence(&self, guild_id: &GuildId, channel_id: &ChannelId) {
        let presence = match self.presence(channel_id).await {
            Ok(presence) => presence,
            Err(e) => {
                tracing::error!(error = %e, "presence computation failed");
                return;
            }
        };
        self.ws.emit_room(
            &RoomKey::Voice(channel_id.clone()),
            &ServerEvent::VoicePresence {
                channel_id: channel_id.clone(),
                presence: presence.clone(),
            },
            None,
        );
        let all = match self.presence_map().await {
            Ok(all) => all,
            Err(e) => {
                tracing::error!(error = %e, "presence snapshot failed");
                return;
            }
        };
        self.ws.emit_room(
            &RoomKey::Guild(guild_id.clone()),
            &ServerEvent::VoicePresenceAll {
                guild_id: guild_id.clone(),
                channels: all,
            },
            None,
        );
    }

    async fn participants(
        &self,
        channel_id: &ChannelId,
        except: Option<&SessionId>,
    ) -> Result<Vec<ParticipantView>, RemusError> {
        let peers: Vec<(SessionId, UserId)> = self
            .rooms
            .with_room(channel_id, |room| {
                room.peers
                    .values()
                    .filter(|peer| Some(&peer.session_id) != except)
                    .map(|peer| (peer.session_id.clone(), peer.user_id.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let guild_id = self.store.node_guild_id().await?;
        let user_ids: Vec<UserId> = peers.iter().map(|(_, user_id)| user_id.clone()).collect();
        let profiles = self.store.profiles_by_ids(&user_ids).await?;

        let mut participants = Vec::with_capacity(peers.len());
        for (session_id, user_id) in peers {
            let member = self.store.get_member(&guild_id, &user_id).await?;
            participants.push(ParticipantView {
                session_id,
                username: profiles
                    .get(&user_id)
                    .map(|p| p.username.clone())
                    .unwrap_or_else(|| user_id.as_str().to_string()),
                voice_muted: member.as_ref().map(|m| m.voice_muted).unwrap_or(false),
                voice_deafened: member.as_ref().map(|m| m.voice_deafened).unwrap_or(false),
                user_id,
            });
        }
        participants.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(participants)
    }

    // ─── Cleanup & moderation hooks ─────────────────────────

    /// Full peer teardown: close consumers, producers, transports, announce
    /// closed producers, drop the peer, refresh presence.
    async fn cleanup_session(&self, session_id: &SessionId) {
        let Some(peer) = self.rooms.remove_peer(session_id) else {
            return;
        };
        let channel_id = peer.channel_id.clone();
        self.ws
            .leave_room(session_id, &RoomKey::Voice(channel_id.clone()));

        for consumer in peer.consumers.values() {
            consumer.close().await;
        }
        for (producer_id, producer) in &peer.producers {
            producer.close().await;
            self.ws.emit_room(
                &RoomKey::Voice(channel_id.clone()),
                &ServerEvent::VoiceProducerClosed {
                    producer_id: producer_id.clone(),
                    peer_id: session_id.clone(),
                },
                None,
            );
        }
        for transport in peer.transports.values() {
            transport.close().await;
        }

        if let Ok(guild_id) = self.store.node_guild_id().await {
            self.broadcast_presence(&guild_id, &channel_id).await;
        }
        tracing::debug!(session_id = %session_id, channel_id = %channel_id, "voice peer cleaned up");
    }

    /// Close every audio (and screen-audio) producer the user holds, across
    /// all of their sessions, broadcasting each closure.
    pub async fn force_mute_user(&self, user_id: &UserId) {
        for session_id in self.rooms.sessions_of_user(user_id) {
            let Some(channel_id) = self.rooms.channel_of(&session_id) else {
                continue;
            };
            let audible: Vec<ProducerEntry> = self
                .rooms
                .with_room(&channel_id, |room| {
                    room.producers
                        .values()
                        .filter(|entry| entry.peer_id == session_id && entry.carries_audio())
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            for entry in audible {
                let producer_id = entry.producer.id();
                self.rooms.with_peer_mut(&session_id, |peer| {
                    peer.producers.remove(&producer_id);
                });
                self.rooms.with_room_mut(&channel_id, |room| {
                    room.producers.remove(&producer_id);
                });
                entry.producer.close().await;
                self.ws.emit_room(
                    &RoomKey::Voice(channel_id.clone()),
                    &ServerEvent::VoiceProducerClosed {
                        producer_id,
                        peer_id: session_id.clone(),
                    },
                    None,
                );
            }
        }
    }

    /// Ask each of the user's sockets to re-join in the target channel.
    pub fn move_user(&self, user_id: &UserId, channel_id: &ChannelId) {
        self.ws.emit_user(
            user_id,
            &ServerEvent::VoiceMove {
                channel_id: channel_id.clone(),
            },
        );
    }
}
