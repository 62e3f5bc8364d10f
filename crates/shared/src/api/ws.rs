use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::channel::ChannelView;
use crate::api::member::MemberView;
use crate::api::message::MessageView;
use crate::api::voice::{
    ConsumerParams, MediaKind, ParticipantView, ProducerView, TransportParams, VoicePresenceView,
};
use crate::ids::{
    ChannelId, ConsumerId, GuildId, MessageId, ProducerId, SessionId, TransportId, UploadId, UserId,
};

/// Wrapper around an inbound event. Requests that expect a reply carry a
/// client-chosen `seq`; the server answers with `ack`/`nack` echoing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

/// Events sent from the client to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "guild:joinRoom")]
    GuildJoinRoom { guild_id: GuildId },
    #[serde(rename = "channel:join")]
    ChannelJoin { channel_id: ChannelId },
    #[serde(rename = "typing:start")]
    TypingStart { channel_id: ChannelId },
    #[serde(rename = "typing:stop")]
    TypingStop { channel_id: ChannelId },
    #[serde(rename = "message:send")]
    MessageSend {
        channel_id: ChannelId,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        attachments: Option<Vec<UploadId>>,
        #[serde(default)]
        reply_to_id: Option<MessageId>,
    },
    #[serde(rename = "voice:snapshot")]
    VoiceSnapshot { guild_id: GuildId },
    #[serde(rename = "voice:join")]
    VoiceJoin { channel_id: ChannelId },
    #[serde(rename = "voice:getRouterRtpCapabilities")]
    VoiceGetRouterRtpCapabilities,
    #[serde(rename = "voice:createSendTransport")]
    VoiceCreateSendTransport,
    #[serde(rename = "voice:createRecvTransport")]
    VoiceCreateRecvTransport,
    #[serde(rename = "voice:connectTransport")]
    VoiceConnectTransport {
        transport_id: TransportId,
        dtls_parameters: serde_json::Value,
    },
    #[serde(rename = "voice:produce")]
    VoiceProduce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        #[serde(default)]
        app_data: serde_json::Value,
    },
    #[serde(rename = "voice:consume")]
    VoiceConsume {
        producer_id: ProducerId,
        transport_id: TransportId,
        rtp_capabilities: serde_json::Value,
    },
    #[serde(rename = "voice:resumeConsumer")]
    VoiceResumeConsumer { consumer_id: ConsumerId },
    #[serde(rename = "voice:closeProducer")]
    VoiceCloseProducer { producer_id: ProducerId },
    #[serde(rename = "voice:speaking")]
    VoiceSpeaking { channel_id: ChannelId, speaking: bool },
    #[serde(rename = "voice:leave")]
    VoiceLeave,
}

/// Ack payloads. All variants are structs with distinct field names so the
/// untagged representation stays unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum AckData {
    Participants {
        participants: Vec<ParticipantView>,
    },
    RouterRtpCapabilities {
        router_rtp_capabilities: serde_json::Value,
    },
    Transport {
        transport: TransportParams,
    },
    Produced {
        producer_id: ProducerId,
    },
    Consumed {
        consumer: ConsumerParams,
    },
    Snapshot {
        channels: BTreeMap<ChannelId, VoicePresenceView>,
    },
    Message {
        message: MessageView,
    },
    Ok {},
}

/// Events pushed from the gateway to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message:new")]
    MessageNew { message: MessageView },
    #[serde(rename = "message:delete")]
    MessageDelete {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    #[serde(rename = "typing:start")]
    TypingStart {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "typing:stop")]
    TypingStop {
        channel_id: ChannelId,
        user_id: UserId,
    },
    #[serde(rename = "channel:new")]
    ChannelNew { channel: ChannelView },
    #[serde(rename = "channel:update")]
    ChannelUpdate { channel: ChannelView },
    #[serde(rename = "channel:delete")]
    ChannelDelete { channel_id: ChannelId },
    #[serde(rename = "guild:memberJoined")]
    GuildMemberJoined { guild_id: GuildId, member: MemberView },
    #[serde(rename = "guild:memberLeft")]
    GuildMemberLeft { guild_id: GuildId, user_id: UserId },
    #[serde(rename = "guild:kicked")]
    GuildKicked { guild_id: GuildId, reason: String },
    #[serde(rename = "member:update")]
    MemberUpdate { guild_id: GuildId, member: MemberView },
    #[serde(rename = "auth:banned")]
    AuthBanned {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "voice:presence")]
    VoicePresence {
        channel_id: ChannelId,
        presence: VoicePresenceView,
    },
    #[serde(rename = "voice:presenceAll")]
    VoicePresenceAll {
        guild_id: GuildId,
        channels: BTreeMap<ChannelId, VoicePresenceView>,
    },
    #[serde(rename = "voice:speaking")]
    VoiceSpeaking {
        channel_id: ChannelId,
        peer_id: SessionId,
        user_id: UserId,
        speaking: bool,
    },
    #[serde(rename = "voice:speakingAll")]
    VoiceSpeakingAll {
        channel_id: ChannelId,
        speaking_user_ids: Vec<SessionId>,
    },
    #[serde(rename = "voice:newProducer")]
    VoiceNewProducer { producer: ProducerView },
    #[serde(rename = "voice:existingProducers")]
    VoiceExistingProducers { producers: Vec<ProducerView> },
    #[serde(rename = "voice:producerClosed")]
    VoiceProducerClosed {
        producer_id: ProducerId,
        peer_id: SessionId,
    },
    #[serde(rename = "voice:participants")]
    VoiceParticipants {
        channel_id: ChannelId,
        participants: Vec<ParticipantView>,
    },
    #[serde(rename = "voice:move")]
    VoiceMove { channel_id: ChannelId },
    #[serde(rename = "ack")]
    Ack { seq: u64, data: AckData },
    #[serde(rename = "nack")]
    Nack { seq: u64, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_names_use_colon_form() {
        let event = ClientEvent::VoiceJoin {
            channel_id: ChannelId::from("c1"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"voice:join""#));
    }

    #[test]
    fn envelope_flattens_seq_next_to_type() {
        let env = ClientEnvelope {
            seq: Some(7),
            event: ClientEvent::VoiceGetRouterRtpCapabilities,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "voice:getRouterRtpCapabilities");
    }

    #[test]
    fn envelope_without_seq_deserializes() {
        let env: ClientEnvelope =
            serde_json::from_str(r#"{"type":"typing:start","channelId":"c1"}"#).unwrap();
        assert!(env.seq.is_none());
        match env.event {
            ClientEvent::TypingStart { channel_id } => assert_eq!(channel_id.as_str(), "c1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn message_send_defaults_optional_fields() {
        let env: ClientEnvelope = serde_json::from_str(
            r#"{"seq":1,"type":"message:send","channelId":"c1","content":"hi"}"#,
        )
        .unwrap();
        match env.event {
            ClientEvent::MessageSend {
                content,
                attachments,
                reply_to_id,
                ..
            } => {
                assert_eq!(content.as_deref(), Some("hi"));
                assert!(attachments.is_none());
                assert!(reply_to_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_event_type_fails_deserialization() {
        let result = serde_json::from_str::<ClientEnvelope>(r#"{"type":"voice:warp"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn server_event_producer_closed_roundtrip() {
        let event = ServerEvent::VoiceProducerClosed {
            producer_id: ProducerId::from("pr1"),
            peer_id: SessionId::from("s1"),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"voice:producerClosed""#));
        let back: ServerEvent = serde_json::from_str(&json).unwrap();
        match back {
            ServerEvent::VoiceProducerClosed { producer_id, .. } => {
                assert_eq!(producer_id.as_str(), "pr1")
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ack_with_produced_payload_serializes_seq_and_id() {
        let event = ServerEvent::Ack {
            seq: 3,
            data: AckData::Produced {
                producer_id: ProducerId::from("pr9"),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["data"]["producerId"], "pr9");
    }

    #[test]
    fn nack_carries_error_string() {
        let event = ServerEvent::Nack {
            seq: 4,
            error: "forbidden".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error"], "forbidden");
    }
}
