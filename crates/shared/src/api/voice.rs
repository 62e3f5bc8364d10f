use serde::{Deserialize, Serialize};

use crate::api::user::ProfileView;
use crate::ids::{ProducerId, SessionId, UserId};

/// Media kinds the coordinator negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Presence of one voice channel. `user_ids` are peer *session* ids, so a
/// user connected twice appears twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePresenceView {
    pub user_ids: Vec<SessionId>,
    pub users: Vec<ProfileView>,
    pub speaking_user_ids: Vec<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub username: String,
    pub voice_muted: bool,
    pub voice_deafened: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerView {
    pub producer_id: ProducerId,
    pub peer_id: SessionId,
    pub user_id: UserId,
    pub kind: MediaKind,
    pub app_data: serde_json::Value,
}

/// Parameters the client needs to construct its side of a WebRTC transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: crate::ids::TransportId,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: crate::ids::ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
    pub app_data: serde_json::Value,
    pub peer_id: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&MediaKind::Audio).unwrap(), r#""audio""#);
        assert_eq!(serde_json::to_string(&MediaKind::Video).unwrap(), r#""video""#);
    }

    #[test]
    fn presence_defaults_empty() {
        let p = VoicePresenceView::default();
        assert!(p.user_ids.is_empty());
        assert!(p.speaking_user_ids.is_empty());
    }

    #[test]
    fn transport_params_roundtrip() {
        let params = TransportParams {
            id: crate::ids::TransportId::generate(),
            ice_parameters: serde_json::json!({ "usernameFragment": "uf" }),
            ice_candidates: serde_json::json!([]),
            dtls_parameters: serde_json::json!({ "role": "auto" }),
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: TransportParams = serde_json::from_str(&json).unwrap();
        assert_eq!(params, back);
    }
}
