use serde::{Deserialize, Serialize};

use crate::api::user::ProfileView;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub guild_id: GuildId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub role_ids: Vec<RoleId>,
    pub joined_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_until: Option<chrono::DateTime<chrono::Utc>>,
    pub voice_muted: bool,
    pub voice_deafened: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<ProfileView>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNicknameRequest {
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRolesRequest {
    pub role_ids: Vec<RoleId>,
}

/// `minutes: null` or `0` clears an active timeout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutRequest {
    #[serde(default)]
    pub minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateRequest {
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub deafened: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveMemberRequest {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanView {
    pub user_id: UserId,
    pub banned_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_request_accepts_null_minutes() {
        let req: TimeoutRequest = serde_json::from_str(r#"{"minutes":null}"#).unwrap();
        assert!(req.minutes.is_none());
        let req: TimeoutRequest = serde_json::from_str(r#"{"minutes":15}"#).unwrap();
        assert_eq!(req.minutes, Some(15));
    }

    #[test]
    fn member_view_omits_absent_timeout() {
        let view = MemberView {
            guild_id: GuildId::generate(),
            user_id: UserId::from("u1"),
            nickname: None,
            role_ids: vec![],
            joined_at: chrono::Utc::now(),
            timeout_until: None,
            voice_muted: false,
            voice_deafened: false,
            user: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("timeoutUntil"));
        assert!(json.contains("voiceMuted"));
    }
}
