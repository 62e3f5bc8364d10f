use serde::{Deserialize, Serialize};

use crate::api::channel::ChannelView;
use crate::api::member::MemberView;
use crate::api::role::RoleView;
use crate::ids::GuildId;
use crate::permissions::Permissions;

/// The fully-hydrated guild payload returned by `GET /api/guilds`.
/// `permissions` is the requesting member's effective guild-level mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildView {
    pub id: GuildId,
    pub name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub members: Vec<MemberView>,
    pub roles: Vec<RoleView>,
    pub permissions: Permissions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub channels: Vec<ChannelView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_view_serializes_permissions_as_number() {
        let view = GuildView {
            id: GuildId::generate(),
            name: "remus".into(),
            created_at: chrono::Utc::now(),
            members: vec![],
            roles: vec![],
            permissions: Permissions::SEND_MESSAGES,
            icon_url: None,
            channels: vec![],
        };
        let json = serde_json::to_value(&view).unwrap();
        assert!(json["permissions"].is_number());
    }
}
