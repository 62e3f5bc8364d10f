use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::permissions::Permissions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
    Category,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Text => "text",
            ChannelKind::Voice => "voice",
            ChannelKind::Category => "category",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ChannelKind::Text),
            "voice" => Some(ChannelKind::Voice),
            "category" => Some(ChannelKind::Category),
            _ => None,
        }
    }
}

/// Allow/deny delta for one role or member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideEntry {
    pub allow: Permissions,
    pub deny: Permissions,
}

impl OverrideEntry {
    /// Allow and deny are mutually exclusive per bit; a bit present in both
    /// inputs lands in `allow`.
    pub fn normalized(allow: Permissions, deny: Permissions) -> Self {
        Self {
            allow,
            deny: deny - allow,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionOverridesView {
    #[serde(default)]
    pub roles: BTreeMap<RoleId, OverrideEntry>,
    #[serde(default)]
    pub members: BTreeMap<UserId, OverrideEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<ChannelId>,
    pub position: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<UserId>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub permission_overrides: PermissionOverridesView,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub category_id: Option<ChannelId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// `Some("")` moves the channel to the top level.
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub permission_overrides: Option<PermissionOverridesView>,
}

/// One entry of the atomic reorder batch. An empty `category_id` string
/// means "top level".
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderEntry {
    pub id: ChannelId,
    pub position: i64,
    #[serde(default)]
    pub category_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_lowercase_under_type_key() {
        let view = ChannelView {
            id: ChannelId::generate(),
            guild_id: GuildId::generate(),
            name: "general".into(),
            kind: ChannelKind::Text,
            category_id: None,
            position: 0,
            created_by: None,
            created_at: chrono::Utc::now(),
            permission_overrides: PermissionOverridesView::default(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "text");
        assert!(json.get("categoryId").is_none());
    }

    #[test]
    fn normalized_override_prefers_allow() {
        let entry = OverrideEntry::normalized(
            Permissions::SEND_MESSAGES,
            Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNELS,
        );
        assert_eq!(entry.allow, Permissions::SEND_MESSAGES);
        assert_eq!(entry.deny, Permissions::VIEW_CHANNELS);
    }

    #[test]
    fn reorder_entry_top_level_sentinel() {
        let entry: ReorderEntry =
            serde_json::from_str(r#"{"id":"c1","position":3,"categoryId":""}"#).unwrap();
        assert_eq!(entry.category_id.as_deref(), Some(""));
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [ChannelKind::Text, ChannelKind::Voice, ChannelKind::Category] {
            assert_eq!(ChannelKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::parse("dm"), None);
    }
}
