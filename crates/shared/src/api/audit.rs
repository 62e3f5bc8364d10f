use serde::{Deserialize, Serialize};

use crate::ids::{AuditId, GuildId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditView {
    pub id: AuditId,
    pub guild_id: GuildId,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub data: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_view_roundtrip() {
        let view = AuditView {
            id: AuditId::generate(),
            guild_id: GuildId::generate(),
            action: "channel.delete".into(),
            actor_id: Some(UserId::from("u1")),
            target_id: Some("c1".into()),
            data: serde_json::json!({ "name": "general" }),
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&view).unwrap();
        let back: AuditView = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action, "channel.delete");
    }
}
