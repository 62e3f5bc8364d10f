use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// Public view of a profile, embedded in member lists and message views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let view = ProfileView {
            id: UserId::from("u1"),
            username: "dax".into(),
            email: None,
            created_at: chrono::Utc::now(),
            last_seen_at: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(json.contains("createdAt"));
        assert!(!json.contains("email"));
    }
}
