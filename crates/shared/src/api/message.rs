use serde::{Deserialize, Serialize};

use crate::api::upload::AttachmentView;
use crate::api::user::ProfileView;
use crate::ids::{ChannelId, MessageId, UploadId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub attachments: Vec<AttachmentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Box<ReplyPreview>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<ProfileView>,
}

/// Trimmed view of the message a reply points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub id: MessageId,
    pub author_id: UserId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub content: Option<String>,
    /// Upload ids previously returned by the upload endpoint.
    #[serde(default)]
    pub attachments: Option<Vec<UploadId>>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistoryQuery {
    #[serde(default)]
    pub before: Option<MessageId>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_allows_attachments_without_content() {
        let req: CreateMessageRequest =
            serde_json::from_str(r#"{"attachments":["up1","up2"]}"#).unwrap();
        assert!(req.content.is_none());
        assert_eq!(req.attachments.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn view_omits_reply_fields_when_absent() {
        let view = MessageView {
            id: MessageId::generate(),
            channel_id: ChannelId::generate(),
            author_id: UserId::from("u1"),
            content: "hey".into(),
            attachments: vec![],
            reply_to_id: None,
            reply_to: None,
            created_at: chrono::Utc::now(),
            author: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("replyToId"));
        assert!(!json.contains("replyTo\""));
    }
}
