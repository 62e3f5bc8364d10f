use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, UploadId, UserId};

/// An upload as it appears inside messages and the upload response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentView {
    pub id: UploadId,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub attachment: AttachmentView,
}

/// Full upload row, exposed on the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadView {
    pub id: UploadId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
