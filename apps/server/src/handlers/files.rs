use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::Multipart;
use remus_shared::api::upload::UploadResponse;
use remus_shared::constants::{BLOCKED_UPLOAD_EXTENSIONS, MAX_UPLOAD_NAME_LENGTH};
use remus_shared::error::RemusError;
use remus_shared::ids::ChannelId;
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::perms;
use crate::rate_limit::{UPLOADS_PER_MINUTE, WINDOW};
use crate::state::AppState;
use crate::store::{AttachmentRecord, UploadRecord};

/// Strip path separators and control characters, then cap the length.
/// Falls back to "file" when nothing survives.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | '"' | ':' | '*' | '?' | '<' | '>' | '|'))
        .collect();
    let trimmed = cleaned.trim();
    let base = if trimmed.is_empty() { "file" } else { trimmed };
    base.chars().take(MAX_UPLOAD_NAME_LENGTH).collect()
}

/// The extension blocklist for executables and scripts.
pub fn has_blocked_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    BLOCKED_UPLOAD_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext))
}

struct ParsedUpload {
    bytes: Vec<u8>,
    file_name: String,
    mime_type: String,
    channel_id: ChannelId,
}

async fn parse_multipart(
    multipart: &mut Multipart,
    max_bytes: u64,
) -> Result<ParsedUpload, ServerError> {
    let mut bytes: Option<Vec<u8>> = None;
    let mut file_name = String::from("file");
    let mut mime_type = String::from("application/octet-stream");
    let mut channel_id: Option<ChannelId> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name().unwrap_or("") {
            "file" => {
                if let Some(name) = field.file_name() {
                    file_name = sanitize_file_name(name);
                }
                if let Some(mime) = field.content_type() {
                    mime_type = mime.to_string();
                }
                let data = field.bytes().await.map_err(|_| {
                    // The multipart reader aborts mid-stream when the body
                    // limit trips; surface that as the size error.
                    ServerError(RemusError::UploadTooLarge(format!(
                        "file exceeds the {max_bytes} byte limit"
                    )))
                })?;
                if data.len() as u64 > max_bytes {
                    return Err(ServerError(RemusError::UploadTooLarge(format!(
                        "file exceeds the {max_bytes} byte limit"
                    ))));
                }
                bytes = Some(data.to_vec());
            }
            "channelId" => {
                let value = field.text().await.map_err(|_| {
                    ServerError(RemusError::Validation("failed to read channelId".into()))
                })?;
                channel_id = Some(ChannelId::from(value.trim()));
            }
            _ => {}
        }
    }

    Ok(ParsedUpload {
        bytes: bytes
            .ok_or(ServerError(RemusError::Validation("missing file field".into())))?,
        file_name,
        mime_type,
        channel_id: channel_id
            .ok_or(ServerError(RemusError::Validation("missing channelId field".into())))?,
    })
}

/// POST /api/files/upload — multipart `{file, channelId}`. Blocked
/// extensions are rejected after the write, deleting the stored file
/// before responding.
pub async fn upload(
    State(state): State<AppState>,
    auth: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ServerError> {
    if !state
        .rate
        .check("upload", &auth.user_id, UPLOADS_PER_MINUTE, WINDOW)
    {
        return Err(ServerError(RemusError::RateLimited));
    }

    let parsed = parse_multipart(&mut multipart, state.config.file_limit_bytes()).await?;

    let channel = state
        .store
        .get_channel(&parsed.channel_id)
        .await?
        .ok_or(ServerError(RemusError::NotFound))?;
    let effective = perms::permissions(
        &state.store,
        &channel.guild_id,
        &auth.user_id,
        Some(&parsed.channel_id),
    )
    .await?;
    if !effective.contains(Permissions::VIEW_CHANNELS | Permissions::ATTACH_FILES) {
        return Err(ServerError(RemusError::Forbidden));
    }

    let uploads_dir = state.config.uploads_path();
    tokio::fs::create_dir_all(&uploads_dir)
        .await
        .map_err(|e| ServerError(RemusError::Internal(format!("create uploads dir: {e}"))))?;

    let disk_name = format!(
        "{}-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4(),
        parsed.file_name
    );
    let disk_path = uploads_dir.join(&disk_name);
    tokio::fs::write(&disk_path, &parsed.bytes)
        .await
        .map_err(|e| ServerError(RemusError::Internal(format!("write upload: {e}"))))?;

    if has_blocked_extension(&parsed.file_name) {
        let _ = tokio::fs::remove_file(&disk_path).await;
        return Err(ServerError(RemusError::Validation(
            "file type is not allowed".into(),
        )));
    }

    let upload = state
        .store
        .create_upload(
            &parsed.channel_id,
            &auth.user_id,
            &parsed.file_name,
            parsed.bytes.len() as i64,
            &parsed.mime_type,
            &format!("/uploads/{disk_name}"),
        )
        .await
        .map_err(|e| {
            // Orphaned file cleanup when the row fails to land.
            let path = disk_path.clone();
            tokio::spawn(async move {
                let _ = tokio::fs::remove_file(&path).await;
            });
            ServerError(e)
        })?;

    state
        .store
        .add_audit(
            &channel.guild_id,
            "upload.create",
            Some(&auth.user_id),
            Some(upload.id.as_str()),
            serde_json::json!({ "name": upload.name, "size": upload.size }),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            attachment: upload.attachment_view(),
        }),
    ))
}

/// Best-effort removal of upload files referenced by store rows; missing
/// files are ignored.
pub async fn remove_upload_files(state: &AppState, uploads: &[UploadRecord]) {
    for upload in uploads {
        remove_by_url(state, &upload.url).await;
    }
}

pub async fn remove_attachment_files(state: &AppState, attachments: &[AttachmentRecord]) {
    for attachment in attachments {
        remove_by_url(state, &attachment.url).await;
    }
}

async fn remove_by_url(state: &AppState, url: &str) {
    let Some(name) = url.strip_prefix("/uploads/") else {
        return;
    };
    // Stored urls must be bare file names under /uploads.
    if name.contains('/') || name.contains("..") {
        tracing::warn!(url, "refusing to delete suspicious upload path");
        return;
    }
    let path = state.config.uploads_path().join(name);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, path = %path.display(), "upload file removal failed");
        }
    }
}

pub fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/upload", axum::routing::post(upload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_separators_and_control_chars() {
        assert_eq!(sanitize_file_name("hello.txt"), "hello.txt");
        assert_eq!(sanitize_file_name("../etc/passwd"), "..etcpasswd");
        assert_eq!(sanitize_file_name("a\0b.png"), "ab.png");
        assert_eq!(sanitize_file_name("  "), "file");
        assert_eq!(sanitize_file_name("weird:*?.png"), "weird.png");
    }

    #[test]
    fn sanitize_truncates_to_120_chars() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_file_name(&long).chars().count(), 120);
    }

    #[test]
    fn blocklist_matches_case_insensitively() {
        assert!(has_blocked_extension("evil.bat"));
        assert!(has_blocked_extension("EVIL.BAT"));
        assert!(has_blocked_extension("setup.MSI"));
        assert!(has_blocked_extension("lib.so"));
        assert!(!has_blocked_extension("notes.txt"));
        assert!(!has_blocked_extension("archive.tar.gz"));
        // Permissive by design: markup is allowed.
        assert!(!has_blocked_extension("page.html"));
        assert!(!has_blocked_extension("image.svg"));
    }

    #[test]
    fn routes_build_without_panic() {
        let _ = routes();
    }
}
