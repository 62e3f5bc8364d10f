use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use remus_shared::api::server::{HealthResponse, ServerInfoResponse};
use remus_shared::error::RemusError;

use crate::error::ServerError;
use crate::state::AppState;

/// GET /api/health — public liveness.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}

/// GET /api/server/info — public node identity.
pub async fn info(State(state): State<AppState>) -> Result<Json<ServerInfoResponse>, ServerError> {
    let guild_id = state.store.node_guild_id().await?;
    Ok(Json(ServerInfoResponse {
        name: state.config.server_name.clone(),
        public_url: state.config.public_url.clone(),
        server_id: server_id(guild_id.as_str()),
        region: state.config.region.clone(),
        main_backend_url: state.config.main_backend_url.clone(),
        icon_url: state
            .config
            .server_icon
            .as_ref()
            .map(|_| "/api/server/icon".to_string()),
        ice_servers: state.config.ice_servers_json(),
    }))
}

/// GET /api/server/icon — raw icon bytes with inferred MIME.
pub async fn icon(State(state): State<AppState>) -> Result<Response, ServerError> {
    let path = state
        .config
        .server_icon
        .as_ref()
        .ok_or(ServerError(RemusError::NotFound))?;
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| ServerError(RemusError::NotFound))?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_for(path))
        .body(Body::from(bytes))
        .map_err(|_| ServerError(RemusError::Internal("response build error".into())))?;
    Ok(response)
}

/// First 8 characters of the node guild id.
pub fn server_id(guild_id: &str) -> String {
    guild_id.chars().take(8).collect()
}

fn mime_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_is_the_first_eight_chars() {
        assert_eq!(server_id("0198a2b3-dead-beef"), "0198a2b3");
        assert_eq!(server_id("abc"), "abc");
    }

    #[test]
    fn mime_inference_covers_common_icon_types() {
        assert_eq!(mime_for("/x/icon.png"), "image/png");
        assert_eq!(mime_for("/x/icon.JPG"), "image/jpeg");
        assert_eq!(mime_for("/x/icon.webp"), "image/webp");
        assert_eq!(mime_for("/x/icon"), "application/octet-stream");
    }
}
