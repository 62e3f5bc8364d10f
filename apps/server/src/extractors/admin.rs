use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use remus_shared::error::RemusError;

use crate::error::ServerError;
use crate::state::AppState;

const ADMIN_KEY_HEADER: &str = "x-remus-admin-key";

/// Operator access: requires a loopback peer address AND a matching
/// `X-Remus-Admin-Key`. With no configured key the surface does not exist
/// (404 for everything under it).
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_key.as_deref() else {
            return Err(ServerError(RemusError::NotFound));
        };

        let loopback = parts
            .extensions
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().is_loopback())
            .unwrap_or(false);
        if !loopback {
            tracing::warn!("admin request from non-loopback source rejected");
            return Err(ServerError(RemusError::Forbidden));
        }

        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented.is_empty() || presented != expected {
            tracing::warn!("admin request with bad key rejected");
            return Err(ServerError(RemusError::Forbidden));
        }

        Ok(AdminAuth)
    }
}
