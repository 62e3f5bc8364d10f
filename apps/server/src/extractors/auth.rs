use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use remus_shared::error::RemusError;
use remus_shared::ids::UserId;

use crate::error::ServerError;
use crate::state::AppState;

/// Authenticated, not-banned user resolved through the external authority.
///
/// Extraction runs the first half of the request pipeline:
/// authenticate → notBanned → profile touch (`last_seen_at`).
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
    pub username: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("auth: missing or non-ASCII Authorization header");
                ServerError(RemusError::Unauthorized)
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            tracing::debug!("auth: Authorization header missing Bearer prefix");
            ServerError(RemusError::Unauthorized)
        })?;

        let user = state
            .authority
            .resolve(token)
            .await?
            .ok_or(ServerError(RemusError::Unauthorized))?;

        if state.store.is_banned(&user.id).await? {
            return Err(ServerError(RemusError::Forbidden));
        }

        state
            .store
            .upsert_profile(&user.id, &user.username, user.email.as_deref())
            .await?;

        let auth = AuthUser {
            user_id: user.id,
            username: user.username,
        };
        parts.extensions.insert(auth.clone());
        Ok(auth)
    }
}
