use std::collections::HashMap;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use remus_shared::error::RemusError;
use remus_shared::ids::{ChannelId, GuildId, UserId};
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::perms;
use crate::state::AppState;

/// Authenticated user with channel-scoped permissions (overrides applied).
/// Resolves the guild from the channel in the path.
#[derive(Debug, Clone)]
pub struct ChannelMember {
    pub user_id: UserId,
    pub username: String,
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    pub permissions: Permissions,
}

impl ChannelMember {
    /// 403 unless the resolved permissions contain the required set.
    pub fn require(&self, required: Permissions) -> Result<(), ServerError> {
        if self.permissions.contains(required) {
            Ok(())
        } else {
            Err(ServerError(RemusError::Forbidden))
        }
    }
}

impl FromRequestParts<AppState> for ChannelMember {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;

        let Path(params): Path<HashMap<String, String>> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| ServerError(RemusError::NotFound))?;
        let channel_id = ChannelId::from(
            params
                .get("channel_id")
                .ok_or(ServerError(RemusError::NotFound))?
                .as_str(),
        );

        let channel = state
            .store
            .get_channel(&channel_id)
            .await?
            .ok_or(ServerError(RemusError::NotFound))?;
        let guild_id = channel.guild_id.clone();
        let permissions =
            perms::permissions(&state.store, &guild_id, &auth.user_id, Some(&channel_id)).await?;

        let extracted = ChannelMember {
            user_id: auth.user_id,
            username: auth.username,
            channel_id,
            guild_id,
            permissions,
        };
        parts.extensions.insert(extracted.clone());
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_distinguishes_present_and_missing_bits() {
        let member = ChannelMember {
            user_id: UserId::from("u1"),
            username: "u1".into(),
            channel_id: ChannelId::from("c1"),
            guild_id: GuildId::from("g1"),
            permissions: Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES,
        };
        assert!(member.require(Permissions::ATTACH_FILES).is_ok());
        assert!(member.require(Permissions::MANAGE_MESSAGES).is_err());
    }
}
