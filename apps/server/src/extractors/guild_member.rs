use std::collections::HashMap;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use remus_shared::error::RemusError;
use remus_shared::ids::{GuildId, UserId};
use remus_shared::permissions::Permissions;

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::perms;
use crate::state::AppState;
use crate::store::MemberRecord;

/// Authenticated member of the node guild, with guild-level permissions
/// resolved. The path's `guild_id` must name the node guild.
#[derive(Debug, Clone)]
pub struct GuildMember {
    pub user_id: UserId,
    pub username: String,
    pub guild_id: GuildId,
    pub member: MemberRecord,
    pub permissions: Permissions,
}

impl GuildMember {
    /// 403 unless the resolved permissions contain the required set.
    pub fn require(&self, required: Permissions) -> Result<(), ServerError> {
        if self.permissions.contains(required) {
            Ok(())
        } else {
            Err(ServerError(RemusError::Forbidden))
        }
    }
}

impl FromRequestParts<AppState> for GuildMember {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;

        // Routes without a guild segment (e.g. /api/roles/:role_id) resolve
        // against the node guild; there is exactly one.
        let Path(params): Path<HashMap<String, String>> = Path::from_request_parts(parts, state)
            .await
            .map_err(|_| ServerError(RemusError::NotFound))?;
        let guild_id = match params.get("guild_id") {
            Some(raw) => {
                let guild_id = GuildId::from(raw.as_str());
                state.store.require_node_guild(&guild_id).await?;
                guild_id
            }
            None => state.store.node_guild_id().await?,
        };

        let member = state
            .store
            .get_member(&guild_id, &auth.user_id)
            .await?
            .ok_or(ServerError(RemusError::Forbidden))?;
        let permissions =
            perms::permissions(&state.store, &guild_id, &auth.user_id, None).await?;

        let extracted = GuildMember {
            user_id: auth.user_id,
            username: auth.username,
            guild_id,
            member,
            permissions,
        };
        parts.extensions.insert(extracted.clone());
        Ok(extracted)
    }
}
