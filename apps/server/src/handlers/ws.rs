use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use remus_shared::error::RemusError;
use serde::Deserialize;

use crate::error::ServerError;
use crate::state::AppState;
use crate::ws::connection::handle_connection;

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    #[serde(default)]
    pub token: String,
}

/// GET /ws?token=<bearer> — authenticate through the authority, then
/// upgrade. Banned users are let through the upgrade so the connection
/// handler can deliver `auth:banned` before closing.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user = state
        .authority
        .resolve(&params.token)
        .await?
        .ok_or(ServerError(RemusError::Unauthorized))?;

    state
        .store
        .upsert_profile(&user.id, &user.username, user.email.as_deref())
        .await?;

    let user_id = user.id;
    Ok(ws.on_upgrade(move |socket| handle_connection(socket, state, user_id)))
}

pub fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/", axum::routing::get(ws_upgrade))
}
