use std::sync::Arc;

use crate::authority::AuthorityClient;
use crate::config::ServerConfig;
use crate::rate_limit::RateBuckets;
use crate::store::Store;
use crate::voice::VoiceCoordinator;
use crate::ws::WsState;

/// Shared application state passed to all handlers via Axum's State
/// extractor. Everything inside is Arc-backed, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<ServerConfig>,
    pub authority: Arc<AuthorityClient>,
    pub ws: Arc<WsState>,
    pub voice: Arc<VoiceCoordinator>,
    pub rate: Arc<RateBuckets>,
}
