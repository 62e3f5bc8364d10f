use std::sync::Arc;
use std::time::Duration;

use remus_shared::api::server::HeartbeatPayload;

use crate::authority::AuthorityClient;
use crate::config::ServerConfig;
use crate::handlers::server::server_id;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub fn payload(config: &ServerConfig, guild_id: &str) -> HeartbeatPayload {
    HeartbeatPayload {
        name: config.server_name.clone(),
        public_url: config.public_url.clone(),
        server_id: server_id(guild_id),
        region: config.region.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}

/// Announce the node to the authority's host registry: once at startup,
/// then every 30 seconds. Failures are silent; the node keeps running.
pub fn spawn(
    authority: Arc<AuthorityClient>,
    config: Arc<ServerConfig>,
    guild_id: String,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let payload = payload(&config, &guild_id);
        authority.heartbeat(&payload).await;

        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        interval.tick().await; // skip immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => authority.heartbeat(&payload).await,
                _ = shutdown.changed() => {
                    tracing::debug!("heartbeat task shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_derives_server_id_from_guild() {
        let config = ServerConfig::default();
        let payload = payload(&config, "0198a2b3-rest-of-the-id");
        assert_eq!(payload.server_id, "0198a2b3");
        assert_eq!(payload.name, config.server_name);
        assert!(!payload.version.is_empty());
    }

    #[test]
    fn interval_matches_the_registry_contract() {
        assert_eq!(HEARTBEAT_INTERVAL, Duration::from_secs(30));
    }
}
