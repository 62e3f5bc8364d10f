use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use remus_shared::api::server::HeartbeatPayload;
use remus_shared::error::RemusError;
use remus_shared::ids::UserId;
use serde::Deserialize;

use crate::config::ServerConfig;

const TOKEN_CACHE_TTL: Duration = Duration::from_secs(5);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const LOOPBACK_VERIFY_TIMEOUT: Duration = Duration::from_millis(1500);
const REMOTE_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// The user object the authority returns from its verify endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    user: AuthorityUser,
}

struct CacheEntry {
    user: AuthorityUser,
    expires_at: std::time::Instant,
}

/// Identity resolver: proxies bearer tokens to the external authority and
/// caches positive answers for a few seconds. Also owns the host-registry
/// heartbeat.
pub struct AuthorityClient {
    http: reqwest::Client,
    base_url: String,
    cache: DashMap<String, CacheEntry>,
}

impl AuthorityClient {
    pub fn new(config: &ServerConfig) -> Result<Arc<Self>, RemusError> {
        let timeout = if config.backend_is_loopback() {
            LOOPBACK_VERIFY_TIMEOUT
        } else {
            REMOTE_VERIFY_TIMEOUT
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemusError::Internal(format!("build http client: {e}")))?;
        Ok(Arc::new(Self {
            http,
            base_url: config.main_backend_url.trim_end_matches('/').to_string(),
            cache: DashMap::new(),
        }))
    }

    /// Verify a bearer token. `Ok(None)` is any verification failure the
    /// authority reported; `AuthorityUnavailable` is a transport failure.
    pub async fn resolve(&self, token: &str) -> Result<Option<AuthorityUser>, RemusError> {
        if token.is_empty() {
            return Ok(None);
        }

        if let Some(entry) = self.cache.get(token) {
            if entry.expires_at > std::time::Instant::now() {
                return Ok(Some(entry.user.clone()));
            }
        }

        let url = format!("{}/api/auth/verify", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "authority verify call failed");
                RemusError::AuthorityUnavailable
            })?;

        if !response.status().is_success() {
            return Ok(None);
        }
        let body: VerifyResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, "authority verify body was malformed");
                return Ok(None);
            }
        };

        self.cache.insert(
            token.to_string(),
            CacheEntry {
                user: body.user.clone(),
                expires_at: std::time::Instant::now() + TOKEN_CACHE_TTL,
            },
        );
        Ok(Some(body.user))
    }

    /// Drop a token from the cache (used when a cached user gets banned so
    /// the next request re-verifies).
    pub fn evict(&self, token: &str) {
        self.cache.remove(token);
    }

    fn sweep(&self) {
        let now = std::time::Instant::now();
        self.cache.retain(|_, entry| entry.expires_at > now);
    }

    /// Background sweep of expired cache entries.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
            interval.tick().await; // skip immediate first tick
            loop {
                tokio::select! {
                    _ = interval.tick() => client.sweep(),
                    _ = shutdown.changed() => {
                        tracing::debug!("token cache sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// POST the node's identity to the authority's host registry. Failures
    /// are logged and swallowed; the node keeps running either way.
    pub async fn heartbeat(&self, payload: &HeartbeatPayload) {
        let url = format!("{}/api/hosts/heartbeat", self.base_url);
        match self.http.post(&url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::debug!(status = %response.status(), "heartbeat rejected");
            }
            Err(e) => {
                tracing::debug!(error = %e, "heartbeat failed");
            }
        }
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
