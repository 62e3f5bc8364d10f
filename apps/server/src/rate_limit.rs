use std::time::{Duration, Instant};

use dashmap::DashMap;
use remus_shared::ids::UserId;

/// Fixed-window counters keyed by `(action, user)`. Process-local by
/// design: a single node serves one community, so there is nothing to
/// coordinate across.
pub struct RateBuckets {
    buckets: DashMap<(String, UserId), Window>,
}

struct Window {
    started: Instant,
    count: u32,
}

/// HTTP file uploads: 30 requests per 60 seconds per user.
pub const UPLOADS_PER_MINUTE: u32 = 30;
/// Socket voice joins: 10 per 60 seconds per user.
pub const VOICE_JOINS_PER_MINUTE: u32 = 10;
pub const WINDOW: Duration = Duration::from_secs(60);

impl RateBuckets {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Record one hit; `false` means the window is exhausted.
    pub fn check(&self, action: &str, user_id: &UserId, max: u32, window: Duration) -> bool {
        self.check_at(action, user_id, max, window, Instant::now())
    }

    fn check_at(
        &self,
        action: &str,
        user_id: &UserId,
        max: u32,
        window: Duration,
        now: Instant,
    ) -> bool {
        let key = (action.to_string(), user_id.clone());
        let mut entry = self.buckets.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= max
    }

    /// Drop windows that lapsed; called from the idle sweeper.
    pub fn sweep(&self, window: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, entry| now.duration_since(entry.started) < window);
    }
}

impl Default for RateBuckets {
    fn default() -> Self {
        Self::new()
    }
}
