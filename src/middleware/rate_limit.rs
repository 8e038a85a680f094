use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Per-key sliding-window hit counter.
///
/// Each key owns an ordered queue of hit instants. A check prunes entries older
/// than the window, appends the current hit, and admits it while the queue holds
/// at most `max_hits`. Denied hits are still recorded, so a sustained burst keeps
/// the key over the limit until it quiets down for a full window.
///
/// The prune-append-count step runs under the DashMap shard lock for that key,
/// so concurrent hits on the same key never lose an update. State is process
/// local and resets on restart.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    max_hits: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_hits: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_hits,
            window,
        }
    }

    /// Record a hit for `key` and report whether it is within the limit.
    pub fn check(&self, key: &str) -> bool {
        let mut hits = self.windows.entry(key.to_string()).or_default();
        // read the clock under the key lock so each queue stays ordered
        let now = Instant::now();
        self.admit(key, &mut hits, now)
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    /// Callers must pass non-decreasing instants per key.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.windows.entry(key.to_string()).or_default();
        self.admit(key, &mut hits, now)
    }

    fn admit(&self, key: &str, hits: &mut VecDeque<Instant>, now: Instant) -> bool {
        if let Some(window_start) = now.checked_sub(self.window) {
            while hits.front().is_some_and(|&t| t < window_start) {
                hits.pop_front();
            }
        }
        hits.push_back(now);

        let allowed = hits.len() <= self.max_hits;
        if !allowed {
            tracing::debug!(
                key,
                hits = hits.len(),
                limit = self.max_hits,
                "rate window exceeded"
            );
        }
        allowed
    }

    /// Number of keys that have ever been seen.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
