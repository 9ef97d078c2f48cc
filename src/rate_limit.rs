use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::debug;

pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
pub const DEFAULT_MAX_PER_WINDOW: usize = 20;

type Buckets = HashMap<String, Vec<DateTime<Utc>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Per-key sliding window limiter. State lives in this process only.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    window: Duration,
    max_per_window: usize,
}

impl RateLimiter {
    pub fn new(window: std::time::Duration, max_per_window: usize) -> Self {
        let window = Duration::from_std(window)
            .unwrap_or_else(|_| Duration::seconds(DEFAULT_WINDOW_SECONDS as i64));

        Self {
            buckets: Mutex::new(HashMap::new()),
            window,
            max_per_window,
        }
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Utc::now()).await
    }

    /// Records an attempt for `key` at `now` unless the key already used up
    /// its window. Rejected attempts are not recorded.
    pub async fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let window_start = now - self.window;

        let mut buckets = self.buckets.lock().await;
        let entries = buckets.entry(key.to_string()).or_default();
        entries.retain(|timestamp| *timestamp > window_start);

        if entries.len() >= self.max_per_window {
            let reset_at = entries
                .iter()
                .min()
                .map(|oldest| *oldest + self.window)
                .unwrap_or(now + self.window);
            let retry_after_ms = (reset_at - now).num_milliseconds().max(0);
            let retry_after_seconds = ((retry_after_ms + 999) / 1000).max(1) as u64;

            debug!("Rate limit hit for key={key} retry_after={retry_after_seconds}s");
            return RateLimitDecision::Limited {
                retry_after_seconds,
            };
        }

        entries.push(now);
        RateLimitDecision::Allowed
    }

    /// Drops buckets whose timestamps have all left the window. Returns the
    /// number of buckets removed.
    pub async fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let window_start = now - self.window;
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();

        buckets.retain(|_, timestamps| {
            timestamps.retain(|timestamp| *timestamp > window_start);
            !timestamps.is_empty()
        });

        before - buckets.len()
    }
}

/// Periodically calls [`RateLimiter::prune_idle`] until the task is aborted.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = limiter.prune_idle(Utc::now()).await;
            if removed > 0 {
                debug!("Pruned {removed} idle rate limit bucket(s)");
            }
        }
    })
}
