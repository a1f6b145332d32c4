//! Fixed-window request limiter.
//!
//! Each key (client IP for the public assistant, user id for the admin
//! assistant) gets a counter and the instant its window opened. Once the
//! window is older than the configured length the next request starts a fresh
//! window, so a burst straddling a boundary can admit up to twice the cap.
//!
//! The table lives in process memory. Limits are only enforced per instance;
//! a multi-instance deployment needs a shared counter store instead.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use axum::http::{HeaderMap, HeaderName, HeaderValue, header::RETRY_AFTER};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

/// Outcome of a single [`FixedWindowLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

impl RateLimitDecision {
    /// `X-RateLimit-*` response headers, plus `Retry-After` when denied.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let reset_secs = self.reset_in.as_secs_f64().ceil() as u64;
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(self.limit),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(self.remaining),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-reset"),
            HeaderValue::from(reset_secs),
        );
        if !self.allowed {
            headers.insert(RETRY_AFTER, HeaderValue::from(reset_secs.max(1)));
        }
        headers
    }
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl FixedWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut entries = self.lock();

        let entry = entries.entry(key.to_string()).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        let elapsed = now.saturating_duration_since(entry.window_start);
        if entry.count == 0 || elapsed > self.window {
            entry.count = 1;
            entry.window_start = now;
            return RateLimitDecision {
                allowed: true,
                limit: self.max_requests,
                remaining: self.max_requests.saturating_sub(1),
                reset_in: self.window,
            };
        }

        let reset_in = self.window.saturating_sub(elapsed);
        if entry.count >= self.max_requests {
            return RateLimitDecision {
                allowed: false,
                limit: self.max_requests,
                remaining: 0,
                reset_in,
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            limit: self.max_requests,
            remaining: self.max_requests - entry.count,
            reset_in,
        }
    }

    /// Drop every entry whose window has already expired. Returns how many
    /// entries were removed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.window_start) <= self.window);
        before - entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    /// Run [`Self::sweep_at`] on a fixed interval for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.sweep_at(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "swept stale rate limit entries");
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        // A poisoned table only means another request panicked mid-update;
        // the counters themselves are still usable.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
