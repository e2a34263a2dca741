//! Per-client request throttling.
//!
//! The HTTP layer only sees the [`RateLimiter`] trait, so a shared store can
//! replace the in-process map without touching the handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Expired windows are swept when a new key arrives and the map holds at least this many.
const PURGE_THRESHOLD: usize = 10_000;

/// The answer to one rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub window: Duration,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one.
    pub(crate) fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

#[async_trait]
pub(crate) trait RateLimiter: Send + Sync {
    /// Records one request for `key` and reports whether it may proceed.
    async fn check(&self, key: &str) -> RateLimitDecision;

    /// Drops expired state. Returns how many entries were removed.
    async fn purge(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: DateTime<Utc>,
}

/// Live windows plus the map size at which inserting a new key triggers a sweep.
#[derive(Debug)]
struct WindowTable {
    entries: HashMap<String, Window>,
    sweep_at: usize,
}

impl WindowTable {
    fn sweep(&mut self, now: DateTime<Utc>, threshold: usize) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, w| w.reset_at > now);
        // Live keys keep the map large; doubling keeps sweeps amortised O(1) per insert.
        self.sweep_at = threshold.max(self.entries.len() * 2);
        before - self.entries.len()
    }
}

/// Fixed-window counter held in process memory. Not shared across instances.
#[derive(Debug)]
pub(crate) struct InMemoryRateLimiter {
    limit: u32,
    window: Duration,
    sweep_threshold: usize,
    windows: Mutex<WindowTable>,
}

impl InMemoryRateLimiter {
    pub(crate) fn new(limit: u32, window: Duration) -> Self {
        Self::with_sweep_threshold(limit, window, PURGE_THRESHOLD)
    }

    fn with_sweep_threshold(limit: u32, window: Duration, sweep_threshold: usize) -> Self {
        Self {
            limit,
            window,
            sweep_threshold,
            windows: Mutex::new(WindowTable {
                entries: HashMap::new(),
                sweep_at: sweep_threshold,
            }),
        }
    }

    fn window_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::zero())
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.windows.lock().await.entries.len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> RateLimitDecision {
        let now = Utc::now();
        let mut table = self.windows.lock().await;

        if table.entries.len() >= table.sweep_at && !table.entries.contains_key(key) {
            let removed = table.sweep(now, self.sweep_threshold);
            tracing::debug!(target: "rate_limit_task",
                "Swept {} expired windows, {} remain", removed, table.entries.len()
            );
        }

        let window_delta = self.window_delta();
        let entry = table.entries.entry(key.to_string()).or_insert(Window {
            count: 0,
            reset_at: now + window_delta,
        });
        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + window_delta;
        }

        let allowed = entry.count < self.limit;
        if allowed {
            entry.count += 1;
        } else {
            tracing::warn!(target: "rate_limit_task",
                "Rate limit exceeded for {} ({} requests in window)",
                key, entry.count
            );
        }

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(entry.count),
            window: self.window,
            reset_at: entry.reset_at,
        }
    }

    async fn purge(&self) -> usize {
        let now = Utc::now();
        self.windows
            .lock()
            .await
            .sweep(now, self.sweep_threshold)
    }
}
