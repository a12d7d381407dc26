//! Per-identity request rate limiting
//!
//! [`RateLimiter`] is the only type the rest of the crate talks to. It always
//! consults its backend; a backend error is logged and the request allowed.
//! An unconfigured limiter is the [`NoopRateLimiter`] backend, not a branch.

use dashmap::mapref::one::Ref;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;

/// Outcome of consuming one request from an identity's budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix millis at which the identity regains capacity
    pub reset_at_ms: i64,
}

impl RateLimitDecision {
    pub fn unlimited(now_ms: i64) -> Self {
        Self {
            allowed: true,
            limit: u32::MAX,
            remaining: u32::MAX,
            reset_at_ms: now_ms,
        }
    }

    /// Whole seconds until capacity returns, rounded up, at least 1
    pub fn retry_after_secs(&self, now_ms: i64) -> u64 {
        let wait_ms = (self.reset_at_ms - now_ms).max(0) as u64;
        wait_ms.div_ceil(1000).max(1)
    }
}

/// Counting backend. Implementations must be atomic per identity.
pub trait RateLimitBackend: Send + Sync {
    fn consume(&self, identity: &str, now_ms: i64) -> anyhow::Result<RateLimitDecision>;

    fn name(&self) -> &'static str;
}

/// Shared-lock lookup of an identity's state, inserting on first use.
/// Identities in the same shard only contend on the insert.
fn state_for<'a, V>(
    map: &'a DashMap<String, Mutex<V>>,
    identity: &str,
    init: impl FnOnce() -> V,
) -> Ref<'a, String, Mutex<V>> {
    match map.get(identity) {
        Some(state) => state,
        None => map
            .entry(identity.to_string())
            .or_insert_with(|| Mutex::new(init()))
            .downgrade(),
    }
}

/// Sliding log: an identity may make `limit` requests in any `window`
pub struct SlidingWindowLimiter {
    limit: u32,
    window_ms: i64,
    logs: DashMap<String, Mutex<VecDeque<i64>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as i64,
            logs: DashMap::new(),
        }
    }
}

impl RateLimitBackend for SlidingWindowLimiter {
    fn consume(&self, identity: &str, now_ms: i64) -> anyhow::Result<RateLimitDecision> {
        let state = state_for(&self.logs, identity, VecDeque::new);
        let mut log = state.lock();

        let horizon = now_ms - self.window_ms;
        while log.front().is_some_and(|&t| t <= horizon) {
            log.pop_front();
        }

        let allowed = (log.len() as u32) < self.limit;
        if allowed {
            log.push_back(now_ms);
        }

        let reset_at_ms = log
            .front()
            .map_or(now_ms + self.window_ms, |&oldest| oldest + self.window_ms);

        Ok(RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(log.len() as u32),
            reset_at_ms,
        })
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }
}

struct FixedWindow {
    started_at_ms: i64,
    count: u32,
}

/// In-memory fixed window: one mutex-guarded counter per identity,
/// reset when the window elapses
pub struct FixedWindowLimiter {
    limit: u32,
    window_ms: i64,
    windows: DashMap<String, Mutex<FixedWindow>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as i64,
            windows: DashMap::new(),
        }
    }
}

impl RateLimitBackend for FixedWindowLimiter {
    fn consume(&self, identity: &str, now_ms: i64) -> anyhow::Result<RateLimitDecision> {
        let state = state_for(&self.windows, identity, || FixedWindow {
            started_at_ms: now_ms,
            count: 0,
        });
        let mut window = state.lock();

        if now_ms - window.started_at_ms >= self.window_ms {
            window.started_at_ms = now_ms;
            window.count = 0;
        }

        let allowed = window.count < self.limit;
        if allowed {
            window.count += 1;
        }

        Ok(RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(window.count),
            reset_at_ms: window.started_at_ms + self.window_ms,
        })
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}

/// Always allows
pub struct NoopRateLimiter;

impl RateLimitBackend for NoopRateLimiter {
    fn consume(&self, _identity: &str, now_ms: i64) -> anyhow::Result<RateLimitDecision> {
        Ok(RateLimitDecision::unlimited(now_ms))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Fail-open facade over a [`RateLimitBackend`]
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn RateLimitBackend>,
}

impl RateLimiter {
    pub fn new(backend: Arc<dyn RateLimitBackend>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        tracing::warn!("Rate limiting is not configured; all requests will be allowed");
        Self::new(Arc::new(NoopRateLimiter))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Consume one request for `identity` at `now_ms`
    pub fn check_at(&self, identity: &str, now_ms: i64) -> RateLimitDecision {
        match self.backend.consume(identity, now_ms) {
            Ok(decision) => {
                metrics::RATE_LIMIT_DECISIONS_TOTAL
                    .with_label_values(&[if decision.allowed { "allowed" } else { "limited" }])
                    .inc();
                decision
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Rate limit backend failed, allowing request"
                );
                metrics::RATE_LIMIT_DECISIONS_TOTAL
                    .with_label_values(&["fail_open"])
                    .inc();
                RateLimitDecision::unlimited(now_ms)
            }
        }
    }
}
