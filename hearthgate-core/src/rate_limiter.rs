//! Per-client sliding-window rate limiting.
//!
//! Each client identity (first `X-Forwarded-For` hop or peer address) gets
//! its own window of admission instants, created lazily on first request.
//! A rejected call is not recorded, so a client that keeps hammering the
//! proxy does not extend its own penalty.
//!
//! Entries are never evicted. A client that stops calling keeps an empty
//! (or nearly empty) window for the life of the process.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The call may proceed.
    Admitted,
    /// The ceiling was reached. Retry after `retry_after`.
    Rejected {
        /// Full window length, reported as the retry hint.
        retry_after: Duration,
    },
}

impl Admission {
    /// Returns `true` for [`Admission::Admitted`].
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum admissions per client within one window.
    pub max_requests: u32,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Per-client sliding-window rate limiter.
///
/// The `DashMap` entry guard serializes the prune/count/append sequence for
/// a single key; different keys proceed independently.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Create a limiter with the given ceiling and window.
    pub fn new(config: RateLimiterConfig) -> Self {
        info!(
            max_requests = config.max_requests,
            window_secs = config.window.as_secs(),
            "Sliding-window rate limiter configured"
        );

        Self {
            windows: DashMap::new(),
            max_requests: config.max_requests as usize,
            window: config.window,
        }
    }

    /// Check and record a call from `client_id` at the current instant.
    pub fn admit(&self, client_id: &str) -> Admission {
        self.admit_at(client_id, Instant::now())
    }

    /// Check and record a call from `client_id` at `now`.
    pub fn admit_at(&self, client_id: &str, now: Instant) -> Admission {
        let mut entry = self.windows.entry(client_id.to_string()).or_default();
        let timestamps = entry.value_mut();

        while let Some(&oldest) = timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests {
            debug!(
                client = client_id,
                in_window = timestamps.len(),
                "Rate limit ceiling reached"
            );
            return Admission::Rejected {
                retry_after: self.window,
            };
        }

        timestamps.push_back(now);
        Admission::Admitted
    }

    /// Number of client identities with a window in the map.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Configured ceiling.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}
