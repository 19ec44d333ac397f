//! Per-identity sliding-window rate limiter.
//!
//! # Algorithm
//!
//! Each identity owns an ascending list of request timestamps. An admission
//! check first drops every timestamp older than `now - window`, then:
//!
//! - `count >= limit`: deny, the list is left untouched
//! - otherwise: append `now` and allow
//!
//! `reset_at` is reported as `now + window` rather than the instant the
//! oldest retained timestamp leaves the window. Under bursty traffic this
//! overstates how long a client has to wait.
//!
//! # Concurrency
//!
//! Windows are stored in a [`DashMap`]. Trim, decision, and append for one
//! identity run under that identity's shard lock, so concurrent requests from
//! the same client never lose an update. Unrelated identities only contend
//! when they hash to the same shard.
//!
//! # Memory
//!
//! Identities whose trimmed window is empty are dropped by [`SlidingWindowLimiter::sweep`],
//! which the server calls periodically. One-shot clients therefore do not
//! accumulate.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::clock::{add_duration, sub_duration};
use crate::metrics;

/// Default rolling window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Error type for limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Request quota cannot be zero.
    ZeroLimit,
    /// Window length cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroLimit => write!(
                f,
                "requests per window must be greater than 0; disable the layer instead"
            ),
            RateLimitError::ZeroWindow => write!(f, "rate limit window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Configured quota per window
    pub limit: u32,
    /// Requests left in the window after this decision
    pub remaining: u32,
    /// `now + window`
    pub reset_at: DateTime<Utc>,
}

impl Admission {
    /// `reset_at` as Unix epoch seconds, for the `X-RateLimit-Reset` header.
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Sliding-window request counter keyed by client identity.
pub struct SlidingWindowLimiter {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    /// Create a limiter allowing `limit` requests per `window` per identity.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::ZeroLimit`] or [`RateLimitError::ZeroWindow`]
    /// for degenerate configurations.
    pub fn new(limit: u32, window: Duration) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            windows: DashMap::new(),
            limit,
            window,
        })
    }

    /// Limiter with the default 60 second window.
    pub fn per_minute(limit: u32) -> Result<Self, RateLimitError> {
        Self::new(limit, DEFAULT_WINDOW)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decide whether a request from `identity` at `now` is within quota.
    pub fn admit(&self, identity: &str, now: DateTime<Utc>) -> Admission {
        let cutoff = sub_duration(now, self.window);
        let limit = self.limit as usize;

        // Fast path avoids allocating the key for known identities.
        let count = if let Some(mut timestamps) = self.windows.get_mut(identity) {
            trim(&mut timestamps, cutoff);
            if timestamps.len() < limit {
                timestamps.push_back(now);
                Ok(timestamps.len())
            } else {
                Err(timestamps.len())
            }
        } else {
            match self.windows.entry(identity.to_owned()) {
                Entry::Occupied(mut occupied) => {
                    let timestamps = occupied.get_mut();
                    trim(timestamps, cutoff);
                    if timestamps.len() < limit {
                        timestamps.push_back(now);
                        Ok(timestamps.len())
                    } else {
                        Err(timestamps.len())
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(VecDeque::from([now]));
                    Ok(1)
                }
            }
        };

        let (allowed, count) = match count {
            Ok(count) => (true, count),
            Err(count) => (false, count),
        };

        metrics::record_admission(allowed);
        if !allowed {
            debug!(identity, count, limit = self.limit, "Admission denied");
        }

        Admission {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count as u32),
            reset_at: add_duration(now, self.window),
        }
    }

    /// Drop every identity whose window is empty after trimming to `now`.
    ///
    /// Returns the number of identities removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let cutoff = sub_duration(now, self.window);
        let mut removed = 0usize;

        self.windows.retain(|_, timestamps| {
            trim(timestamps, cutoff);
            let keep = !timestamps.is_empty();
            if !keep {
                removed += 1;
            }
            keep
        });

        metrics::set_tracked_identities(self.windows.len());
        removed
    }

    /// Number of identities currently holding a window record.
    pub fn tracked_identities(&self) -> usize {
        self.windows.len()
    }
}

/// Drop timestamps strictly older than `cutoff`. The deque is ascending.
fn trim(timestamps: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while timestamps.front().is_some_and(|oldest| *oldest < cutoff) {
        timestamps.pop_front();
    }
}
