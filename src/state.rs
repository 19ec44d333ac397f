//! Shared application state for Axum handlers.
//!
//! - **Store**: in-memory metadata records
//! - **Cache**: TTL cache in front of the store for reads
//! - **Limiter**: sliding-window admission control, shared with the middleware
//! - **Configuration**: runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background maintenance is managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop it before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::config::Config;
use crate::models::Metadata;
use crate::ratelimit::{RateLimitError, SlidingWindowLimiter};
use crate::store::MetadataStore;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// state.spawn_maintenance_task();
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Metadata records
    pub store: Arc<MetadataStore>,
    /// Read-through cache in front of `store`
    pub cache: Arc<TtlCache<Metadata>>,
    /// `None` when rate limiting is disabled
    pub limiter: Option<Arc<SlidingWindowLimiter>>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state from configuration. No background task is started.
    ///
    /// # Errors
    ///
    /// Fails when rate limiting is enabled with a zero window.
    pub fn new(config: Config) -> Result<Self, RateLimitError> {
        let limiter = if config.rate_limiting_enabled() {
            Some(Arc::new(SlidingWindowLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window,
            )?))
        } else {
            None
        };

        Ok(Self {
            started_at: Instant::now(),
            cache: Arc::new(TtlCache::new("server", config.cache_ttl)),
            config: Arc::new(config),
            store: Arc::new(MetadataStore::new()),
            limiter,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Run one maintenance pass: evict expired cache entries and drop idle
    /// rate-limit records.
    pub fn run_maintenance(&self) -> (usize, usize) {
        maintain(&self.cache, self.limiter.as_deref())
    }

    /// Spawn the periodic maintenance task.
    ///
    /// The task is tracked by `task_tracker` and respects `cancellation_token`.
    /// Only the cache and limiter are moved into it.
    pub fn spawn_maintenance_task(&self) {
        let cache = self.cache.clone();
        let limiter = self.limiter.clone();
        let period = self.config.cache_cleanup_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Maintenance task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        maintain(&cache, limiter.as_deref());
                    }
                }
            }

            debug!("Maintenance task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn maintain(cache: &TtlCache<Metadata>, limiter: Option<&SlidingWindowLimiter>) -> (usize, usize) {
    let evicted = cache.cleanup();
    let swept = limiter.map_or(0, |l| l.sweep(chrono::Utc::now()));
    if evicted > 0 || swept > 0 {
        debug!(evicted, swept, "Maintenance pass complete");
    }
    (evicted, swept)
}
