//! Named tuning parameters for the resilience layer.
//!
//! Every timing and sizing constant used by the cache, coalescer, fetcher,
//! batch scheduler and poller lives here so callers (and tests) can build
//! isolated instances with their own values.

use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_JITTER: f64 = 0.1;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_PACING: Duration = Duration::from_millis(100);
pub const DEFAULT_POINTS: u32 = 1;
pub const DEFAULT_AFTER_SECS: i64 = -60;

/// Resilience layer configuration.
///
/// `cache_ttl` and `coalesce_window` are independent: the first
/// bounds how long a stored value counts as fresh, the second how long a
/// still-running upstream call may be joined by new callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    /// Age below which a cache entry is fresh. Entries older than twice
    /// this value are evicted by the sweeper.
    pub cache_ttl: Duration,
    /// Maximum age of an in-flight call that new callers may still join.
    pub coalesce_window: Duration,
    /// How often the background sweeper runs.
    pub sweep_interval: Duration,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
    /// Additional attempts after the first one fails.
    pub max_retries: u32,
    /// Base backoff delay, doubled per attempt.
    pub retry_delay: Duration,
    /// Additive jitter as a fraction of the backoff delay (0.0 - 1.0).
    pub retry_jitter: f64,
    /// Upper bound for a single upstream attempt.
    pub request_timeout: Duration,
    /// Number of entities fetched concurrently per group.
    pub batch_size: usize,
    /// Pause inserted before each group after the first.
    pub batch_pacing: Duration,
    /// Number of points requested per dimension.
    pub points: u32,
    /// Start of the query window, relative seconds when negative.
    pub after: i64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_jitter: DEFAULT_RETRY_JITTER,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pacing: DEFAULT_BATCH_PACING,
            points: DEFAULT_POINTS,
            after: DEFAULT_AFTER_SECS,
        }
    }
}

impl ResilienceConfig {
    /// Checks the invariants the components rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::Invalid("cache_ttl must be greater than zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "sweep_interval must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ConfigError::Invalid(format!(
                "retry_jitter must be within 0.0..=1.0, got {}",
                self.retry_jitter
            )));
        }
        Ok(())
    }

    /// Age after which the sweeper drops an entry.
    pub fn eviction_age(&self) -> Duration {
        self.cache_ttl * 2
    }
}
