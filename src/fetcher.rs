//! Retrying fetcher.
//!
//! Wraps a single upstream query with a per-attempt timeout and exponential
//! backoff, and routes it through the coalescer so callers that arrive during
//! a backoff wait join the running call instead of starting another.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::coalescer::Coalescer;
use crate::error::FetchError;
use crate::model::{MetricsQuery, MetricsResponse};
use crate::settings::ResilienceConfig;
use crate::stats::ResilienceStats;
use crate::upstream::MetricsSource;

/// Result shared by every caller of one coalesced fetch.
pub type FetchResult = Result<Arc<MetricsResponse>, FetchError>;

/// Timeout and backoff parameters for one logical fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub jitter: f64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            jitter: config.retry_jitter,
            timeout: config.request_timeout,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt`
    /// (zero-based): `retry_delay * 2^attempt`, plus up to `jitter` of that.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            base.saturating_add(base.mul_f64(extra))
        } else {
            base
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ResilienceConfig::default())
    }
}

/// Runs `attempt_fn` until it succeeds, fails permanently, runs out of
/// retries, or `cancel` fires.
///
/// Each attempt is bounded by `policy.timeout`. Only retryable errors
/// (network, non-2xx, timeout) are retried; the last error is returned when
/// the retry budget is exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    endpoint: &str,
    cancel: &CancellationToken,
    stats: &ResilienceStats,
    mut attempt_fn: F,
) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        stats.record_attempt();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = time::timeout(policy.timeout, attempt_fn(attempt)) => match result {
                Ok(result) => result,
                Err(_) => {
                    stats.record_timeout();
                    Err(FetchError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout_ms: policy.timeout.as_millis() as u64,
                    })
                }
            },
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", endpoint, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.is_cancelled() {
            debug!("{} cancelled during attempt {}", endpoint, attempt + 1);
            return Err(err);
        }

        if !err.is_retryable() {
            if matches!(err, FetchError::Malformed { .. }) {
                stats.record_malformed();
            }
            stats.record_upstream_failure();
            warn!("{} failed permanently: {}", endpoint, err);
            return Err(err);
        }

        if attempt >= policy.max_retries {
            stats.record_upstream_failure();
            warn!(
                "{} failed after {} attempts: {}",
                endpoint,
                attempt + 1,
                err
            );
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        stats.record_retry();
        warn!(
            "{} attempt {} failed: {} - retrying in {:?}",
            endpoint,
            attempt + 1,
            err,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

/// Coalesced, retrying access to a `MetricsSource`.
pub struct RetryingFetcher {
    source: Arc<dyn MetricsSource>,
    coalescer: Coalescer<FetchResult>,
    policy: RetryPolicy,
    stats: Arc<ResilienceStats>,
}

impl RetryingFetcher {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        config: &ResilienceConfig,
        stats: Arc<ResilienceStats>,
    ) -> Self {
        Self {
            source,
            coalescer: Coalescer::new(config.coalesce_window),
            policy: RetryPolicy::from_config(config),
            stats,
        }
    }

    pub fn coalescer(&self) -> &Coalescer<FetchResult> {
        &self.coalescer
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetches `query`, sharing the call with any concurrent caller of the
    /// same endpoint key.
    ///
    /// The retry loop observes the shared call's own token, which fires only
    /// after every caller has stopped waiting. A caller whose `cancel` fires
    /// gets `Cancelled` at once while the others keep their result.
    #[instrument(skip(self, cancel), fields(endpoint = %query.key()))]
    pub async fn fetch_with_retry(
        &self,
        query: &MetricsQuery,
        cancel: &CancellationToken,
    ) -> FetchResult {
        let key = query.key();

        let source = self.source.clone();
        let policy = self.policy.clone();
        let stats = self.stats.clone();
        let query = query.clone();
        let endpoint = key.clone();

        let call = self.coalescer.deduped_call(&key, move |token| async move {
            retry_with_backoff(&policy, &endpoint, &token, &stats, |_attempt| {
                let source = source.clone();
                let query = query.clone();
                async move { source.fetch(&query).await }
            })
            .await
            .map(Arc::new)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = call => result,
        }
    }
}
