//! Batch scheduler.
//!
//! Splits the monitored services into fixed-size groups, fetches each group
//! concurrently and pauses between groups so the backend never sees more
//! than one group's worth of calls at a time. Fresh cache entries short
//! circuit the network entirely.

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::error::FetchError;
use crate::fetcher::RetryingFetcher;
use crate::model::{Dimension, MetricsQuery, ServiceMetrics};
use crate::settings::ResilienceConfig;
use crate::stats::ResilienceStats;

/// Aggregated result of one batch run, keyed by service name.
pub type BatchResult = BTreeMap<String, ServiceMetrics>;

pub struct BatchScheduler {
    fetcher: Arc<RetryingFetcher>,
    cache: Arc<CacheStore<ServiceMetrics>>,
    stats: Arc<ResilienceStats>,
    batch_size: usize,
    pacing: Duration,
    points: u32,
    after: i64,
}

impl BatchScheduler {
    pub fn new(
        fetcher: Arc<RetryingFetcher>,
        cache: Arc<CacheStore<ServiceMetrics>>,
        config: &ResilienceConfig,
        stats: Arc<ResilienceStats>,
    ) -> Self {
        Self {
            fetcher,
            cache,
            stats,
            batch_size: config.batch_size.max(1),
            pacing: config.batch_pacing,
            points: config.points,
            after: config.after,
        }
    }

    pub fn fetcher(&self) -> &Arc<RetryingFetcher> {
        &self.fetcher
    }

    pub fn cache(&self) -> &Arc<CacheStore<ServiceMetrics>> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<ResilienceStats> {
        &self.stats
    }

    /// Number of groups `count` entities are split into.
    pub fn group_count(&self, count: usize) -> usize {
        count.div_ceil(self.batch_size)
    }

    /// Drops in-flight registrations so nothing started before teardown can
    /// be joined afterwards.
    pub fn abort_in_flight(&self) {
        self.fetcher.coalescer().clear();
    }

    /// Fetches metrics for every entity.
    ///
    /// A failing entity yields a `ServiceMetrics` with `error` set; it never
    /// aborts the batch. The only error returned is `Cancelled`.
    #[instrument(skip(self, entities, cancel), fields(entities = entities.len()))]
    pub async fn process_batch(
        &self,
        entities: &[String],
        cancel: &CancellationToken,
    ) -> Result<BatchResult, FetchError> {
        let mut out = BatchResult::new();
        let groups = self.group_count(entities.len());

        for (index, group) in entities.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = time::sleep(self.pacing) => {}
                }
            }

            debug!(
                "Processing group {}/{} ({} entities)",
                index + 1,
                groups,
                group.len()
            );

            let results = join_all(group.iter().map(|entity| async move {
                (entity, self.fetch_entity(entity, cancel).await)
            }))
            .await;

            for (entity, result) in results {
                out.insert(entity.clone(), result?);
            }
        }

        info!(
            "Batch completed: {} entities in {} groups",
            out.len(),
            groups
        );
        Ok(out)
    }

    /// Resolves one entity from the cache or from its dimension fetches.
    async fn fetch_entity(
        &self,
        entity: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceMetrics, FetchError> {
        if let Some(entry) = self.cache.get_fresh(entity) {
            self.stats.record_cache_hit();
            debug!("Cache hit for {} (age {:?})", entity, entry.age());
            return Ok(entry.value);
        }
        self.stats.record_cache_miss();

        let captured_at = Instant::now();
        let results = join_all(Dimension::ALL.iter().map(|&dimension| {
            let query = MetricsQuery::new(entity, dimension).with_window(self.points, self.after);
            async move { (dimension, self.fetcher.fetch_with_retry(&query, cancel).await) }
        }))
        .await;

        let mut metrics = ServiceMetrics::empty(Utc::now());
        let mut first_error: Option<String> = None;

        for (dimension, result) in results {
            match result {
                Ok(body) => metrics.set_value(dimension, body.latest(dimension)),
                Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                Err(err) => {
                    let message = err.to_string();
                    first_error.get_or_insert_with(|| message.clone());
                    metrics.record_dimension_error(dimension, message);
                }
            }
        }

        let failed = metrics.dimension_errors.len();
        if failed == Dimension::ALL.len() {
            let cause = first_error.unwrap_or_default();
            warn!("{} unavailable: {}", entity, cause);
            metrics.error = Some(format!("{} unavailable: {}", entity, cause));
            self.stats.record_entity_failure();
        } else if failed > 0 {
            debug!("{}: {} of {} dimensions failed", entity, failed, Dimension::ALL.len());
            self.stats.record_partial_entity();
        }

        if !self
            .cache
            .set_at(entity, metrics.clone(), metrics.error.clone(), captured_at)
        {
            if let Some(newer) = self.cache.get(entity) {
                return Ok(newer.value);
            }
        }

        Ok(metrics)
    }
}
