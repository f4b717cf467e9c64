//! Application state management for statuswatch.
//!
//! This module defines the shared application state that is passed
//! to HTTP handlers, and the builder that wires the resilience stack.

use prometheus::{Gauge, Registry};
use statuswatch::{
    BatchScheduler, CacheStore, HttpMetricsSource, MetricsSource, Poller, ResilienceStats,
    RetryingFetcher, ServiceMetrics, SyntheticMetricsSource,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::{Config, DEFAULT_BACKEND_URL};
use crate::metrics::StatusMetrics;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Global application state shared across requests and background tasks.
pub struct AppState {
    pub registry: Registry,
    pub metrics: StatusMetrics,
    pub scrape_duration: Gauge,
    pub poller: Arc<Poller>,
    pub cache: Arc<CacheStore<ServiceMetrics>>,
    pub stats: Arc<ResilienceStats>,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

/// Builds the resilience stack described by `config`: upstream source,
/// retrying fetcher, result cache and batch scheduler.
pub fn build_scheduler(
    config: &Config,
    stats: Arc<ResilienceStats>,
) -> Result<Arc<BatchScheduler>, Box<dyn std::error::Error>> {
    let resilience = config.resilience();
    resilience.validate()?;

    let source: Arc<dyn MetricsSource> = if config.is_synthetic() {
        info!("Using synthetic metrics source");
        Arc::new(SyntheticMetricsSource::with_failing(
            config.failing_services.clone().unwrap_or_default(),
        ))
    } else {
        let url = config
            .backend_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        info!("Using monitoring backend at {}", url);
        Arc::new(HttpMetricsSource::new(url)?)
    };

    let fetcher = Arc::new(RetryingFetcher::new(source, &resilience, stats.clone()));
    let cache = Arc::new(CacheStore::new(resilience.cache_ttl));
    Ok(Arc::new(BatchScheduler::new(
        fetcher,
        cache,
        &resilience,
        stats,
    )))
}
