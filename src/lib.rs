//! statuswatch resilience library
//!
//! This library keeps an infrastructure-status view fed from a remote
//! monitoring backend without hammering it. It is designed to be embedded:
//! every component is constructed explicitly and shared by `Arc`, so tests
//! and hosts can run isolated instances side by side.
//!
//! # Features
//!
//! - **Cache Store**: last-known value or error per service, TTL freshness, background sweep
//! - **Coalescer**: one outstanding upstream call per endpoint key
//! - **Retrying Fetcher**: per-attempt timeout, exponential backoff with jitter
//! - **Batch Scheduler**: fixed-size concurrent groups with pacing between them
//! - **Poller**: interval driver with a re-entrancy guard and safe teardown
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use statuswatch::{
//!     BatchScheduler, CacheStore, Poller, ResilienceConfig, ResilienceStats, RetryingFetcher,
//!     SyntheticMetricsSource,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ResilienceConfig::default();
//!     let stats = Arc::new(ResilienceStats::new());
//!     let source = Arc::new(SyntheticMetricsSource::new());
//!     let fetcher = Arc::new(RetryingFetcher::new(source, &config, stats.clone()));
//!     let cache = Arc::new(CacheStore::new(config.cache_ttl));
//!     let scheduler = Arc::new(BatchScheduler::new(fetcher, cache, &config, stats));
//!
//!     let poller = Poller::new(scheduler, vec!["web".into(), "db".into()], config.poll_interval);
//!     let mut rx = poller.subscribe();
//!     rx.changed().await.ok();
//!     println!("{:?}", rx.borrow().services);
//!     poller.unsubscribe();
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod coalescer;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod poller;
pub mod settings;
pub mod stats;
pub mod upstream;

// Re-export main types for convenience
pub use batch::{BatchResult, BatchScheduler};
pub use cache::{CacheEntry, CacheStore};
pub use coalescer::{Coalescer, InFlightInfo};
pub use error::{ConfigError, FetchError};
pub use fetcher::{retry_with_backoff, FetchResult, RetryPolicy, RetryingFetcher};
pub use model::{Dimension, MetricPoint, MetricsQuery, MetricsResponse, ServiceMetrics};
pub use poller::{Poller, PollerState, Snapshot, MIN_POLL_INTERVAL};
pub use settings::ResilienceConfig;
pub use stats::ResilienceStats;
pub use upstream::{HttpMetricsSource, MetricsSource, SyntheticMetricsSource};
