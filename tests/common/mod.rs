//! Shared helpers for integration tests: a scripted in-memory backend and
//! builders for a complete resilience stack.

#![allow(dead_code)]

use async_trait::async_trait;
use statuswatch::{
    BatchScheduler, CacheStore, Dimension, FetchError, MetricPoint, MetricsQuery, MetricsResponse,
    MetricsSource, ResilienceConfig, ResilienceStats, RetryingFetcher,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};

/// One recorded upstream call.
#[derive(Debug, Clone)]
pub struct Call {
    pub service: String,
    pub dimension: Dimension,
    pub at: Instant,
}

/// In-memory backend whose behaviour is configured per service or key.
#[derive(Default)]
pub struct ScriptedSource {
    calls: Mutex<Vec<Call>>,
    failing: HashSet<String>,
    malformed: HashSet<String>,
    fail_first: Mutex<HashMap<String, u32>>,
    delay: Duration,
    blocking: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Services that always answer 503.
    pub fn failing(mut self, services: &[&str]) -> Self {
        self.failing = services.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Services whose body never decodes.
    pub fn malformed(mut self, services: &[&str]) -> Self {
        self.malformed = services.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Makes the first `n` calls for `key` ("service:dimension") fail.
    pub fn fail_first(self, key: &str, n: u32) -> Self {
        if let Ok(mut map) = self.fail_first.lock() {
            map.insert(key.to_string(), n);
        }
        self
    }

    /// Every call takes `delay` before answering.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call blocks its worker thread for `duration`, so it cannot be
    /// interrupted by cancellation.
    pub fn blocking(mut self, duration: Duration) -> Self {
        self.blocking = duration;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, service: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.service == service)
            .count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for ScriptedSource {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsResponse, FetchError> {
        self.calls.lock().unwrap().push(Call {
            service: query.service.clone(),
            dimension: query.dimension,
            at: Instant::now(),
        });

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            time::sleep(self.delay).await;
        }
        if !self.blocking.is_zero() {
            std::thread::sleep(self.blocking);
        }

        let key = query.key();
        let scripted_failure = {
            let mut map = self.fail_first.lock().unwrap();
            match map.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if scripted_failure || self.failing.contains(&query.service) {
            return Err(FetchError::Status {
                endpoint: key,
                status: 503,
            });
        }
        if self.malformed.contains(&query.service) {
            return Err(FetchError::Malformed {
                endpoint: key,
                message: "expected value at line 1 column 1".into(),
            });
        }

        let value = match query.dimension {
            Dimension::Cpu => 12.5,
            Dimension::Memory => 2048.0,
            Dimension::Uptime => 86_400.0,
        };
        Ok(MetricsResponse {
            result: vec![MetricPoint {
                dimension: query.dimension.as_str().to_string(),
                timestamp: 1_700_000_000,
                value,
            }],
        })
    }
}

/// Default configuration with jitter disabled so delays are exact.
pub fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        retry_jitter: 0.0,
        ..Default::default()
    }
}

pub struct Stack {
    pub scheduler: Arc<BatchScheduler>,
    pub fetcher: Arc<RetryingFetcher>,
    pub cache: Arc<CacheStore<statuswatch::ServiceMetrics>>,
    pub stats: Arc<ResilienceStats>,
}

pub fn build(source: Arc<ScriptedSource>, config: &ResilienceConfig) -> Stack {
    let stats = Arc::new(ResilienceStats::new());
    let fetcher = Arc::new(RetryingFetcher::new(source, config, stats.clone()));
    let cache = Arc::new(CacheStore::new(config.cache_ttl));
    let scheduler = Arc::new(BatchScheduler::new(
        fetcher.clone(),
        cache.clone(),
        config,
        stats.clone(),
    ));
    Stack {
        scheduler,
        fetcher,
        cache,
        stats,
    }
}

pub fn names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("svc-{}", i)).collect()
}
