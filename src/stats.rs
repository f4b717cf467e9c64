//! Resilience statistics.
//!
//! Counters and running statistics for cache, coalescing, retry and poll
//! cycle behaviour. Rendered as a plain-text table by the `/health` endpoint
//! and exported as Prometheus gauges by `/metrics`.

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock as StdRwLock};
use std::time::Instant;

/// Running statistics for a single metric.
#[derive(Clone, Copy, Default)]
pub struct RunningStat {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
}

impl RunningStat {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
            self.last = value;
            self.sum = value;
            self.count = 1;
            return;
        }
        self.count += 1;
        self.sum += value;
        self.last = value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / (self.count as f64)
        }
    }
}

/// Thread-safe wrapper for running statistics.
#[derive(Default)]
pub struct Stat {
    inner: Mutex<RunningStat>,
}

impl Stat {
    pub fn add_sample(&self, value: f64) {
        if let Ok(mut s) = self.inner.lock() {
            s.add(value);
        }
    }

    /// Returns (last, avg, max, min, count).
    pub fn snapshot(&self) -> (f64, f64, f64, f64, u64) {
        if let Ok(s) = self.inner.lock() {
            (s.last, s.avg(), s.max, s.min, s.count)
        } else {
            (0.0, 0.0, 0.0, 0.0, 0)
        }
    }
}

/// Statistics shared by every component of one resilience stack.
pub struct ResilienceStats {
    // Cache
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub cache_evictions: AtomicU64,

    // Upstream
    pub upstream_attempts: AtomicU64,
    pub upstream_retries: AtomicU64,
    pub upstream_timeouts: AtomicU64,
    pub upstream_failures: AtomicU64,
    pub upstream_malformed: AtomicU64,

    // Entities
    pub entity_failures: AtomicU64,
    pub partial_entities: AtomicU64,

    // Poll cycles
    pub cycles_completed: AtomicU64,
    pub cycles_failed: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub late_results_discarded: AtomicU64,
    pub cycle_duration_seconds: Stat,
    pub entities_per_cycle: Stat,
    pub groups_per_cycle: Stat,

    pub start_time: Instant,
    pub last_cycle_time: StdRwLock<Option<chrono::DateTime<chrono::Utc>>>,
}

impl Default for ResilienceStats {
    fn default() -> Self {
        Self {
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_evictions: AtomicU64::new(0),
            upstream_attempts: AtomicU64::new(0),
            upstream_retries: AtomicU64::new(0),
            upstream_timeouts: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            upstream_malformed: AtomicU64::new(0),
            entity_failures: AtomicU64::new(0),
            partial_entities: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            cycles_failed: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            late_results_discarded: AtomicU64::new(0),
            cycle_duration_seconds: Stat::default(),
            entities_per_cycle: Stat::default(),
            groups_per_cycle: Stat::default(),
            start_time: Instant::now(),
            last_cycle_time: StdRwLock::new(None),
        }
    }
}

impl ResilienceStats {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.cache_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.upstream_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.upstream_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.upstream_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.upstream_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entity_failure(&self) {
        self.entity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_partial_entity(&self) {
        self.partial_entities.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, duration_seconds: f64, entities: u64, groups: u64) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.cycle_duration_seconds.add_sample(duration_seconds);
        self.entities_per_cycle.add_sample(entities as f64);
        self.groups_per_cycle.add_sample(groups as f64);
        if let Ok(mut guard) = self.last_cycle_time.write() {
            *guard = Some(chrono::Utc::now());
        }
    }

    pub fn record_cycle_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_tick(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded_result(&self) {
        self.late_results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn get_last_cycle_time_str(&self) -> String {
        if let Ok(guard) = self.last_cycle_time.read() {
            if let Some(at) = *guard {
                return at.format("%H:%M:%S").to_string();
            }
        }
        "N/A".to_string()
    }

    pub fn render_table(&self) -> String {
        let (cd_cur, cd_avg, cd_max, cd_min, _) = self.cycle_duration_seconds.snapshot();
        let (en_cur, en_avg, en_max, en_min, _) = self.entities_per_cycle.snapshot();
        let (gr_cur, gr_avg, gr_max, gr_min, _) = self.groups_per_cycle.snapshot();

        let left_col = 26usize;
        let col_w = 12usize;

        let mut out = String::new();

        writeln!(out, "RESILIENCE LAYER - INTERNAL STATS").ok();
        writeln!(out, "=================================").ok();
        writeln!(out).ok();

        writeln!(
            out,
            "{:left$} | {:^col$} | {:^col$} | {:^col$} | {:^col$}",
            "",
            "current",
            "average",
            "max",
            "min",
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(out, "{}", "-".repeat(left_col + 4 * (col_w + 3))).ok();

        for (name, cur, avg, max, min) in [
            ("cycle duration (s)", cd_cur, cd_avg, cd_max, cd_min),
            ("entities per cycle", en_cur, en_avg, en_max, en_min),
            ("groups per cycle", gr_cur, gr_avg, gr_max, gr_min),
        ] {
            writeln!(
                out,
                "{:left$} | {:>col$.3} | {:>col$.3} | {:>col$.3} | {:>col$.3}",
                name,
                cur,
                avg,
                max,
                min,
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(out, "COUNTERS").ok();
        writeln!(out, "--------").ok();

        let counters = [
            ("cache hits", &self.cache_hits),
            ("cache misses", &self.cache_misses),
            ("cache evictions", &self.cache_evictions),
            ("upstream attempts", &self.upstream_attempts),
            ("upstream retries", &self.upstream_retries),
            ("upstream timeouts", &self.upstream_timeouts),
            ("upstream failures", &self.upstream_failures),
            ("malformed responses", &self.upstream_malformed),
            ("failed entities", &self.entity_failures),
            ("partial entities", &self.partial_entities),
            ("cycles completed", &self.cycles_completed),
            ("cycles failed", &self.cycles_failed),
            ("ticks skipped", &self.ticks_skipped),
            ("late results discarded", &self.late_results_discarded),
        ];
        for (name, counter) in counters {
            writeln!(
                out,
                "{:left$} | {:>col$}",
                name,
                counter.load(Ordering::Relaxed),
                left = left_col,
                col = col_w
            )
            .ok();
        }

        writeln!(out).ok();
        writeln!(
            out,
            "{:left$} | {:>col$.1}",
            "cache hit ratio (%)",
            self.get_cache_hit_ratio(),
            left = left_col,
            col = col_w
        )
        .ok();
        writeln!(
            out,
            "{:left$} | {:>col$}",
            "last cycle (UTC)",
            self.get_last_cycle_time_str(),
            left = left_col,
            col = col_w
        )
        .ok();

        out
    }
}
