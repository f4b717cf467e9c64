//! Prometheus metrics definitions for statuswatch.
//!
//! Per-service gauges mirror the latest published snapshot; resilience gauges
//! mirror the counters kept by `ResilienceStats`.

use prometheus::{Gauge, GaugeVec, Opts, Registry};
use statuswatch::{ResilienceStats, Snapshot};
use std::sync::atomic::Ordering;

/// Collection of Prometheus metrics exported on `/metrics`.
#[derive(Clone)]
pub struct StatusMetrics {
    // ========== Service Metrics ==========
    pub service_cpu: GaugeVec,    // labels: service
    pub service_memory: GaugeVec, // labels: service
    pub service_uptime: GaugeVec, // labels: service
    pub service_up: GaugeVec,     // labels: service

    // ========== Poll Metrics ==========
    pub poll_cycle: Gauge,
    pub poll_error: Gauge,
    pub poll_last_success_timestamp: Gauge,
    pub in_flight_requests: Gauge,
    pub cache_entries: Gauge,

    // ========== Resilience Counters ==========
    pub counters: GaugeVec, // labels: counter
}

impl StatusMetrics {
    /// Creates and registers all Prometheus metrics with the registry.
    pub fn new(registry: &Registry) -> Result<Self, Box<dyn std::error::Error>> {
        let service_cpu = GaugeVec::new(
            Opts::new("statuswatch_service_cpu", "Latest CPU value per service"),
            &["service"],
        )?;
        let service_memory = GaugeVec::new(
            Opts::new("statuswatch_service_memory", "Latest memory value per service"),
            &["service"],
        )?;
        let service_uptime = GaugeVec::new(
            Opts::new("statuswatch_service_uptime", "Latest uptime value per service"),
            &["service"],
        )?;
        let service_up = GaugeVec::new(
            Opts::new(
                "statuswatch_service_up",
                "1 if the last poll returned data for the service, 0 otherwise",
            ),
            &["service"],
        )?;

        let poll_cycle = Gauge::new("statuswatch_poll_cycle", "Number of the last published cycle")?;
        let poll_error = Gauge::new(
            "statuswatch_poll_error",
            "1 if the last poll cycle failed as a whole",
        )?;
        let poll_last_success_timestamp = Gauge::new(
            "statuswatch_poll_last_success_timestamp_seconds",
            "Unix time of the last successful poll cycle",
        )?;
        let in_flight_requests = Gauge::new(
            "statuswatch_in_flight_requests",
            "Upstream calls currently registered for coalescing",
        )?;
        let cache_entries = Gauge::new("statuswatch_cache_entries", "Entries in the result cache")?;

        let counters = GaugeVec::new(
            Opts::new(
                "statuswatch_resilience_total",
                "Resilience layer event counters",
            ),
            &["counter"],
        )?;

        registry.register(Box::new(service_cpu.clone()))?;
        registry.register(Box::new(service_memory.clone()))?;
        registry.register(Box::new(service_uptime.clone()))?;
        registry.register(Box::new(service_up.clone()))?;
        registry.register(Box::new(poll_cycle.clone()))?;
        registry.register(Box::new(poll_error.clone()))?;
        registry.register(Box::new(poll_last_success_timestamp.clone()))?;
        registry.register(Box::new(in_flight_requests.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(counters.clone()))?;

        Ok(Self {
            service_cpu,
            service_memory,
            service_uptime,
            service_up,
            poll_cycle,
            poll_error,
            poll_last_success_timestamp,
            in_flight_requests,
            cache_entries,
            counters,
        })
    }

    /// Replaces per-service gauges with the values of `snapshot`.
    ///
    /// Missing dimensions are left unset rather than exported as zero.
    pub fn update_from_snapshot(&self, snapshot: &Snapshot) {
        self.service_cpu.reset();
        self.service_memory.reset();
        self.service_uptime.reset();
        self.service_up.reset();

        for (service, metrics) in &snapshot.services {
            let labels = &[service.as_str()];
            if let Some(v) = metrics.cpu {
                self.service_cpu.with_label_values(labels).set(v);
            }
            if let Some(v) = metrics.memory {
                self.service_memory.with_label_values(labels).set(v);
            }
            if let Some(v) = metrics.uptime {
                self.service_uptime.with_label_values(labels).set(v);
            }
            let up = if metrics.has_data() { 1.0 } else { 0.0 };
            self.service_up.with_label_values(labels).set(up);
        }

        self.poll_cycle.set(snapshot.cycle as f64);
        self.poll_error
            .set(if snapshot.error.is_some() { 1.0 } else { 0.0 });
        if let Some(at) = snapshot.updated_at {
            self.poll_last_success_timestamp.set(at.timestamp() as f64);
        }
    }

    pub fn update_from_stats(&self, stats: &ResilienceStats) {
        let counters = [
            ("cache_hits", &stats.cache_hits),
            ("cache_misses", &stats.cache_misses),
            ("cache_evictions", &stats.cache_evictions),
            ("upstream_attempts", &stats.upstream_attempts),
            ("upstream_retries", &stats.upstream_retries),
            ("upstream_timeouts", &stats.upstream_timeouts),
            ("upstream_failures", &stats.upstream_failures),
            ("upstream_malformed", &stats.upstream_malformed),
            ("entity_failures", &stats.entity_failures),
            ("partial_entities", &stats.partial_entities),
            ("cycles_completed", &stats.cycles_completed),
            ("cycles_failed", &stats.cycles_failed),
            ("ticks_skipped", &stats.ticks_skipped),
            ("late_results_discarded", &stats.late_results_discarded),
        ];
        for (name, counter) in counters {
            self.counters
                .with_label_values(&[name])
                .set(counter.load(Ordering::Relaxed) as f64);
        }
    }
}
