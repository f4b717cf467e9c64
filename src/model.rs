//! Data types shared by the upstream client, the scheduler and consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metric dimension queried per service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Cpu,
    Memory,
    Uptime,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Cpu, Dimension::Memory, Dimension::Uptime];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Cpu => "cpu",
            Dimension::Memory => "memory",
            Dimension::Uptime => "uptime",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One upstream request: a single dimension of a single service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricsQuery {
    pub service: String,
    pub dimension: Dimension,
    pub points: u32,
    pub after: i64,
}

impl MetricsQuery {
    pub fn new(service: impl Into<String>, dimension: Dimension) -> Self {
        Self {
            service: service.into(),
            dimension,
            points: crate::settings::DEFAULT_POINTS,
            after: crate::settings::DEFAULT_AFTER_SECS,
        }
    }

    pub fn with_window(mut self, points: u32, after: i64) -> Self {
        self.points = points;
        self.after = after;
        self
    }

    /// Coalescing key. Two queries with the same key share one upstream call.
    pub fn key(&self) -> String {
        format!("{}:{}", self.service, self.dimension)
    }
}

/// A single time-series sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub dimension: String,
    pub timestamp: i64,
    pub value: f64,
}

/// Body of `GET /metrics/{service}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub result: Vec<MetricPoint>,
}

impl MetricsResponse {
    /// Newest value reported for `dimension`, if any.
    pub fn latest(&self, dimension: Dimension) -> Option<f64> {
        self.result
            .iter()
            .filter(|p| p.dimension == dimension.as_str())
            .max_by_key(|p| p.timestamp)
            .map(|p| p.value)
    }
}

/// Per-service result surfaced to consumers.
///
/// Numeric fields are `None` when the dimension is unknown. `error` is set
/// only when the service as a whole could not be read; individual dimension
/// failures are listed in `dimension_errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub uptime: Option<f64>,
    pub last_update: DateTime<Utc>,
    pub error: Option<String>,
    /// Keyed by `Dimension::as_str`; TOML only accepts string keys.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dimension_errors: BTreeMap<String, String>,
}

impl ServiceMetrics {
    pub fn empty(last_update: DateTime<Utc>) -> Self {
        Self {
            cpu: None,
            memory: None,
            uptime: None,
            last_update,
            error: None,
            dimension_errors: BTreeMap::new(),
        }
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(Utc::now())
        }
    }

    pub fn value(&self, dimension: Dimension) -> Option<f64> {
        match dimension {
            Dimension::Cpu => self.cpu,
            Dimension::Memory => self.memory,
            Dimension::Uptime => self.uptime,
        }
    }

    pub fn set_value(&mut self, dimension: Dimension, value: Option<f64>) {
        match dimension {
            Dimension::Cpu => self.cpu = value,
            Dimension::Memory => self.memory = value,
            Dimension::Uptime => self.uptime = value,
        }
    }

    pub fn record_dimension_error(&mut self, dimension: Dimension, message: impl Into<String>) {
        self.dimension_errors
            .insert(dimension.as_str().to_string(), message.into());
    }

    pub fn dimension_error(&self, dimension: Dimension) -> Option<&str> {
        self.dimension_errors
            .get(dimension.as_str())
            .map(String::as_str)
    }

    /// True when at least one dimension carries a value.
    pub fn has_data(&self) -> bool {
        Dimension::ALL.iter().any(|d| self.value(*d).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key() {
        let q = MetricsQuery::new("postgres", Dimension::Memory);
        assert_eq!(q.key(), "postgres:memory");
    }

    #[test]
    fn test_latest_picks_newest_point_of_dimension() {
        let body: MetricsResponse = serde_json::from_str(
            r#"{"result":[
                {"dimension":"cpu","timestamp":100,"value":12.5},
                {"dimension":"cpu","timestamp":160,"value":20.0},
                {"dimension":"memory","timestamp":170,"value":512.0}
            ]}"#,
        )
        .unwrap();

        assert_eq!(body.latest(Dimension::Cpu), Some(20.0));
        assert_eq!(body.latest(Dimension::Memory), Some(512.0));
        assert_eq!(body.latest(Dimension::Uptime), None);
    }

    #[test]
    fn test_service_metrics_serializes_without_empty_dimension_errors() {
        let mut m = ServiceMetrics::empty(Utc::now());
        m.set_value(Dimension::Cpu, Some(1.5));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["cpu"], 1.5);
        assert!(json["memory"].is_null());
        assert!(json.get("dimension_errors").is_none());
        assert!(m.has_data());
    }
}
