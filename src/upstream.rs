//! Upstream monitoring backend.
//!
//! `MetricsSource` is the seam between the resilience layer and whatever
//! answers `GET /metrics/{service}`. The HTTP implementation talks to a real
//! backend; the synthetic one produces random values for demo runs.

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, Url};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, FetchError};
use crate::model::{Dimension, MetricPoint, MetricsQuery, MetricsResponse};

/// Something that can answer a metrics query.
#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsResponse, FetchError>;
}

/// Monitoring backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    client: Client,
    base_url: Url,
}

impl HttpMetricsSource {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        let raw = base_url.as_ref();
        let base_url = Url::parse(raw)
            .map_err(|e| ConfigError::Invalid(format!("backend URL {:?}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "backend URL {:?} cannot carry a path",
                raw
            )));
        }
        Ok(Self { client, base_url })
    }

    /// `{base}/metrics/{service}?dimension=..&points=..&after=..` with the
    /// service name percent-encoded as a single path segment.
    pub fn url_for(&self, query: &MetricsQuery) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("metrics").push(&query.service);
        }
        url.query_pairs_mut()
            .append_pair("dimension", query.dimension.as_str())
            .append_pair("points", &query.points.to_string())
            .append_pair("after", &query.after.to_string());
        url
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsResponse, FetchError> {
        let endpoint = query.key();
        let url = self.url_for(query);
        debug!("GET {}", url);

        // attempt timeouts are enforced by the caller, not by the client
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| FetchError::Network {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        serde_json::from_slice::<MetricsResponse>(&body).map_err(|e| FetchError::Malformed {
            endpoint,
            message: e.to_string(),
        })
    }
}

/// Random values in plausible ranges; used when no backend is configured.
#[derive(Debug, Clone, Default)]
pub struct SyntheticMetricsSource {
    failing: HashSet<String>,
}

impl SyntheticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Services listed here always answer 503.
    pub fn with_failing<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failing: services.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl MetricsSource for SyntheticMetricsSource {
    async fn fetch(&self, query: &MetricsQuery) -> Result<MetricsResponse, FetchError> {
        if self.failing.contains(&query.service) {
            return Err(FetchError::Status {
                endpoint: query.key(),
                status: 503,
            });
        }

        let now = chrono::Utc::now().timestamp();
        let mut rng = rand::thread_rng();
        let points = query.points.max(1);
        let result = (0..points)
            .map(|i| {
                let value = match query.dimension {
                    Dimension::Cpu => rng.gen_range(0.0..100.0),
                    Dimension::Memory => rng.gen_range(64.0..8192.0),
                    Dimension::Uptime => rng.gen_range(3600.0..2_592_000.0),
                };
                MetricPoint {
                    dimension: query.dimension.as_str().to_string(),
                    timestamp: now - i64::from(points - 1 - i),
                    value,
                }
            })
            .collect();

        Ok(MetricsResponse { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    #[test]
    fn test_url_for_query() {
        let source = HttpMetricsSource::new("http://monitor.local:19999/").unwrap();
        let query = MetricsQuery::new("nginx", Dimension::Cpu).with_window(5, -120);
        assert_eq!(
            source.url_for(&query).as_str(),
            "http://monitor.local:19999/metrics/nginx?dimension=cpu&points=5&after=-120"
        );
    }

    #[test]
    fn test_url_for_encodes_service_as_one_segment() {
        let source = HttpMetricsSource::new("http://monitor.local/api").unwrap();
        let query = MetricsQuery::new("edge/eu west?#1", Dimension::Uptime).with_window(1, -60);
        assert_eq!(
            source.url_for(&query).as_str(),
            "http://monitor.local/api/metrics/edge%2Feu%20west%3F%231?dimension=uptime&points=1&after=-60"
        );
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(HttpMetricsSource::new("not a url").is_err());
        assert!(HttpMetricsSource::new("mailto:ops@example.com").is_err());
    }

    async fn metrics_endpoint(
        Path(service): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        match service.as_str() {
            "down" => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            "garbled" => Json(serde_json::json!({ "bogus": 1 })).into_response(),
            "edge/eu west" | "web" => {
                let dimension = params.get("dimension").cloned().unwrap_or_default();
                Json(serde_json::json!({
                    "result": [{ "dimension": dimension, "timestamp": 1_700_000_000, "value": 42.0 }]
                }))
                .into_response()
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    /// Serves `metrics_endpoint` on an ephemeral local port.
    async fn backend() -> String {
        let app = Router::new().route("/metrics/{service}", get(metrics_endpoint));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_source_maps_responses() {
        let source = HttpMetricsSource::new(backend().await).unwrap();

        let body = source
            .fetch(&MetricsQuery::new("web", Dimension::Memory))
            .await
            .unwrap();
        assert_eq!(body.latest(Dimension::Memory), Some(42.0));

        let body = source
            .fetch(&MetricsQuery::new("edge/eu west", Dimension::Cpu))
            .await
            .unwrap();
        assert_eq!(body.latest(Dimension::Cpu), Some(42.0));

        let err = source
            .fetch(&MetricsQuery::new("down", Dimension::Cpu))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Status {
                endpoint: "down:cpu".into(),
                status: 503
            }
        );
        assert!(err.is_retryable());

        let err = source
            .fetch(&MetricsQuery::new("garbled", Dimension::Uptime))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { ref endpoint, .. } if endpoint == "garbled:uptime"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_http_source_unreachable_backend_is_network_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let source = HttpMetricsSource::new(format!("http://127.0.0.1:{}", port)).unwrap();

        let err = source
            .fetch(&MetricsQuery::new("web", Dimension::Cpu))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network { ref endpoint, .. } if endpoint == "web:cpu"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_synthetic_source_values_in_range() {
        let source = SyntheticMetricsSource::new();
        let query = MetricsQuery::new("web", Dimension::Cpu).with_window(3, -60);
        let body = source.fetch(&query).await.unwrap();
        assert_eq!(body.result.len(), 3);
        let cpu = body.latest(Dimension::Cpu).unwrap();
        assert!((0.0..100.0).contains(&cpu));
    }

    #[tokio::test]
    async fn test_synthetic_source_failing_service() {
        let source = SyntheticMetricsSource::with_failing(["broken"]);
        let err = source
            .fetch(&MetricsQuery::new("broken", Dimension::Memory))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
