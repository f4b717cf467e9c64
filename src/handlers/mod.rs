//! HTTP endpoint handlers for statuswatch.
//!
//! This module provides handlers for all HTTP endpoints:
//! - `/`: Landing text with endpoint list
//! - `/status`: Latest poll snapshot as JSON
//! - `/health`: Resilience statistics and poll health
//! - `/metrics`: Prometheus metrics endpoint

pub mod health;
pub mod metrics;
pub mod root;
pub mod status;

// Re-export handlers
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
pub use status::status_handler;
