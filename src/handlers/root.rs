//! Root endpoint handler for the landing page.
//!
//! This module provides the `/` endpoint handler that lists all available
//! endpoints together with version and uptime.

use axum::{extract::State, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for the root `/` endpoint.
#[instrument(skip(state))]
pub async fn root_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing / request");

    let version = env!("CARGO_PKG_VERSION");

    let uptime_secs = state.start_time.elapsed().as_secs();
    let hours = uptime_secs / 3600;
    let minutes = (uptime_secs % 3600) / 60;
    let seconds = uptime_secs % 60;
    let uptime_str = format!("{}h {}m {}s", hours, minutes, seconds);

    let mut out = String::new();
    writeln!(out, "statuswatch {version}").ok();
    writeln!(out, "Uptime: {uptime_str}").ok();
    writeln!(
        out,
        "Polling {} services every {}s (poller: {:?})",
        state.poller.entities().len(),
        state.config.resilience().poll_interval.as_secs(),
        state.poller.state()
    )
    .ok();
    writeln!(out).ok();
    writeln!(out, "Endpoints:").ok();
    for (path, description) in [
        ("/status", "Latest snapshot of all services (JSON)"),
        ("/health", "Resilience statistics and poll health"),
        ("/metrics", "Prometheus metrics"),
    ] {
        writeln!(out, "  {:10} {}", path, description).ok();
    }

    ([("Content-Type", "text/plain; charset=utf-8")], out)
}
