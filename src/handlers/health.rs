//! Health check endpoint handler.
//!
//! This module provides the `/health` endpoint handler that returns
//! poll health, in-flight upstream calls and resilience statistics.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::fmt::Write as FmtWrite;
use std::sync::atomic::Ordering;
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Handler for the /health endpoint.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let snapshot = state.poller.snapshot();
    let completed = state.stats.cycles_completed.load(Ordering::Relaxed);

    let status = if completed > 0 && snapshot.error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let message = match (&snapshot.error, completed) {
        (Some(err), _) => format!("Poll failed: {err}"),
        (None, 0) => "Waiting for first poll cycle".to_string(),
        (None, _) => "OK".to_string(),
    };

    let uptime_hours = state.stats.get_uptime_seconds() as f64 / SECONDS_PER_HOUR;
    let uptime_str = if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    };

    let table = state.stats.render_table();
    let in_flight = render_in_flight(&state);

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!(
            "{message}\n\nUptime: {uptime_str}\nPoller: {:?}\nCache entries: {}\n\n{table}\n{in_flight}",
            state.poller.state(),
            state.cache.len()
        ),
    )
}

/// Renders the coalescer's outstanding calls as a plain-text table.
fn render_in_flight(state: &SharedState) -> String {
    let coalescer = state.poller.scheduler().fetcher().coalescer();
    let mut calls = coalescer.in_flight();
    calls.sort_by(|a, b| a.key.cmp(&b.key));

    let mut out = String::new();
    writeln!(out, "IN-FLIGHT UPSTREAM CALLS").ok();
    writeln!(out, "========================").ok();
    writeln!(out).ok();
    writeln!(
        out,
        "started: {}  joined: {}",
        coalescer.started_calls(),
        coalescer.joined_calls()
    )
    .ok();
    writeln!(out).ok();
    writeln!(out, "{:32} | {:>10}", "Key", "Age (s)").ok();
    writeln!(out, "{}", "-".repeat(45)).ok();
    for call in &calls {
        writeln!(out, "{:32} | {:>10.1}", call.key, call.age.as_secs_f64()).ok();
    }
    if calls.is_empty() {
        writeln!(out, "(none)").ok();
    }
    out
}
