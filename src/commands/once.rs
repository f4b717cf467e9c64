//! Once command implementation.
//!
//! Runs a single batch cycle against the configured backend and prints
//! the resulting snapshot.

use chrono::Utc;
use serde::Serialize;
use statuswatch::{BatchResult, ResilienceStats};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cli::ConfigFormat;
use crate::config::Config;
use crate::state::build_scheduler;

#[derive(Serialize)]
struct OnceReport {
    // plain values first, TOML cannot emit them after a table
    updated_at: chrono::DateTime<Utc>,
    duration_ms: f64,
    services: BatchResult,
}

fn render_report(
    report: &OnceReport,
    format: ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(report)?,
        ConfigFormat::Toml => toml::to_string_pretty(report)?,
        ConfigFormat::Yaml => serde_yaml::to_string(report)?,
    };
    Ok(output)
}

/// Fetches every configured service once and prints the result.
pub async fn command_once(
    config: &Config,
    format: ConfigFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let services = config.service_list();
    if services.is_empty() {
        return Err("No services configured (set `services` or pass --services)".into());
    }

    let stats = Arc::new(ResilienceStats::new());
    let scheduler = build_scheduler(config, stats.clone())?;

    eprintln!(
        "🔄 Polling {} services in {} groups...",
        services.len(),
        scheduler.group_count(services.len())
    );

    let start = Instant::now();
    let cancel = CancellationToken::new();
    let services = scheduler.process_batch(&services, &cancel).await?;

    let failed = services.values().filter(|m| m.error.is_some()).count();
    let report = OnceReport {
        updated_at: Utc::now(),
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        services,
    };

    println!("{}", render_report(&report, format)?);

    if failed > 0 {
        eprintln!("⚠️  {} of {} services unavailable", failed, report.services.len());
    } else {
        eprintln!("✅ All {} services reported", report.services.len());
    }
    eprintln!(
        "   upstream attempts: {}, retries: {}",
        stats
            .upstream_attempts
            .load(std::sync::atomic::Ordering::Relaxed),
        stats
            .upstream_retries
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    Ok(())
}
