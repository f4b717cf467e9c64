//! statuswatch - resilient infrastructure-status poller
//!
//! Polls a monitoring backend for per-service cpu/memory/uptime through the
//! statuswatch resilience layer and serves the latest snapshot over HTTP.
//! This is the main entry point that initializes the server and handles subcommands.

mod cli;
mod commands;
mod config;
mod handlers;
mod metrics;
mod state;

use axum::{routing::get, Router};
use clap::Parser;
use prometheus::{Gauge, Registry};
use statuswatch::Poller;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};

use cli::{Args, Commands, ConfigFormat, LogLevel};
use commands::{command_config, command_once};
use config::{
    resolve_config, show_config, validate_effective_config, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use handlers::{health_handler, metrics_handler, root_handler, status_handler};
use metrics::StatusMetrics;
use state::{build_scheduler, AppState, SharedState};

/// Initializes tracing logging subsystem with configured log level.
///
/// The CLI flag wins over `log_level` from the config file.
fn setup_logging(config: &Config, args: &Args) {
    let level = match &args.log_level {
        Some(LogLevel::Off) => LevelFilter::OFF,
        Some(LogLevel::Error) => LevelFilter::ERROR,
        Some(LogLevel::Warn) => LevelFilter::WARN,
        Some(LogLevel::Info) => LevelFilter::INFO,
        Some(LogLevel::Debug) => LevelFilter::DEBUG,
        Some(LogLevel::Trace) => LevelFilter::TRACE,
        None => config
            .log_level
            .as_deref()
            .and_then(|l| l.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::INFO),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return;
    }

    info!("Logging initialized with level: {}", level);
}

/// Helper function to load and validate configuration.
/// Exits the process with error code 1 if validation fails.
fn load_validated_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {}", e);
        std::process::exit(1);
    }
    Ok(config)
}

/// Resolves once SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

/// Main application entry point.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        let format = args.config_format.clone().unwrap_or(ConfigFormat::Yaml);
        return show_config(&config, format, false);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        return match command {
            Commands::Config {
                output,
                format,
                commented,
            } => command_config(output.clone(), format.clone(), *commented),

            Commands::Once { format } => {
                let config = load_validated_config(&args)?;
                setup_logging(&config, &args);
                command_once(&config, format.clone()).await
            }
        };
    }

    // Load configuration for main server mode
    let config = load_validated_config(&args)?;
    setup_logging(&config, &args);

    let bind_ip_str = config
        .bind
        .clone()
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);
    let resilience = config.resilience();
    let services = config.service_list();

    info!(
        "Starting statuswatch v{} for {} services",
        env!("CARGO_PKG_VERSION"),
        services.len()
    );
    debug!("Resilience settings: {:?}", resilience);

    // Wire the resilience stack
    let stats = Arc::new(statuswatch::ResilienceStats::new());
    let scheduler = build_scheduler(&config, stats.clone())?;
    let cache = scheduler.cache().clone();

    let sweeper_cancel = CancellationToken::new();
    let sweeper = cache.spawn_sweeper(
        resilience.sweep_interval,
        stats.clone(),
        sweeper_cancel.clone(),
    );

    let poller = Arc::new(Poller::new(scheduler, services, resilience.poll_interval));

    // Prometheus registry
    let registry = Registry::new();
    let metrics = StatusMetrics::new(&registry)?;
    let scrape_duration = Gauge::new(
        "statuswatch_scrape_duration_seconds",
        "Duration of the last /metrics request in seconds",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;

    let state: SharedState = Arc::new(AppState {
        registry,
        metrics,
        scrape_duration,
        poller: poller.clone(),
        cache,
        stats,
        config: Arc::new(config),
        start_time: Instant::now(),
    });

    // Start polling; the first cycle runs immediately
    let mut updates = poller.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let unavailable = snapshot
                .services
                .values()
                .filter(|m| m.error.is_some())
                .count();
            if let Some(err) = &snapshot.error {
                warn!("Cycle {} failed: {}", snapshot.cycle, err);
            } else if unavailable > 0 {
                warn!(
                    "Cycle {}: {} of {} services unavailable",
                    snapshot.cycle,
                    unavailable,
                    snapshot.services.len()
                );
            } else {
                info!(
                    "Cycle {}: {} services updated",
                    snapshot.cycle,
                    snapshot.services.len()
                );
            }
        }
    });

    // Configure HTTP server routes
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("statuswatch listening on http://{}:{}", bind_ip_str, port);

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Tear down background work before exiting
    poller.unsubscribe();
    sweeper_cancel.cancel();
    watcher.abort();
    if let Err(e) = sweeper.await {
        debug!("Cache sweeper ended abnormally: {}", e);
    }

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("statuswatch stopped gracefully");
    Ok(())
}
