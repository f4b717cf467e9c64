//! Config command implementation.
//!
//! Generates configuration files in various formats.

use std::fs;
use std::path::PathBuf;

use crate::cli::ConfigFormat;
use crate::config::Config;

/// Generates configuration files.
pub fn command_config(
    output: Option<PathBuf>,
    format: ConfigFormat,
    commented: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    let output = match output {
        Some(path) => path,
        None => PathBuf::from("statuswatch.yaml"),
    };

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
        ConfigFormat::Toml => toml::to_string_pretty(&config)?,
        ConfigFormat::Yaml => {
            let mut content = serde_yaml::to_string(&config)?;
            if commented {
                content = add_config_comments(content);
            }
            content
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", content);
    } else {
        fs::write(&output, content)?;
        println!("✅ Configuration written to: {}", output.display());
    }

    Ok(())
}

/// Adds comments to YAML configuration.
fn add_config_comments(yaml: String) -> String {
    let comments = r#"# statuswatch Configuration
# ==========================
#
# Server Configuration
# --------------------
# bind: "0.0.0.0"              # Bind IP (0.0.0.0 = all interfaces)
# port: 9230                   # HTTP port
#
# Upstream
# --------
# backend_url: "http://127.0.0.1:8080"  # Monitoring backend serving /metrics/{service}
# services: ["web", "db"]      # Services to poll
# synthetic: false             # Random data instead of the backend
# failing_services: null       # Services the synthetic source fails for
#
# Logging
# -------
# log_level: "info"            # off, error, warn, info, debug, trace
#
# Resilience Tuning
# -----------------
# cache_ttl_secs: 30           # Cached service result stays fresh for N seconds
# coalesce_window_secs: 30     # In-flight calls younger than this are shared
# sweep_interval_secs: 60      # Evict entries older than 2x TTL every N seconds
# poll_interval_secs: 30       # Seconds between poll cycles
# max_retries: 3               # Retries after the first failed attempt
# retry_delay_ms: 1000         # Base backoff, doubled per attempt
# retry_jitter: 0.1            # Extra random delay as fraction of the backoff
# request_timeout_ms: 5000     # Upper bound for one upstream attempt
# batch_size: 10               # Services fetched concurrently per group
# batch_pacing_ms: 100         # Pause between groups
# points: 1                    # Points requested per dimension
# after: -60                   # Query window start (relative seconds)
"#;

    format!("{comments}\n{yaml}")
}
