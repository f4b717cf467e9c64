//! Configuration management for statuswatch.
//!
//! This module handles loading, merging, and validating configuration from files
//! and CLI arguments. It supports YAML, JSON, and TOML formats.

use crate::cli::{Args, ConfigFormat};
use serde::{Deserialize, Serialize};
use statuswatch::settings::{self, ResilienceConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// Default configuration constants
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9230;
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8080";

/// Enhanced configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub port: Option<u16>,
    pub bind: Option<String>,

    // Upstream
    #[serde(alias = "backend-url")]
    pub backend_url: Option<String>,
    pub services: Option<Vec<String>>,
    /// Serve random data instead of querying the backend
    pub synthetic: Option<bool>,
    /// Services the synthetic source always fails for
    #[serde(alias = "failing-services")]
    pub failing_services: Option<Vec<String>>,

    // Logging
    pub log_level: Option<String>,

    // Resilience tuning
    #[serde(alias = "cache-ttl-secs")]
    pub cache_ttl_secs: Option<u64>,
    #[serde(alias = "coalesce-window-secs")]
    pub coalesce_window_secs: Option<u64>,
    #[serde(alias = "sweep-interval-secs")]
    pub sweep_interval_secs: Option<u64>,
    #[serde(alias = "poll-interval-secs")]
    pub poll_interval_secs: Option<u64>,
    #[serde(alias = "max-retries")]
    pub max_retries: Option<u32>,
    #[serde(alias = "retry-delay-ms")]
    pub retry_delay_ms: Option<u64>,
    #[serde(alias = "retry-jitter")]
    pub retry_jitter: Option<f64>,
    #[serde(alias = "request-timeout-ms")]
    pub request_timeout_ms: Option<u64>,
    #[serde(alias = "batch-size")]
    pub batch_size: Option<usize>,
    #[serde(alias = "batch-pacing-ms")]
    pub batch_pacing_ms: Option<u64>,
    /// Points requested per dimension
    pub points: Option<u32>,
    /// Query window start, relative seconds when negative
    pub after: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        let r = ResilienceConfig::default();
        Self {
            bind: Some(DEFAULT_BIND_ADDR.to_string()),
            port: Some(DEFAULT_PORT),
            backend_url: Some(DEFAULT_BACKEND_URL.to_string()),
            services: Some(Vec::new()),
            synthetic: Some(false),
            failing_services: None,
            log_level: Some("info".into()),
            cache_ttl_secs: Some(r.cache_ttl.as_secs()),
            coalesce_window_secs: Some(r.coalesce_window.as_secs()),
            sweep_interval_secs: Some(r.sweep_interval.as_secs()),
            poll_interval_secs: Some(r.poll_interval.as_secs()),
            max_retries: Some(r.max_retries),
            retry_delay_ms: Some(r.retry_delay.as_millis() as u64),
            retry_jitter: Some(r.retry_jitter),
            request_timeout_ms: Some(r.request_timeout.as_millis() as u64),
            batch_size: Some(r.batch_size),
            batch_pacing_ms: Some(r.batch_pacing.as_millis() as u64),
            points: Some(r.points),
            after: Some(r.after),
        }
    }
}

impl Config {
    /// Builds the library configuration, falling back to library defaults
    /// for every unset field.
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            cache_ttl: self
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(settings::DEFAULT_CACHE_TTL),
            coalesce_window: self
                .coalesce_window_secs
                .map(Duration::from_secs)
                .unwrap_or(settings::DEFAULT_COALESCE_WINDOW),
            sweep_interval: self
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(settings::DEFAULT_SWEEP_INTERVAL),
            poll_interval: self
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(settings::DEFAULT_POLL_INTERVAL),
            max_retries: self.max_retries.unwrap_or(settings::DEFAULT_MAX_RETRIES),
            retry_delay: self
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(settings::DEFAULT_RETRY_DELAY),
            retry_jitter: self.retry_jitter.unwrap_or(settings::DEFAULT_RETRY_JITTER),
            request_timeout: self
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(settings::DEFAULT_REQUEST_TIMEOUT),
            batch_size: self.batch_size.unwrap_or(settings::DEFAULT_BATCH_SIZE),
            batch_pacing: self
                .batch_pacing_ms
                .map(Duration::from_millis)
                .unwrap_or(settings::DEFAULT_BATCH_PACING),
            points: self.points.unwrap_or(settings::DEFAULT_POINTS),
            after: self.after.unwrap_or(settings::DEFAULT_AFTER_SECS),
        }
    }

    pub fn service_list(&self) -> Vec<String> {
        self.services.clone().unwrap_or_default()
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic.unwrap_or(false)
    }
}

/// Validate effective config (used by --check-config and at startup)
pub fn validate_effective_config(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    cfg.resilience().validate()?;

    let services = cfg.service_list();
    if services.is_empty() {
        return Err("No services configured (set `services` or pass --services)".into());
    }
    if services.iter().any(|s| s.trim().is_empty()) {
        return Err("Service names must not be empty".into());
    }

    if !cfg.is_synthetic() {
        let url = cfg.backend_url.as_deref().unwrap_or_default();
        if url.is_empty() {
            return Err("backend_url must be set unless synthetic mode is enabled".into());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!(
                "Invalid backend_url '{}', expected an http:// or https:// URL",
                url
            )
            .into());
        }
    }

    if let Some(level) = cfg.log_level.as_deref() {
        match level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(format!("Invalid log_level '{}'", other).into());
            }
        }
    }

    Ok(())
}

/// Resolves configuration from CLI args, config file, and defaults.
/// This enforces precedence: CLI (if provided) > config file > default.
pub fn resolve_config(args: &Args) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref().and_then(|p| p.to_str()))?
    };

    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }

    // Only override port if the user supplied it on the CLI.
    if let Some(cli_port) = args.port {
        config.port = Some(cli_port);
    }

    if let Some(url) = &args.backend_url {
        config.backend_url = Some(url.clone());
    }

    // Parse comma-separated service names
    if let Some(services) = &args.services {
        config.services = Some(
            services
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }

    if args.synthetic {
        config.synthetic = Some(true);
    }

    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = Some(secs);
    }
    if let Some(secs) = args.cache_ttl {
        config.cache_ttl_secs = Some(secs);
    }
    if let Some(size) = args.batch_size {
        config.batch_size = Some(size);
    }

    Ok(config)
}

/// Enhanced configuration loading with multiple format support
pub fn load_config(path: Option<&str>) -> Result<Config, Box<dyn std::error::Error>> {
    let path = if let Some(p) = path {
        PathBuf::from(p)
    } else {
        // Try default locations
        let defaults = [
            "/etc/statuswatch/statuswatch.yaml",
            "/etc/statuswatch/statuswatch.yml",
            "/etc/statuswatch/statuswatch.json",
            "./statuswatch.yaml",
            "./statuswatch.yml",
            "./statuswatch.json",
        ];

        defaults
            .iter()
            .find(|p| Path::new(p).exists())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(""))
    };

    if !path.exists() || path.to_string_lossy().is_empty() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path)?;
    let config = parse_config(&content, path.extension().and_then(|s| s.to_str()))?;
    info!("Loaded configuration from: {}", path.display());
    Ok(config)
}

/// Parses config text by file extension, defaulting to YAML.
pub fn parse_config(
    content: &str,
    extension: Option<&str>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let config = match extension {
        Some("json") => serde_json::from_str(content)?,
        Some("toml") => toml::from_str(content)?,
        _ => serde_yaml::from_str(content)?,
    };
    Ok(config)
}

/// Renders configuration in requested format
pub fn render_config(
    config: &Config,
    format: &ConfigFormat,
) -> Result<String, Box<dyn std::error::Error>> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    Ok(output)
}

/// Shows configuration in requested format
pub fn show_config(
    config: &Config,
    format: ConfigFormat,
    user_config: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let output = render_config(config, &format)?;
    if user_config {
        println!("User configuration (effective values):");
    }
    println!("{output}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_services() -> Config {
        Config {
            services: Some(vec!["web".into(), "db".into()]),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_resilience_matches_library_defaults() {
        assert_eq!(Config::default().resilience(), ResilienceConfig::default());
    }

    #[test]
    fn test_unset_fields_fall_back_to_defaults() {
        let cfg: Config = serde_yaml::from_str("services: [web]\nbatch_size: 4\n").unwrap();
        let r = cfg.resilience();
        assert_eq!(r.batch_size, 4);
        assert_eq!(r.cache_ttl, settings::DEFAULT_CACHE_TTL);
        assert_eq!(r.max_retries, settings::DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn test_validate_requires_services() {
        assert!(validate_effective_config(&Config::default()).is_err());
        assert!(validate_effective_config(&with_services()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_backend_url() {
        let cfg = Config {
            backend_url: Some("ftp://metrics".into()),
            ..with_services()
        };
        assert!(validate_effective_config(&cfg).is_err());

        let synthetic = Config {
            synthetic: Some(true),
            ..cfg
        };
        assert!(validate_effective_config(&synthetic).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch_size() {
        let cfg = Config {
            batch_size: Some(0),
            ..with_services()
        };
        let err = validate_effective_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let args = Args {
            no_config: true,
            services: Some("web, db ,,cache".into()),
            batch_size: Some(3),
            cache_ttl: Some(5),
            synthetic: true,
            ..Default::default()
        };
        let cfg = resolve_config(&args).unwrap();
        assert_eq!(cfg.service_list(), vec!["web", "db", "cache"]);
        assert_eq!(cfg.batch_size, Some(3));
        assert_eq!(cfg.resilience().cache_ttl, Duration::from_secs(5));
        assert!(cfg.is_synthetic());
    }

    #[test]
    fn test_parse_json_and_toml() {
        let json = parse_config(r#"{"services": ["a"], "max_retries": 1}"#, Some("json")).unwrap();
        assert_eq!(json.max_retries, Some(1));

        let toml = parse_config("services = [\"a\"]\nretry_delay_ms = 250\n", Some("toml")).unwrap();
        assert_eq!(toml.resilience().retry_delay, Duration::from_millis(250));
    }
}
