//! CLI arguments and subcommands for statuswatch.
//!
//! This module defines the command-line interface structure using the clap library,
//! including all flags, options, and subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

/// Log level options for CLI parsing
#[derive(Debug, Clone, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Main CLI arguments structure
#[derive(Parser, Debug, Default)]
#[command(
    name = "statuswatch",
    about = "Resilient infrastructure-status poller with a small HTTP status surface",
    long_about = "Resilient infrastructure-status poller.\n\n\
                  Polls a monitoring backend for cpu/memory/uptime of many services, \
                  caching, coalescing and pacing upstream calls, and serves the latest \
                  snapshot as JSON, a health report and Prometheus metrics.",
    version,
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level [default: info, or `log_level` from the config file]
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config [default: yaml]
    #[arg(long, value_enum)]
    pub config_format: Option<ConfigFormat>,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Base URL of the monitoring backend
    #[arg(short = 'b', long)]
    pub backend_url: Option<String>,

    /// Services to monitor (comma-separated)
    #[arg(short = 's', long)]
    pub services: Option<String>,

    /// Use random synthetic metrics instead of a backend
    #[arg(long)]
    pub synthetic: bool,

    /// Seconds between poll cycles
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Seconds a cached service result stays fresh
    #[arg(long)]
    pub cache_ttl: Option<u64>,

    /// Services fetched concurrently per group
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate configuration files
    Config {
        /// Output file path ("-" for stdout)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Run a single poll cycle and print the snapshot
    Once {
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,
    },
}
