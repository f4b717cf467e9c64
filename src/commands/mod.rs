//! CLI command implementations for statuswatch.
//!
//! This module provides implementations for all CLI subcommands:
//! - `config`: Configuration file generation
//! - `once`: Single poll cycle

pub mod config;
pub mod once;

// Re-export command functions
pub use config::command_config;
pub use once::command_once;
