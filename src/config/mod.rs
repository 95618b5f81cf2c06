//! Configuration module
//!
//! Harness settings are read from an optional TOML file; command-line
//! flags override them.

mod settings;

pub use settings::{ConfigError, HarnessConfig, HttpSettings, LoggingSettings, SessionSettings};

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "harness.toml";
