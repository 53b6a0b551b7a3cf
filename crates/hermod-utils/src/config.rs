/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Hermod Config Module
//! This module provides a common configuration framework for our crates.
//!
//! # Variable Naming Convention
//!
//! - Struct fields use snake_case (e.g., `database`, `rate_limit`)
//! - Environment variables use SCREAMING_SNAKE_CASE and are prefixed with
//!   "HERMOD__" (e.g., `HERMOD__DATABASE__PATH`)
//! - Configuration file keys use snake_case (e.g., `database.path`)
//!
//! # Configuration Overriding
//!
//! Values are loaded and overridden in the following order (later sources
//! take precedence):
//!
//! 1. Default values from the embedded `default.toml` file
//! 2. Values from an optional external configuration file (if provided)
//! 3. Environment variables
//!
//! To override a configuration value:
//! - In a configuration file: use the appropriate key (e.g., `server.port = 9000`)
//! - Using environment variables: set the variable with the "HERMOD__" prefix
//!   and "__" as separators (e.g., `HERMOD__SERVER__PORT=9000`)

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

// Include the default settings file as a string constant
const DEFAULT_SETTINGS: &str = include_str!("../default.toml");

/// Represents the main settings structure for the application
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Database configuration
    pub database: Database,
    /// Ingress HTTP server configuration
    pub server: Server,
    /// Session socket discovery configuration
    pub sessions: Sessions,
    /// jq filter evaluation configuration
    pub filter: Filter,
    /// Session injection configuration
    pub injector: Injector,
    /// Per-IP rate limiting configuration
    pub rate_limit: RateLimit,
    /// Tunnel subprocess configuration
    pub tunnel: Tunnel,
    /// Event log retention configuration
    pub events: Events,
    /// Logging configuration
    pub log: Log,
}

/// Represents the database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    /// Path of the sqlite database file
    pub path: String,
}

/// Represents the ingress HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    /// Server name reported by the health endpoint
    pub name: String,
    /// Bind address; loopback unless an operator deliberately overrides it
    pub bind: String,
    /// Listen port
    pub port: u16,
    /// Maximum accepted request body size in bytes
    pub max_body_bytes: usize,
}

/// Represents the session socket discovery configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Sessions {
    /// Directory scanned for `{session_id}.sock` files
    pub dir: String,
    /// Polling fallback interval in seconds
    pub poll_interval_seconds: u64,
}

/// Represents the jq filter evaluation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Filter {
    /// Path of the jq binary
    pub jq_path: String,
    /// Per-evaluation timeout in seconds
    pub timeout_seconds: u64,
}

/// Represents the session injection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Injector {
    /// Connect/send timeout in seconds
    pub timeout_seconds: u64,
    /// Attempts made by the retrying helper
    pub max_attempts: u32,
    /// Sleep between retry attempts in seconds
    pub backoff_seconds: u64,
}

/// Represents the per-IP rate limiting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    /// Fixed window length in seconds
    pub window_seconds: u64,
    /// Maximum admitted requests per window
    pub max_requests: u32,
}

/// Represents the tunnel subprocess configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Tunnel {
    /// Explicit path of the cloudflared binary; resolved at runtime when unset
    pub binary_path: Option<String>,
    /// Path of the prepared cloudflared config file; defaults to
    /// `$HOME/.config/cloudflared/config.yml` when unset
    pub config_path: Option<String>,
    /// Directory the downloaded binary is installed under; defaults to the
    /// application-support directory when unset
    pub install_dir: Option<String>,
    /// Interval between public-URL health checks in seconds
    pub health_interval_seconds: u64,
}

/// Represents the event log retention configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Events {
    /// Events older than this many days are pruned by the retention sweep
    pub retention_days: i64,
    /// Interval between retention sweeps in seconds
    pub sweep_interval_seconds: u64,
}

/// Represents the logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,
    /// Log output format ("text" or "json")
    pub format: String,
}

impl Settings {
    /// Creates a new `Settings` instance
    ///
    /// # Arguments
    ///
    /// * `file` - An optional path to a configuration file
    ///
    /// # Returns
    ///
    /// Returns a `Result` containing the `Settings` instance or a `ConfigError`
    pub fn new(file: Option<String>) -> Result<Self, ConfigError> {
        // Start with default settings from the embedded TOML file
        let mut s = Config::builder()
            .add_source(File::from_str(DEFAULT_SETTINGS, config::FileFormat::Toml));

        // If a configuration file is provided, add it as a source
        s = match file {
            Some(x) => s.add_source(File::with_name(x.as_str())),
            None => s,
        };

        // Add environment variables as a source, prefixed with "HERMOD" and using "__" as a separator
        s = s.add_source(Environment::with_prefix("HERMOD").separator("__"));

        // Build the configuration
        let settings = s.build()?;

        // Deserialize the configuration into a Settings instance
        settings.try_deserialize()
    }
}
