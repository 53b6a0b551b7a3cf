/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Hermod Logging Module
//!
//! A thin logging framework over the `log` facade shared by the Hermod
//! crates. The broker is a long-lived daemon whose output is read two ways:
//! by an operator tailing stderr (text format, one line per record with the
//! emitting module) and by log shippers (JSON format, one flat object per
//! line). Both formats come from the same logger; the format and level are
//! picked from the `[log]` section of the settings at startup, and the level
//! can be changed at runtime from any thread.
//!
//! ## Usage
//!
//! ```ignore
//! hermod_utils::logging::init_from_config(&settings.log).expect("Failed to initialize logging");
//!
//! use hermod_utils::logging::prelude::*;
//! info!("broker listening");
//! ```

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

pub use log::{debug, error, info, trace, warn};

static LOGGER: HermodLogger = HermodLogger;
static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(level_ordinal(LevelFilter::Info));
static JSON_FORMAT: AtomicBool = AtomicBool::new(false);
static INIT: OnceCell<()> = OnceCell::new();

/// Custom logger for the Hermod broker.
pub struct HermodLogger;

impl log::Log for HermodLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= level_from_ordinal(CURRENT_LEVEL.load(Ordering::Relaxed))
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if JSON_FORMAT.load(Ordering::Relaxed) {
            // One flat object per line; the source location is collapsed
            // into a single "file:line" field so shippers index one key.
            let location = match (record.file(), record.line()) {
                (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
                (Some(file), None) => Some(file.to_string()),
                _ => None,
            };
            let entry = serde_json::json!({
                "ts": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                "level": record.level().to_string().to_lowercase(),
                "target": record.target(),
                "msg": format!("{}", record.args()),
                "file": location,
            });
            eprintln!("{}", entry);
        } else {
            // Operator-facing text: timestamp, padded level, emitting module.
            eprintln!(
                "{} {:<5} {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

/// Initializes the Hermod logging system from the settings' log section.
///
/// # Arguments
/// * `log` - The `[log]` configuration section (level and format).
///
/// # Returns
/// * `Result<(), SetLoggerError>` - Success/failure of logger initialization
pub fn init_from_config(log: &crate::config::Log) -> Result<(), SetLoggerError> {
    init_with_format(&log.level, &log.format)
}

/// Initializes the Hermod logging system with the specified log level and
/// the default text format.
///
/// # Arguments
/// * `level` - String representation of the log level ("debug", "info", "warn", "error")
///
/// # Returns
/// * `Result<(), SetLoggerError>` - Success/failure of logger initialization
pub fn init(level: &str) -> Result<(), SetLoggerError> {
    init_with_format(level, "text")
}

/// Initializes the Hermod logging system with the specified log level and format.
///
/// Re-initialization is allowed and only adjusts the level and format.
///
/// # Arguments
/// * `level` - String representation of the log level ("debug", "info", "warn", "error")
/// * `format` - Log output format ("text" for human-readable, "json" for structured JSON)
///
/// # Returns
/// * `Result<(), SetLoggerError>` - Success/failure of logger initialization
pub fn init_with_format(level: &str, format: &str) -> Result<(), SetLoggerError> {
    let level_filter = parse_level(level);
    let use_json = format.eq_ignore_ascii_case("json");

    INIT.get_or_init(|| {
        log::set_logger(&LOGGER)
            .map(|()| log::set_max_level(LevelFilter::Trace))
            .expect("Failed to set logger");
    });

    JSON_FORMAT.store(use_json, Ordering::Relaxed);
    CURRENT_LEVEL.store(level_ordinal(level_filter), Ordering::Relaxed);
    log::set_max_level(level_filter);
    Ok(())
}

/// Updates the current log level.
///
/// # Arguments
///
/// * `level` - A string slice that holds the new desired log level.
///
/// # Returns
///
/// * `Ok(())` if the log level was successfully updated.
pub fn update_log_level(level: &str) -> Result<(), String> {
    let new_level = parse_level(level);
    CURRENT_LEVEL.store(level_ordinal(new_level), Ordering::Relaxed);
    log::set_max_level(new_level);
    Ok(())
}

/// Parses a level name, falling back to Info for anything unrecognized.
fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

const fn level_ordinal(level: LevelFilter) -> u8 {
    level as u8
}

fn level_from_ordinal(ordinal: u8) -> LevelFilter {
    match ordinal {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub mod prelude {
    pub use log::{debug, error, info, trace, warn};
}
