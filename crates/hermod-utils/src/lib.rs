/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Hermod-Utils
//!
//! Shared configuration and logging frameworks for the Hermod crates.

pub mod config;
pub mod logging;

pub use config::Settings;
pub use logging::HermodLogger;
