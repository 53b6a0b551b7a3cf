/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Hermod-Models
//!
//! Data structures and schema definitions for the Hermod webhook broker's
//! sqlite database: subscriptions, the event audit log, and the queued-event
//! retry buffer.

/// Declares the models module, which contains the data structures representing database tables.
pub mod models;

/// Declares the schema module, which contains the database schema definitions.
pub mod schema;
