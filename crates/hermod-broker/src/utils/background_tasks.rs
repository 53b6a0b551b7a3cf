/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Background tasks for the Hermod broker.
//!
//! This module contains background tasks that run periodically to maintain
//! system health and clean up expired data.

use crate::dal::DAL;
use chrono::Utc;
use hermod_utils::logging::prelude::*;
use std::time::Duration;
use tokio::time::interval;

/// Configuration for the event retention sweep.
pub struct EventRetentionConfig {
    /// How often to run the sweep (in seconds).
    pub interval_seconds: u64,
    /// Events older than this many days are deleted.
    pub retention_days: i64,
}

impl Default for EventRetentionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            retention_days: 30,
        }
    }
}

/// Starts the event retention sweep background task.
///
/// The audit log grows with every accepted or rejected delivery; this task
/// periodically deletes events past the retention window.
///
/// # Arguments
/// * `dal` - The Data Access Layer instance
/// * `config` - Configuration for the sweep
pub fn start_event_retention_task(dal: DAL, config: EventRetentionConfig) {
    info!(
        "Starting event retention sweep (interval: {}s, retention: {}d)",
        config.interval_seconds, config.retention_days
    );

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(config.interval_seconds));

        loop {
            ticker.tick().await;

            let cutoff = Utc::now() - chrono::Duration::days(config.retention_days);
            match dal.events().prune_older_than(cutoff) {
                Ok(pruned) => {
                    if pruned > 0 {
                        info!(
                            "Pruned {} event(s) older than {} day(s)",
                            pruned, config.retention_days
                        );
                    }
                }
                Err(e) => {
                    error!("Failed to prune old events: {:?}", e);
                }
            }
        }
    });
}
