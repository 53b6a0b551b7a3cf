/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Utility functions and structures for the Hermod broker.

use hermod_utils::logging::prelude::*;
use std::path::PathBuf;
use tokio::sync::oneshot;

pub mod background_tasks;
pub mod event_bus;

/// Handles the shutdown process for the broker.
///
/// This function waits for a shutdown signal; the server drains in-flight
/// requests once it resolves.
pub async fn shutdown(shutdown_rx: oneshot::Receiver<()>) {
    let _ = shutdown_rx.await;
    info!("Shutdown signal received, draining");
}

/// Returns the application-support directory used for the database and the
/// downloaded tunnel binary.
pub fn app_support_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local/share/hermod"),
        Err(_) => PathBuf::from("/tmp/hermod"),
    }
}
