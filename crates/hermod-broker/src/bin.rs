/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Hermod broker CLI application
//!
//! This module provides the command-line interface for the Hermod webhook
//! broker. It includes functionality for serving the broker and maintaining
//! the event audit log.

use hermod_broker::cli::{parse_cli, Commands};

use hermod_broker::cli::commands;
use hermod_utils::config::Settings;

/// Main function to run the Hermod broker application
///
/// This function initializes the application, parses command-line arguments,
/// and executes the appropriate command based on user input.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_cli();

    // Load configuration
    let config = Settings::new(cli.config.clone()).expect("Failed to load configuration");

    // Initialize logging
    hermod_utils::logging::init_from_config(&config.log).expect("Failed to initialize logging");

    // Execute the appropriate command
    match cli.command {
        Commands::Serve => commands::serve(&config).await?,
        Commands::PruneEvents { days } => commands::prune_events(&config, days)?,
    }

    Ok(())
}
