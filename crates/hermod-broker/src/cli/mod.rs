pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
/// Hermod Broker CLI
///
/// This CLI provides commands to manage the Hermod webhook broker, including
/// serving the broker and maintaining the event audit log.
pub struct Cli {
    /// Path of an optional configuration file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Hermod broker server
    Serve,

    /// Delete audit-log events past the retention window
    PruneEvents {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<i64>,
    },
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}
