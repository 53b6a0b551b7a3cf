/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! jq filter evaluation.
//!
//! Gate and summary expressions are ordinary jq programs, evaluated by
//! shelling out to the system `jq` with the webhook payload on stdin. Keeping
//! the real jq in the loop means the expressions operators paste in behave
//! exactly as they do in a shell one-liner.
//!
//! A failing evaluation (spawn failure, timeout, crash) is isolated to that
//! single event; the pipeline maps it to "dropped" or to summary fallback
//! and keeps going.

use hermod_utils::logging::prelude::*;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

/// Errors surfaced by a single jq evaluation.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The jq binary could not be spawned.
    #[error("failed to spawn jq: {0}")]
    SpawnFailed(#[from] std::io::Error),
    /// The evaluation exceeded the configured timeout.
    #[error("jq evaluation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Outcome of a jq evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// jq produced output worth keeping (trimmed).
    Produced(String),
    /// jq exited non-zero, or produced nothing, `false`, or `null`.
    Dropped,
}

/// Evaluates jq expressions against webhook payloads.
#[derive(Clone)]
pub struct FilterEngine {
    /// Path of the jq binary.
    jq_path: String,
    /// Per-evaluation wall-clock budget.
    timeout: Duration,
}

impl FilterEngine {
    /// Creates a new filter engine.
    ///
    /// # Arguments
    /// * `jq_path` - Path of the jq binary.
    /// * `timeout` - Per-evaluation timeout.
    pub fn new(jq_path: String, timeout: Duration) -> Self {
        Self { jq_path, timeout }
    }

    /// Evaluates an expression against a payload.
    ///
    /// # Arguments
    /// * `expr` - The jq program.
    /// * `payload` - The raw payload bytes, fed to jq on stdin.
    ///
    /// # Returns
    /// The produced output, `Dropped`, or an error when jq itself failed.
    pub async fn evaluate(&self, expr: &str, payload: &[u8]) -> Result<FilterOutcome, FilterError> {
        let mut child = Command::new(&self.jq_path)
            .arg("-c")
            .arg(expr)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed the payload and close stdin so jq sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            // A jq program that never reads its input can close the pipe
            // early; that is not an evaluation failure.
            let _ = stdin.write_all(payload).await;
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("jq evaluation exceeded {:?}, killing", self.timeout);
                return Err(FilterError::TimedOut(self.timeout));
            }
        };

        if !output.status.success() {
            debug!(
                "jq exited non-zero ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(FilterOutcome::Dropped);
        }

        let produced = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if produced.is_empty() || produced == "false" || produced == "null" {
            return Ok(FilterOutcome::Dropped);
        }

        Ok(FilterOutcome::Produced(produced))
    }
}
