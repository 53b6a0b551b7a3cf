/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Session discovery by watching the socket directory.
//!
//! A session is live iff `{session_id}.sock` exists in the watched directory
//! AND a connect probe succeeds — a leftover socket file from a dead process
//! is not a session. The watcher prefers filesystem notifications (via
//! `notify`) and runs a polling sweep as both a fallback and a liveness
//! recheck, since a process can die without touching the directory.

use hermod_utils::logging::prelude::*;
use notify::{RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Budget for a single connect probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Watches a directory of session sockets and tracks which are live.
#[derive(Clone)]
pub struct SessionWatch {
    /// The watched directory.
    dir: PathBuf,
    /// The current live set.
    live: Arc<RwLock<HashSet<String>>>,
}

impl SessionWatch {
    /// Starts watching a session directory.
    ///
    /// Spawns the watch task and returns the handle plus the channel on which
    /// newly appeared session IDs are announced (the pipeline drains queued
    /// events on these announcements).
    ///
    /// # Arguments
    /// * `dir` - Directory scanned for `{session_id}.sock` files; created
    ///   when absent.
    /// * `poll_interval` - Interval of the polling sweep.
    pub fn start(dir: PathBuf, poll_interval: Duration) -> (Self, mpsc::Receiver<String>) {
        let watch = Self {
            dir: dir.clone(),
            live: Arc::new(RwLock::new(HashSet::new())),
        };

        let (appeared_tx, appeared_rx) = mpsc::channel(64);
        let task_watch = watch.clone();

        tokio::spawn(async move {
            task_watch.run(poll_interval, appeared_tx).await;
        });

        (watch, appeared_rx)
    }

    /// Returns whether a session is currently live.
    pub fn is_live(&self, session_id: &str) -> bool {
        self.live
            .read()
            .expect("live set lock poisoned")
            .contains(session_id)
    }

    /// Returns a snapshot of the live session IDs.
    pub fn live_set(&self) -> HashSet<String> {
        self.live.read().expect("live set lock poisoned").clone()
    }

    async fn run(self, poll_interval: Duration, appeared_tx: mpsc::Sender<String>) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!(
                "Failed to create session directory {}: {}",
                self.dir.display(),
                e
            );
        }

        // Filesystem events wake the scan early; the interval sweep is the
        // fallback and the liveness recheck.
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let _watcher = match notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if res.is_ok() {
                let _ = wake_tx.send(());
            }
        }) {
            Ok(mut watcher) => match watcher.watch(&self.dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    info!("Session watcher started for {}", self.dir.display());
                    Some(watcher)
                }
                Err(e) => {
                    warn!(
                        "Falling back to polling only, failed to watch {}: {}",
                        self.dir.display(),
                        e
                    );
                    None
                }
            },
            Err(e) => {
                warn!("Falling back to polling only, notify unavailable: {}", e);
                None
            }
        };

        let mut ticker = tokio::time::interval(poll_interval);
        let mut watcher_alive = _watcher.is_some();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                received = wake_rx.recv(), if watcher_alive => {
                    if received.is_none() {
                        // Watcher thread is gone; the ticker keeps us going.
                        watcher_alive = false;
                    }
                }
            }

            self.rescan(&appeared_tx).await;
        }
    }

    /// Rescans the directory, probing every socket file, and updates the
    /// live set. Newly live sessions are announced on `appeared_tx`.
    async fn rescan(&self, appeared_tx: &mpsc::Sender<String>) {
        let mut current = HashSet::new();

        for session_id in scan_socket_files(&self.dir) {
            if probe(&self.dir.join(format!("{}.sock", session_id))).await {
                current.insert(session_id);
            }
        }

        let previous = {
            let mut live = self.live.write().expect("live set lock poisoned");
            std::mem::replace(&mut *live, current.clone())
        };

        for session_id in current.difference(&previous) {
            info!("Session appeared: {}", session_id);
            if appeared_tx.send(session_id.clone()).await.is_err() {
                return;
            }
        }

        for session_id in previous.difference(&current) {
            info!("Session disappeared: {}", session_id);
        }
    }
}

/// Lists the session IDs that have a socket file in the directory.
fn scan_socket_files(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read session directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.strip_suffix(".sock").map(str::to_string)
        })
        .collect()
}

/// Probes a socket file with a short connect attempt.
async fn probe(path: &Path) -> bool {
    matches!(
        timeout(PROBE_TIMEOUT, UnixStream::connect(path)).await,
        Ok(Ok(_))
    )
}
