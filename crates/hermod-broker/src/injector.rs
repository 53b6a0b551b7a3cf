/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Framed message delivery to local session sockets.
//!
//! A session is a local agent process listening on
//! `{sessions_dir}/{session_id}.sock`. The wire contract is newline-delimited
//! JSON: the broker writes exactly one line of the form
//! `{"value": <string>, "mode": "prompt"}` followed by `\n` and closes its
//! side. serde_json escapes embedded newlines, so the frame is always a
//! single line on the socket.

use hermod_utils::logging::prelude::*;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::timeout;

/// Size of sun_path on the target platform, including the null terminator.
const MAX_SOCKET_PATH_BYTES: usize = 104;

/// Errors surfaced by a single injection attempt.
#[derive(Debug, Error)]
pub enum InjectorError {
    /// The OS refused to hand out a socket descriptor.
    #[error("failed to create socket: {0}")]
    SocketCreateFailed(io::Error),
    /// The socket file exists but the connect failed or timed out.
    #[error("failed to connect to session socket: {0}")]
    ConnectFailed(io::Error),
    /// The socket path does not fit in sun_path.
    #[error("socket path is {0} bytes, exceeding the {MAX_SOCKET_PATH_BYTES}-byte limit")]
    PathTooLong(usize),
    /// The connection was established but the frame could not be written.
    #[error("failed to send framed message: {0}")]
    SendFailed(io::Error),
}

/// Delivers framed messages to session sockets.
#[derive(Clone)]
pub struct Injector {
    /// Directory holding the `{session_id}.sock` files.
    sessions_dir: PathBuf,
    /// Connect/send budget per attempt.
    timeout: Duration,
    /// Attempts made by `inject_with_retry`.
    max_attempts: u32,
    /// Sleep between retry attempts.
    backoff: Duration,
}

impl Injector {
    /// Creates a new injector.
    ///
    /// # Arguments
    /// * `sessions_dir` - Directory holding the session sockets.
    /// * `timeout` - Connect/send budget per attempt.
    /// * `max_attempts` - Attempts made by the retrying helper.
    /// * `backoff` - Sleep between retry attempts.
    pub fn new(
        sessions_dir: PathBuf,
        timeout: Duration,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        Self {
            sessions_dir,
            timeout,
            max_attempts,
            backoff,
        }
    }

    /// Returns the socket path for a session.
    pub fn socket_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.sock", session_id))
    }

    /// Delivers one framed message to one session.
    ///
    /// # Arguments
    /// * `session_id` - The target session.
    /// * `content` - The framed text; embedded newlines are escaped into the
    ///   JSON string.
    ///
    /// # Returns
    /// `Ok(true)` when the whole frame was written, `Ok(false)` when no
    /// socket file exists for the session, and an error for OS-level
    /// failures.
    pub async fn inject(&self, session_id: &str, content: &str) -> Result<bool, InjectorError> {
        let path = self.socket_path(session_id);

        let path_bytes = path.as_os_str().as_bytes().len();
        if path_bytes + 1 > MAX_SOCKET_PATH_BYTES {
            return Err(InjectorError::PathTooLong(path_bytes));
        }

        if !path.exists() {
            debug!("No socket present for session {}", session_id);
            return Ok(false);
        }

        let mut stream = self.connect(&path).await?;

        let frame = format!(
            "{}\n",
            serde_json::json!({ "value": content, "mode": "prompt" })
        );

        match timeout(self.timeout, stream.write_all(frame.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(InjectorError::SendFailed(e)),
            Err(_) => {
                return Err(InjectorError::SendFailed(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "send timed out",
                )))
            }
        }

        // Half-close so the session sees EOF after the single line; a failure
        // here does not undo the completed send.
        let _ = stream.shutdown().await;

        debug!(
            "Injected {} bytes into session {}",
            frame.len(),
            session_id
        );
        Ok(true)
    }

    /// Delivers one framed message, retrying on any failure.
    ///
    /// Never returns an error: after `max_attempts` failed attempts it
    /// reports `false`.
    ///
    /// # Arguments
    /// * `session_id` - The target session.
    /// * `content` - The framed text.
    pub async fn inject_with_retry(&self, session_id: &str, content: &str) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.inject(session_id, content).await {
                Ok(true) => return true,
                Ok(false) => {
                    debug!(
                        "Injection attempt {}/{} found no socket for session {}",
                        attempt, self.max_attempts, session_id
                    );
                }
                Err(e) => {
                    warn!(
                        "Injection attempt {}/{} failed for session {}: {}",
                        attempt, self.max_attempts, session_id, e
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }

        false
    }

    async fn connect(&self, path: &Path) -> Result<UnixStream, InjectorError> {
        match timeout(self.timeout, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => {
                // Descriptor exhaustion is a socket-creation failure, not a
                // peer problem.
                if matches!(
                    e.raw_os_error(),
                    Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
                ) {
                    Err(InjectorError::SocketCreateFailed(e))
                } else {
                    Err(InjectorError::ConnectFailed(e))
                }
            }
            Err(_) => Err(InjectorError::ConnectFailed(io::Error::new(
                io::ErrorKind::TimedOut,
                "connect timed out",
            ))),
        }
    }
}
