/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Tunnel subprocess supervision.
//!
//! The broker binds loopback only; an external cloudflared child exposes the
//! ingest port to the public internet. The supervisor locates (or downloads)
//! the binary, spawns and monitors the child, discovers the public URL from
//! its config file or its output, and walks the state machine
//! `Inactive -> Starting -> Active -> (Error -> Starting)* -> Inactive`.
//!
//! A child that dies while the tunnel is supposed to be up is restarted
//! after a short backoff. `stop` flips the state to Inactive before
//! signalling the child, so the exit handler knows not to restart it.

use crate::utils::event_bus::{BrokerEvent, EventBus};
use hermod_utils::config::Tunnel as TunnelSettings;
use hermod_utils::logging::prelude::*;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Wait after spawning a named tunnel before declaring it active.
const NAMED_GRACE: Duration = Duration::from_secs(5);
/// How long a quick tunnel may take to announce its URL.
const QUICK_URL_TIMEOUT: Duration = Duration::from_secs(30);
/// Backoff before restarting a crashed child.
const RESTART_BACKOFF: Duration = Duration::from_secs(2);
/// Grace between SIGTERM and SIGKILL on stop.
const STOP_DRAIN: Duration = Duration::from_secs(5);
/// Consecutive health-check failures that force a restart.
const HEALTH_FAILURE_LIMIT: u32 = 3;

/// Release download location for the cloudflared binary.
const RELEASE_BASE_URL: &str =
    "https://github.com/cloudflare/cloudflared/releases/latest/download";

/// Supervisor states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Inactive,
    Starting,
    Active,
    Error,
}

impl TunnelState {
    /// The wire representation used in tool results and notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelState::Inactive => "inactive",
            TunnelState::Starting => "starting",
            TunnelState::Active => "active",
            TunnelState::Error => "error",
        }
    }
}

/// Tunnel operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMode {
    /// Runs against a prepared cloudflared config file.
    Named,
    /// Ephemeral trycloudflare.com tunnel, no config needed.
    Quick,
}

/// A snapshot of the supervisor's state.
#[derive(Debug, Clone)]
pub struct TunnelStatus {
    pub state: TunnelState,
    pub public_url: Option<String>,
}

/// Errors surfaced by supervisor operations.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel is already running")]
    AlreadyRunning,
    #[error("cloudflared binary not found: {0}")]
    BinaryUnavailable(String),
    #[error("failed to spawn cloudflared: {0}")]
    SpawnFailed(#[from] std::io::Error),
    #[error("tunnel config {0} is unreadable: {1}")]
    ConfigUnreadable(String, String),
    #[error("cloudflared exited during startup")]
    ChildExited,
    #[error("no public URL appeared within {0:?}")]
    StartTimeout(Duration),
}

struct StateData {
    state: TunnelState,
    mode: Option<TunnelMode>,
    public_url: Option<String>,
    child_pid: Option<u32>,
    /// Bumped on every start/stop; tasks carrying an older generation are
    /// observing a child that no longer matters.
    generation: u64,
    health_failures: u32,
}

struct Inner {
    settings: TunnelSettings,
    local_port: u16,
    event_bus: EventBus,
    http: reqwest::Client,
    state: Mutex<StateData>,
}

/// Supervises the cloudflared child process.
#[derive(Clone)]
pub struct TunnelSupervisor {
    inner: Arc<Inner>,
}

impl TunnelSupervisor {
    /// Creates a new supervisor and starts its health-check loop.
    ///
    /// # Arguments
    /// * `settings` - Tunnel configuration section.
    /// * `local_port` - The ingest port the tunnel forwards to.
    /// * `event_bus` - Bus state transitions are published on.
    pub fn new(settings: TunnelSettings, local_port: u16, event_bus: EventBus) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let supervisor = Self {
            inner: Arc::new(Inner {
                settings,
                local_port,
                event_bus,
                http,
                state: Mutex::new(StateData {
                    state: TunnelState::Inactive,
                    mode: None,
                    public_url: None,
                    child_pid: None,
                    generation: 0,
                    health_failures: 0,
                }),
            }),
        };

        supervisor.start_health_loop();
        supervisor
    }

    /// Returns a snapshot of the supervisor's state.
    pub async fn status(&self) -> TunnelStatus {
        let st = self.inner.state.lock().await;
        TunnelStatus {
            state: st.state,
            public_url: st.public_url.clone(),
        }
    }

    /// Returns the public URL when the tunnel knows one.
    pub async fn public_url(&self) -> Option<String> {
        self.inner.state.lock().await.public_url.clone()
    }

    /// Starts the tunnel in the given mode.
    ///
    /// Moves Inactive (or Error) to Starting, spawns the child, and waits
    /// for it to become Active: a named tunnel gets a fixed grace period, a
    /// quick tunnel is active as soon as its URL shows up in the output.
    ///
    /// # Arguments
    /// * `mode` - Named or Quick.
    pub async fn start(&self, mode: TunnelMode) -> Result<TunnelStatus, TunnelError> {
        let generation = {
            let mut st = self.inner.state.lock().await;
            if matches!(st.state, TunnelState::Starting | TunnelState::Active) {
                return Err(TunnelError::AlreadyRunning);
            }
            st.generation += 1;
            st.mode = Some(mode);
            st.health_failures = 0;
            st.child_pid = None;
            if mode == TunnelMode::Quick {
                st.public_url = None;
            }
            self.transition(&mut st, TunnelState::Starting);
            st.generation
        };

        // Named mode can learn its URL before the child even starts.
        let config_url = if mode == TunnelMode::Named {
            match self.named_config_url() {
                Ok(url) => url,
                Err(e) => {
                    self.fail(generation).await;
                    return Err(e);
                }
            }
        } else {
            None
        };
        if let Some(url) = &config_url {
            let mut st = self.inner.state.lock().await;
            if st.generation == generation {
                st.public_url = Some(url.clone());
            }
        }

        let binary = match self.resolve_binary().await {
            Ok(binary) => binary,
            Err(e) => {
                self.fail(generation).await;
                return Err(e);
            }
        };

        let mut command = Command::new(&binary);
        match mode {
            TunnelMode::Named => {
                if let Some(config) = &self.inner.settings.config_path {
                    command.args(["--config", config]);
                }
                command.args(["tunnel", "run"]);
            }
            TunnelMode::Quick => {
                command.args([
                    "tunnel",
                    "--url",
                    &format!("http://127.0.0.1:{}", self.inner.local_port),
                ]);
            }
        }

        let mut child = match command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.fail(generation).await;
                return Err(TunnelError::SpawnFailed(e));
            }
        };

        {
            let mut st = self.inner.state.lock().await;
            st.child_pid = child.id();
        }
        info!(
            "Spawned cloudflared ({:?} mode, pid {:?})",
            mode,
            child.id()
        );

        // Output scanners discover URLs; the monitor owns the child and
        // handles its exit.
        if let Some(stdout) = child.stdout.take() {
            self.spawn_output_scanner(stdout, generation);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_output_scanner(stderr, generation);
        }
        self.spawn_monitor(child, mode, generation);

        match mode {
            TunnelMode::Named => {
                tokio::time::sleep(NAMED_GRACE).await;

                let mut st = self.inner.state.lock().await;
                if st.generation != generation {
                    return Err(TunnelError::ChildExited);
                }
                match st.state {
                    TunnelState::Starting => {
                        self.transition(&mut st, TunnelState::Active);
                        Ok(TunnelStatus {
                            state: st.state,
                            public_url: st.public_url.clone(),
                        })
                    }
                    _ => Err(TunnelError::ChildExited),
                }
            }
            TunnelMode::Quick => {
                let deadline = tokio::time::Instant::now() + QUICK_URL_TIMEOUT;
                loop {
                    tokio::time::sleep(Duration::from_millis(100)).await;

                    let mut st = self.inner.state.lock().await;
                    if st.generation != generation {
                        return Err(TunnelError::ChildExited);
                    }
                    match st.state {
                        TunnelState::Active => {
                            return Ok(TunnelStatus {
                                state: st.state,
                                public_url: st.public_url.clone(),
                            });
                        }
                        TunnelState::Starting => {
                            if tokio::time::Instant::now() >= deadline {
                                let pid = st.child_pid.take();
                                self.transition(&mut st, TunnelState::Error);
                                drop(st);
                                if let Some(pid) = pid {
                                    signal(pid, libc::SIGTERM);
                                }
                                return Err(TunnelError::StartTimeout(QUICK_URL_TIMEOUT));
                            }
                        }
                        _ => return Err(TunnelError::ChildExited),
                    }
                }
            }
        }
    }

    /// Stops the tunnel.
    ///
    /// The state flips to Inactive first so the child-exit handler does not
    /// schedule a restart; then the child gets SIGTERM, and SIGKILL if it is
    /// still around after the drain period.
    pub async fn stop(&self) -> TunnelStatus {
        let pid = {
            let mut st = self.inner.state.lock().await;
            st.generation += 1;
            st.mode = None;
            st.public_url = None;
            st.health_failures = 0;
            let pid = st.child_pid.take();
            self.transition(&mut st, TunnelState::Inactive);
            pid
        };

        if let Some(pid) = pid {
            info!("Stopping cloudflared (pid {})", pid);
            signal(pid, libc::SIGTERM);

            tokio::spawn(async move {
                tokio::time::sleep(STOP_DRAIN).await;
                if process_alive(pid) {
                    warn!("cloudflared (pid {}) survived SIGTERM, sending SIGKILL", pid);
                    signal(pid, libc::SIGKILL);
                }
            });
        }

        self.status().await
    }

    /// Walks the state to Error for a start attempt that failed before the
    /// monitor took over.
    async fn fail(&self, generation: u64) {
        let mut st = self.inner.state.lock().await;
        if st.generation == generation {
            self.transition(&mut st, TunnelState::Error);
        }
    }

    /// Records a transition and publishes it.
    fn transition(&self, st: &mut StateData, new_state: TunnelState) {
        if st.state != new_state {
            info!("Tunnel state: {} -> {}", st.state.as_str(), new_state.as_str());
        }
        st.state = new_state;
        self.inner.event_bus.emit(BrokerEvent::TunnelChanged {
            status: new_state.as_str().to_string(),
            public_url: st.public_url.clone(),
        });
    }

    /// Spawns the task that owns the child and reacts to its exit.
    fn spawn_monitor(&self, mut child: tokio::process::Child, mode: TunnelMode, generation: u64) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            let exit = child.wait().await;
            debug!("cloudflared exited: {:?}", exit);

            let should_restart = {
                let mut st = supervisor.inner.state.lock().await;
                if st.generation != generation {
                    // A newer start or a stop owns the state now.
                    false
                } else if st.state == TunnelState::Inactive {
                    false
                } else {
                    st.child_pid = None;
                    supervisor.transition(&mut st, TunnelState::Error);
                    true
                }
            };

            if should_restart {
                warn!(
                    "cloudflared exited unexpectedly, restarting in {:?}",
                    RESTART_BACKOFF
                );
                tokio::time::sleep(RESTART_BACKOFF).await;

                let still_errored = {
                    let st = supervisor.inner.state.lock().await;
                    st.generation == generation && st.state == TunnelState::Error
                };
                if still_errored {
                    if let Err(e) = supervisor.start(mode).await {
                        error!("Tunnel restart failed: {}", e);
                    }
                }
            }
        });
    }

    /// Spawns a task scanning one output pipe for public URLs.
    fn spawn_output_scanner(
        &self,
        pipe: impl AsyncRead + Unpin + Send + 'static,
        generation: u64,
    ) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            let quick_url =
                Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com").expect("valid regex");
            let tunnel_uuid = Regex::new(
                r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            )
            .expect("valid regex");

            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("cloudflared: {}", line);

                let discovered = if let Some(m) = quick_url.find(&line) {
                    Some(m.as_str().to_string())
                } else {
                    tunnel_uuid
                        .find(&line)
                        .map(|m| format!("https://{}.cfargotunnel.com", m.as_str()))
                };

                if let Some(url) = discovered {
                    let mut st = supervisor.inner.state.lock().await;
                    if st.generation != generation {
                        return;
                    }
                    if st.public_url.is_none() {
                        info!("Tunnel public URL: {}", url);
                        st.public_url = Some(url);
                    }
                    // A quick tunnel is up the moment its URL is announced.
                    if st.mode == Some(TunnelMode::Quick) && st.state == TunnelState::Starting {
                        supervisor.transition(&mut st, TunnelState::Active);
                    }
                }
            }
        });
    }

    /// Starts the loop probing the public URL while the tunnel is active.
    fn start_health_loop(&self) {
        let supervisor = self.clone();
        let interval = Duration::from_secs(self.inner.settings.health_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let (url, generation) = {
                    let st = supervisor.inner.state.lock().await;
                    match (&st.state, &st.public_url) {
                        (TunnelState::Active, Some(url)) => (url.clone(), st.generation),
                        _ => continue,
                    }
                };

                let healthy = supervisor.inner.http.get(&url).send().await.is_ok();

                let mut st = supervisor.inner.state.lock().await;
                if st.generation != generation || st.state != TunnelState::Active {
                    continue;
                }

                if healthy {
                    st.health_failures = 0;
                    continue;
                }

                st.health_failures += 1;
                warn!(
                    "Tunnel health check failed ({}/{})",
                    st.health_failures, HEALTH_FAILURE_LIMIT
                );

                if st.health_failures >= HEALTH_FAILURE_LIMIT {
                    // Kill the child; the exit handler walks Error -> Starting.
                    let pid = st.child_pid;
                    st.health_failures = 0;
                    drop(st);
                    if let Some(pid) = pid {
                        warn!("Forcing tunnel restart after failed health checks");
                        signal(pid, libc::SIGTERM);
                    }
                }
            }
        });
    }

    /// Extracts the public URL from the named-tunnel config file.
    ///
    /// Only the `hostname:` field is read; everything else in the file
    /// belongs to cloudflared.
    fn named_config_url(&self) -> Result<Option<String>, TunnelError> {
        let path = match &self.inner.settings.config_path {
            Some(path) => PathBuf::from(path),
            None => default_cloudflared_config(),
        };
        let display = path.display().to_string();

        let text = std::fs::read_to_string(&path)
            .map_err(|e| TunnelError::ConfigUnreadable(display.clone(), e.to_string()))?;
        let doc: serde_yaml::Value = serde_yaml::from_str(&text)
            .map_err(|e| TunnelError::ConfigUnreadable(display, e.to_string()))?;

        Ok(doc
            .get("hostname")
            .and_then(|v| v.as_str())
            .map(|hostname| format!("https://{}", hostname)))
    }

    /// Locates the cloudflared binary, downloading it as a last resort.
    ///
    /// Lookup order: configured path, the install directory, well-known
    /// system paths, `$PATH`.
    async fn resolve_binary(&self) -> Result<PathBuf, TunnelError> {
        if let Some(configured) = &self.inner.settings.binary_path {
            let path = PathBuf::from(configured);
            if path.exists() {
                return Ok(path);
            }
            return Err(TunnelError::BinaryUnavailable(format!(
                "configured path {} does not exist",
                configured
            )));
        }

        let installed = self.install_dir().join("bin").join("cloudflared");
        if installed.exists() {
            return Ok(installed);
        }

        for candidate in ["/usr/local/bin/cloudflared", "/opt/homebrew/bin/cloudflared"] {
            let path = PathBuf::from(candidate);
            if path.exists() {
                return Ok(path);
            }
        }

        if let Some(path_var) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&path_var) {
                let candidate = dir.join("cloudflared");
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        self.download_binary(&installed).await?;
        Ok(installed)
    }

    /// Downloads the platform release of cloudflared into the install dir.
    async fn download_binary(&self, dest: &std::path::Path) -> Result<(), TunnelError> {
        let arch = if cfg!(target_arch = "aarch64") {
            "arm64"
        } else {
            "amd64"
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
        }

        let fetch = |url: String| {
            let http = self.inner.http.clone();
            async move {
                let response = http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(TunnelError::BinaryUnavailable(format!(
                        "download of {} returned {}",
                        url,
                        response.status()
                    )));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))
            }
        };

        if cfg!(target_os = "macos") {
            let url = format!("{}/cloudflared-darwin-{}.tgz", RELEASE_BASE_URL, arch);
            info!("Downloading cloudflared from {}", url);
            let bytes = fetch(url).await?;

            let decoder = flate2::read::GzDecoder::new(&bytes[..]);
            let mut archive = tar::Archive::new(decoder);
            let mut extracted = false;
            for entry in archive
                .entries()
                .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?
            {
                let mut entry =
                    entry.map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
                let is_binary = entry
                    .path()
                    .map(|p| p.file_name() == Some(std::ffi::OsStr::new("cloudflared")))
                    .unwrap_or(false);
                if is_binary {
                    entry
                        .unpack(dest)
                        .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
                    extracted = true;
                    break;
                }
            }
            if !extracted {
                return Err(TunnelError::BinaryUnavailable(
                    "archive did not contain a cloudflared binary".to_string(),
                ));
            }
        } else {
            let url = format!("{}/cloudflared-linux-{}", RELEASE_BASE_URL, arch);
            info!("Downloading cloudflared from {}", url);
            let bytes = fetch(url).await?;
            std::fs::write(dest, &bytes)
                .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;
        }

        let mut perms = std::fs::metadata(dest)
            .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?
            .permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(dest, perms)
            .map_err(|e| TunnelError::BinaryUnavailable(e.to_string()))?;

        Ok(())
    }

    fn install_dir(&self) -> PathBuf {
        match &self.inner.settings.install_dir {
            Some(dir) => PathBuf::from(dir),
            None => crate::utils::app_support_dir(),
        }
    }
}

/// The conventional cloudflared config location.
fn default_cloudflared_config() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
    PathBuf::from(home).join(".config/cloudflared/config.yml")
}

/// Sends a signal to a process, ignoring failures (the process may already
/// be gone).
fn signal(pid: u32, sig: libc::c_int) {
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

/// Returns whether a process still exists.
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}
