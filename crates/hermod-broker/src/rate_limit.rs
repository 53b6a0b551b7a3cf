/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-IP fixed-window rate limiting.
//!
//! Admission is a counter per client IP: the first admission after a window
//! expires resets it, and a request is denied iff the post-increment count
//! exceeds the cap within the active window. A background tick evicts
//! entries whose window has lapsed so the map does not grow with one entry
//! per IP ever seen.

use axum::http::HeaderMap;
use hermod_utils::logging::prelude::*;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Interval of the eviction tick.
const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// One client's counter within the active window.
struct WindowCounter {
    /// When the active window started.
    started: Instant,
    /// Admissions recorded in the active window.
    count: u32,
}

/// Fixed-window rate limiter keyed by client IP.
#[derive(Clone)]
pub struct RateLimiter {
    /// Window length.
    window: Duration,
    /// Maximum admitted requests per window.
    max_requests: u32,
    /// Counter per client IP.
    entries: Arc<Mutex<HashMap<String, WindowCounter>>>,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    ///
    /// # Arguments
    /// * `window` - Fixed window length.
    /// * `max_requests` - Cap per window.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records one admission attempt for a client.
    ///
    /// # Arguments
    /// * `client_ip` - The resolved client address.
    ///
    /// # Returns
    /// `true` when the request is admitted, `false` when it is denied.
    pub fn check(&self, client_ip: &str) -> bool {
        let mut entries = self.entries.lock().expect("rate limiter lock poisoned");

        let counter = entries
            .entry(client_ip.to_string())
            .or_insert_with(|| WindowCounter {
                started: Instant::now(),
                count: 0,
            });

        if counter.started.elapsed() >= self.window {
            counter.started = Instant::now();
            counter.count = 0;
        }

        counter.count += 1;
        let admitted = counter.count <= self.max_requests;
        if !admitted {
            debug!(
                "Rate limit exceeded for {} ({} > {})",
                client_ip, counter.count, self.max_requests
            );
        }
        admitted
    }

    /// Starts the background eviction task.
    ///
    /// Every minute, entries whose window has expired are removed.
    pub fn start_eviction_task(&self) {
        let window = self.window;
        let entries = Arc::clone(&self.entries);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
            // The first tick fires immediately; skip it.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let mut entries = entries.lock().expect("rate limiter lock poisoned");
                let before = entries.len();
                entries.retain(|_, counter| counter.started.elapsed() < window);
                let evicted = before - entries.len();
                if evicted > 0 {
                    debug!("Evicted {} expired rate-limit entries", evicted);
                }
            }
        });
    }
}

/// Resolves the client IP for a request.
///
/// Resolution order: first `X-Forwarded-For` value, then `CF-Connecting-IP`,
/// then the socket peer address, then the literal "unknown".
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(cf) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        let cf = cf.trim();
        if !cf.is_empty() {
            return cf.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}
