/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Event bus for control-plane notifications.
//!
//! A single broadcast channel carries coarse change signals from the store
//! and state transitions from the tunnel supervisor. Subscribers (the SSE
//! fan-out, the queue drain, tests) hold receive handles; emitters fire and
//! forget. The store signal is deliberately coalescable: "something changed",
//! not a per-row delta.

use hermod_utils::logging::prelude::*;
use serde_json::Value;
use tokio::sync::broadcast;

/// Default broadcast buffer size. Slow subscribers past this lag are skipped.
const DEFAULT_CHANNEL_SIZE: usize = 256;

/// A notification carried on the bus.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// One or more subscriptions were created, updated, or deleted.
    SubscriptionsChanged,
    /// The tunnel supervisor moved to a new state.
    TunnelChanged {
        /// The state the supervisor is now in ("inactive", "starting", ...).
        status: String,
        /// The public URL, when one is known.
        public_url: Option<String>,
    },
}

impl BrokerEvent {
    /// The SSE event name for this notification.
    pub fn name(&self) -> &'static str {
        match self {
            BrokerEvent::SubscriptionsChanged => "subscriptions.changed",
            BrokerEvent::TunnelChanged { .. } => "tunnel.changed",
        }
    }

    /// The SSE data payload for this notification.
    pub fn data(&self) -> Value {
        match self {
            BrokerEvent::SubscriptionsChanged => serde_json::json!({ "changed": true }),
            BrokerEvent::TunnelChanged { status, public_url } => serde_json::json!({
                "status": status,
                "public_url": public_url,
            }),
        }
    }
}

/// The broadcast bus shared by the store, the supervisor, and the SSE layer.
#[derive(Clone)]
pub struct EventBus {
    /// Sender for emitting events.
    sender: broadcast::Sender<BrokerEvent>,
}

impl EventBus {
    /// Creates a new event bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_SIZE)
    }

    /// Creates a new event bus with a custom channel capacity.
    ///
    /// # Arguments
    /// * `capacity` - The broadcast buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emits an event to every current subscriber.
    ///
    /// Non-blocking. An event emitted while nobody is listening is dropped,
    /// which is fine for a coarse change signal.
    ///
    /// # Arguments
    /// * `event` - The event to emit.
    pub fn emit(&self, event: BrokerEvent) {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("Event emitted to {} subscriber(s)", receivers);
            }
            Err(_) => {
                debug!("Event emitted with no subscribers");
            }
        }
    }

    /// Returns a new receive handle on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
