/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Data Access Layer (DAL) Module
//!
//! This module provides an abstraction layer for database operations in the
//! Hermod broker. The DAL is the only component that touches persistent
//! state; everything else holds plain values it hands out.
//!
//! ## Main Structures
//!
//! - `DAL`: The main Data Access Layer struct that provides access to all sub-DALs.
//!
//! Writes that mutate subscriptions emit a coarse change signal on the event
//! bus after they commit, which the control plane forwards to its SSE
//! streams.

use crate::db::ConnectionPool;
use crate::utils::event_bus::{BrokerEvent, EventBus};
use tokio::sync::broadcast;

pub mod events;
use events::EventsDAL;

pub mod queued_events;
use queued_events::QueuedEventsDAL;

pub mod subscriptions;
use subscriptions::SubscriptionsDAL;

/// The main Data Access Layer struct.
///
/// This struct serves as the central point for database operations,
/// managing a connection pool and providing access to specific DAL
/// implementations for different entities.
#[derive(Clone)]
pub struct DAL {
    /// A connection pool for sqlite database connections.
    pub pool: ConnectionPool,
    /// Bus the subscription-mutating writes signal on.
    pub event_bus: EventBus,
}

impl DAL {
    /// Creates a new DAL instance with the given connection pool and event bus.
    ///
    /// # Arguments
    ///
    /// * `pool` - A connection pool for sqlite database connections.
    /// * `event_bus` - The bus change signals are emitted on.
    ///
    /// # Returns
    ///
    /// A new DAL instance.
    pub fn new(pool: ConnectionPool, event_bus: EventBus) -> Self {
        DAL { pool, event_bus }
    }

    /// Provides access to the Subscriptions Data Access Layer.
    ///
    /// # Returns
    ///
    /// An instance of SubscriptionsDAL.
    pub fn subscriptions(&self) -> SubscriptionsDAL {
        SubscriptionsDAL { dal: self }
    }

    /// Provides access to the Events Data Access Layer.
    ///
    /// # Returns
    ///
    /// An instance of EventsDAL.
    pub fn events(&self) -> EventsDAL {
        EventsDAL { dal: self }
    }

    /// Provides access to the Queued Events Data Access Layer.
    ///
    /// # Returns
    ///
    /// An instance of QueuedEventsDAL.
    pub fn queued_events(&self) -> QueuedEventsDAL {
        QueuedEventsDAL { dal: self }
    }

    /// Returns a receive handle on the coarse change stream.
    ///
    /// One "changed" signal per committed mutation at most; consumers must
    /// treat it as coalescable.
    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<BrokerEvent> {
        self.event_bus.subscribe()
    }

    /// Emits the coarse "subscriptions changed" signal.
    ///
    /// Called by the sub-DALs after a mutating write commits.
    pub(crate) fn notify_changed(&self) {
        self.event_bus.emit(BrokerEvent::SubscriptionsChanged);
    }
}
