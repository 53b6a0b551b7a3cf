/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for QueuedEvent operations.
//!
//! This module provides functionality to interact with the queued_events
//! table, the retry buffer for deliveries that failed to reach their session
//! socket. Entries are created by the pipeline on delivery failure and
//! consumed by the drain loop when the session reappears.

use crate::dal::DAL;
use diesel::prelude::*;
use hermod_models::models::events::{NewQueuedEvent, QueuedEvent};
use hermod_models::schema::{events, queued_events, subscriptions};

/// Data Access Layer for QueuedEvent operations.
pub struct QueuedEventsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl QueuedEventsDAL<'_> {
    /// Parks a framed payload for redelivery.
    ///
    /// # Arguments
    ///
    /// * `new_queued` - The entry to park.
    ///
    /// # Returns
    ///
    /// Returns the created QueuedEvent record.
    pub fn enqueue(&self, new_queued: &NewQueuedEvent) -> Result<QueuedEvent, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(queued_events::table)
            .values(new_queued)
            .get_result(conn)
    }

    /// Lists the queued entries for one session, oldest first.
    ///
    /// Drain order is enqueue order.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The session the entries were parked for.
    pub fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<QueuedEvent>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        queued_events::table
            .filter(queued_events::session_id.eq(session_id))
            .order(queued_events::enqueued_at.asc())
            .load(conn)
    }

    /// Removes a queued entry.
    ///
    /// # Arguments
    ///
    /// * `id` - The entry identifier.
    ///
    /// # Returns
    ///
    /// Returns the number of deleted rows.
    pub fn dequeue(&self, id: &str) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(queued_events::table.filter(queued_events::id.eq(id))).execute(conn)
    }

    /// Removes every queued entry belonging to one subscription.
    ///
    /// Cascade deletion covers the subscription-removal path; this is for
    /// discarding a subscription's backlog while keeping the subscription.
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - The owning subscription.
    ///
    /// # Returns
    ///
    /// Returns the number of deleted rows.
    pub fn delete_for_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(
            queued_events::table.filter(queued_events::subscription_id.eq(subscription_id)),
        )
        .execute(conn)
    }

    /// Settles a successfully drained entry.
    ///
    /// In one transaction: removes the queue entry, bumps the owning
    /// subscription's event counter, and flips the oldest not-yet-injected
    /// event of that subscription to injected (queue entries and uninjected
    /// events advance in the same arrival order).
    ///
    /// # Arguments
    ///
    /// * `queued` - The entry whose delivery just succeeded.
    pub fn complete(&self, queued: &QueuedEvent) -> Result<(), diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            diesel::delete(queued_events::table.filter(queued_events::id.eq(&queued.id)))
                .execute(conn)?;

            diesel::update(
                subscriptions::table.filter(subscriptions::id.eq(&queued.subscription_id)),
            )
            .set(subscriptions::event_count.eq(subscriptions::event_count + 1))
            .execute(conn)?;

            let oldest_uninjected: Option<String> = events::table
                .filter(events::subscription_id.eq(&queued.subscription_id))
                .filter(events::injected.eq(false))
                .order(events::received_at.asc())
                .select(events::id)
                .first(conn)
                .optional()?;

            if let Some(event_id) = oldest_uninjected {
                diesel::update(events::table.filter(events::id.eq(event_id)))
                    .set(events::injected.eq(true))
                    .execute(conn)?;
            }

            Ok(())
        })?;

        self.dal.notify_changed();
        Ok(())
    }
}
