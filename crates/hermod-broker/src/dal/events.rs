/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Event operations.
//!
//! This module provides functionality to interact with the events table, the
//! broker's audit log. Events are written by the pipeline, flipped to
//! injected once delivery succeeds, and pruned by the retention sweep.

use crate::dal::DAL;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use hermod_models::models::events::{Event, NewEvent};
use hermod_models::schema::events;

/// Data Access Layer for Event operations.
pub struct EventsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl EventsDAL<'_> {
    /// Logs a new event in the audit log.
    ///
    /// # Arguments
    ///
    /// * `new_event` - The event to record.
    ///
    /// # Returns
    ///
    /// Returns the created Event record.
    pub fn create(&self, new_event: &NewEvent) -> Result<Event, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::insert_into(events::table)
            .values(new_event)
            .get_result(conn)
    }

    /// Gets an event by ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The event identifier.
    ///
    /// # Returns
    ///
    /// Returns the event if found.
    pub fn get(&self, id: &str) -> Result<Option<Event>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        events::table
            .filter(events::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Lists events for one subscription, newest first.
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - The owning subscription.
    /// * `limit` - Maximum number of rows returned.
    pub fn list(
        &self,
        subscription_id: &str,
        limit: i64,
    ) -> Result<Vec<Event>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        events::table
            .filter(events::subscription_id.eq(subscription_id))
            .order(events::received_at.desc())
            .limit(limit)
            .load(conn)
    }

    /// Lists the not-yet-injected events for one subscription, oldest first.
    ///
    /// The drain path pairs these with queued entries in enqueue order.
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - The owning subscription.
    pub fn list_uninjected(
        &self,
        subscription_id: &str,
    ) -> Result<Vec<Event>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        events::table
            .filter(events::subscription_id.eq(subscription_id))
            .filter(events::injected.eq(false))
            .order(events::received_at.asc())
            .load(conn)
    }

    /// Counts the events recorded for one subscription.
    ///
    /// # Arguments
    ///
    /// * `subscription_id` - The owning subscription.
    ///
    /// # Returns
    ///
    /// Returns the number of audit-log rows for the subscription.
    pub fn count(&self, subscription_id: &str) -> Result<i64, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        events::table
            .filter(events::subscription_id.eq(subscription_id))
            .count()
            .get_result(conn)
    }

    /// Marks an event as injected. A no-op when the flag is already set.
    ///
    /// # Arguments
    ///
    /// * `id` - The event identifier.
    ///
    /// # Returns
    ///
    /// Returns the number of updated rows.
    pub fn mark_injected(&self, id: &str) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::update(
            events::table
                .filter(events::id.eq(id))
                .filter(events::injected.eq(false)),
        )
        .set(events::injected.eq(true))
        .execute(conn)
    }

    /// Deletes events received before the cutoff.
    ///
    /// # Arguments
    ///
    /// * `cutoff` - Events older than this instant are removed.
    ///
    /// # Returns
    ///
    /// Returns the number of deleted rows.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        diesel::delete(events::table.filter(events::received_at.lt(cutoff))).execute(conn)
    }
}
