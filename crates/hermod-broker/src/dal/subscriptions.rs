/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Data Access Layer for Subscription operations.
//!
//! This module provides functionality to interact with the subscriptions table.
//! It includes methods for creating, updating, deleting, and querying webhook
//! subscriptions. Every mutating operation emits the coarse change signal
//! after it commits.

use crate::dal::DAL;
use diesel::prelude::*;
use hermod_models::models::subscriptions::{NewSubscription, Subscription, UpdateSubscription};
use hermod_models::schema::subscriptions;

/// Data Access Layer for Subscription operations.
pub struct SubscriptionsDAL<'a> {
    /// Reference to the main DAL instance.
    pub dal: &'a DAL,
}

impl SubscriptionsDAL<'_> {
    /// Creates a new subscription.
    ///
    /// # Arguments
    ///
    /// * `new_subscription` - The subscription to create.
    ///
    /// # Returns
    ///
    /// Returns the created Subscription record.
    pub fn create(
        &self,
        new_subscription: &NewSubscription,
    ) -> Result<Subscription, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let created = diesel::insert_into(subscriptions::table)
            .values(new_subscription)
            .get_result(conn)?;

        self.dal.notify_changed();
        Ok(created)
    }

    /// Gets a subscription by ID.
    ///
    /// # Arguments
    ///
    /// * `id` - The subscription identifier.
    ///
    /// # Returns
    ///
    /// Returns the subscription if found.
    pub fn get(&self, id: &str) -> Result<Option<Subscription>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        subscriptions::table
            .filter(subscriptions::id.eq(id))
            .first(conn)
            .optional()
    }

    /// Lists all subscriptions, newest first.
    pub fn list(&self) -> Result<Vec<Subscription>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        subscriptions::table
            .order(subscriptions::created_at.desc())
            .load(conn)
    }

    /// Lists the subscriptions targeting one session, newest first.
    ///
    /// # Arguments
    ///
    /// * `session_id` - The target session identifier.
    pub fn list_by_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Subscription>, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        subscriptions::table
            .filter(subscriptions::session_id.eq(session_id))
            .order(subscriptions::created_at.desc())
            .load(conn)
    }

    /// Replaces a subscription record wholesale.
    ///
    /// # Arguments
    ///
    /// * `subscription` - The full record to store; matched by its `id`.
    ///
    /// # Returns
    ///
    /// Returns the stored subscription, or `NotFound` when the id is absent.
    pub fn update(
        &self,
        subscription: &Subscription,
    ) -> Result<Subscription, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let updated = diesel::update(
            subscriptions::table.filter(subscriptions::id.eq(&subscription.id)),
        )
        .set((
            subscriptions::session_id.eq(&subscription.session_id),
            subscriptions::webhook_url.eq(&subscription.webhook_url),
            subscriptions::secret.eq(&subscription.secret),
            subscriptions::signature_header.eq(&subscription.signature_header),
            subscriptions::display_name.eq(&subscription.display_name),
            subscriptions::service_tag.eq(&subscription.service_tag),
            subscriptions::prompt.eq(&subscription.prompt),
            subscriptions::gate_expr.eq(&subscription.gate_expr),
            subscriptions::summary_expr.eq(&subscription.summary_expr),
            subscriptions::one_shot.eq(subscription.one_shot),
            subscriptions::status.eq(&subscription.status),
            subscriptions::event_count.eq(subscription.event_count),
        ))
        .get_result(conn)?;

        self.dal.notify_changed();
        Ok(updated)
    }

    /// Applies a partial update to a subscription.
    ///
    /// # Arguments
    ///
    /// * `id` - The subscription identifier.
    /// * `update` - The fields to change.
    ///
    /// # Returns
    ///
    /// Returns the updated subscription, or `NotFound` when the id is absent.
    pub fn update_fields(
        &self,
        id: &str,
        update: &UpdateSubscription,
    ) -> Result<Subscription, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let updated = diesel::update(subscriptions::table.filter(subscriptions::id.eq(id)))
            .set(update)
            .get_result(conn)?;

        self.dal.notify_changed();
        Ok(updated)
    }

    /// Deletes a subscription. Idempotent: deleting an absent id succeeds.
    ///
    /// Events and queued events cascade at the schema level.
    ///
    /// # Arguments
    ///
    /// * `id` - The subscription identifier.
    ///
    /// # Returns
    ///
    /// Returns the number of deleted rows.
    pub fn delete(&self, id: &str) -> Result<usize, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let deleted = diesel::delete(subscriptions::table.filter(subscriptions::id.eq(id)))
            .execute(conn)?;

        if deleted > 0 {
            self.dal.notify_changed();
        }
        Ok(deleted)
    }

    /// Sets a subscription's status.
    ///
    /// # Arguments
    ///
    /// * `id` - The subscription identifier.
    /// * `status` - One of the valid status strings.
    ///
    /// # Returns
    ///
    /// Returns the updated subscription.
    pub fn set_status(
        &self,
        id: &str,
        status: &str,
    ) -> Result<Subscription, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let updated = diesel::update(subscriptions::table.filter(subscriptions::id.eq(id)))
            .set(subscriptions::status.eq(status))
            .get_result(conn)?;

        self.dal.notify_changed();
        Ok(updated)
    }

    /// Increments a subscription's delivered-event counter by one.
    ///
    /// # Arguments
    ///
    /// * `id` - The subscription identifier.
    ///
    /// # Returns
    ///
    /// Returns the updated subscription.
    pub fn increment_event_count(&self, id: &str) -> Result<Subscription, diesel::result::Error> {
        let conn = &mut self.dal.pool.get().expect("Failed to get DB connection");

        let updated = diesel::update(subscriptions::table.filter(subscriptions::id.eq(id)))
            .set(subscriptions::event_count.eq(subscriptions::event_count + 1))
            .get_result(conn)?;

        self.dal.notify_changed();
        Ok(updated)
    }
}
