/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Event audit log and queued-event models.
//!
//! Every delivery attempt that passes the gate filter leaves an `Event` row
//! behind; deliveries that could not reach their session socket additionally
//! park a fully framed `QueuedEvent` until the session reappears.

use crate::schema::{events, queued_events};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Valid verification results
pub const VERIFICATION_ACCEPTED: &str = "accepted";
pub const VERIFICATION_REJECTED: &str = "rejected";

pub const VALID_VERIFICATION_RESULTS: &[&str] = &[VERIFICATION_ACCEPTED, VERIFICATION_REJECTED];

// =============================================================================
// Event Models
// =============================================================================

/// An event record from the audit log.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = events)]
pub struct Event {
    /// Unique identifier for the event.
    pub id: String,
    /// The subscription this event belongs to.
    pub subscription_id: String,
    /// When the webhook request arrived.
    pub received_at: DateTime<Utc>,
    /// The raw request body as stored text.
    pub payload: String,
    /// Signature verification outcome: accepted or rejected.
    pub verification_result: String,
    /// Whether the framed message reached the session. Mutable false -> true once.
    pub injected: bool,
}

/// A new event to be inserted into the audit log.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = events)]
pub struct NewEvent {
    /// Unique identifier.
    pub id: String,
    /// The owning subscription.
    pub subscription_id: String,
    /// Arrival timestamp.
    pub received_at: DateTime<Utc>,
    /// Raw request body.
    pub payload: String,
    /// Verification outcome.
    pub verification_result: String,
    /// Initial injected flag.
    pub injected: bool,
}

impl NewEvent {
    /// Creates a new audit-log event.
    ///
    /// # Arguments
    /// * `subscription_id` - The owning subscription.
    /// * `payload` - The raw request body.
    /// * `verification_result` - One of the valid verification results.
    /// * `injected` - Whether the event has already been injected.
    ///
    /// # Returns
    /// A Result containing the new event or a validation error message.
    pub fn new(
        subscription_id: String,
        payload: String,
        verification_result: String,
        injected: bool,
    ) -> Result<Self, String> {
        if subscription_id.trim().is_empty() {
            return Err("Subscription ID cannot be empty".to_string());
        }
        if !VALID_VERIFICATION_RESULTS.contains(&verification_result.as_str()) {
            return Err(format!(
                "Invalid verification result: {}",
                verification_result
            ));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            subscription_id,
            received_at: Utc::now(),
            payload,
            verification_result,
            injected,
        })
    }
}

// =============================================================================
// Queued Event Models
// =============================================================================

/// A queued-event record awaiting redelivery.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = queued_events)]
pub struct QueuedEvent {
    /// Unique identifier for the queue entry.
    pub id: String,
    /// The owning subscription.
    pub subscription_id: String,
    /// Target session captured at enqueue time.
    pub session_id: String,
    /// The already-framed bytes to deliver, verbatim.
    pub framed_payload: String,
    /// When the entry was parked.
    pub enqueued_at: DateTime<Utc>,
}

/// A new queued event to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = queued_events)]
pub struct NewQueuedEvent {
    /// Unique identifier.
    pub id: String,
    /// The owning subscription.
    pub subscription_id: String,
    /// Target session captured at enqueue time.
    pub session_id: String,
    /// The framed bytes to deliver.
    pub framed_payload: String,
    /// Enqueue timestamp.
    pub enqueued_at: DateTime<Utc>,
}

impl NewQueuedEvent {
    /// Creates a new queue entry for a failed delivery.
    ///
    /// # Arguments
    /// * `subscription_id` - The owning subscription.
    /// * `session_id` - The target session at the time of the failure.
    /// * `framed_payload` - The fully framed message, delivered verbatim on drain.
    ///
    /// # Returns
    /// A Result containing the new entry or a validation error message.
    pub fn new(
        subscription_id: String,
        session_id: String,
        framed_payload: String,
    ) -> Result<Self, String> {
        if subscription_id.trim().is_empty() {
            return Err("Subscription ID cannot be empty".to_string());
        }
        if session_id.trim().is_empty() {
            return Err("Session ID cannot be empty".to_string());
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            subscription_id,
            session_id,
            framed_payload,
            enqueued_at: Utc::now(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
