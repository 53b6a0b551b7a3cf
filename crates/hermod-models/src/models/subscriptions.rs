/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Subscription models for webhook routing.
//!
//! A subscription binds an externally-reachable webhook URL to a local agent
//! session, together with the verification secret and the jq expressions that
//! gate and summarize incoming payloads.

use crate::schema::subscriptions;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Valid subscription statuses
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_PAUSED: &str = "paused";

pub const VALID_STATUSES: &[&str] = &[STATUS_ACTIVE, STATUS_PAUSED];

/// Header consulted for the HMAC signature when a subscription does not name
/// its own.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

// =============================================================================
// Subscription Models
// =============================================================================

/// A webhook subscription record from the database.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = subscriptions)]
pub struct Subscription {
    /// Unique identifier for the subscription.
    pub id: String,
    /// Identifier of the target local session (not unique across subscriptions).
    pub session_id: String,
    /// The externally-reachable URL, derived at creation time.
    pub webhook_url: String,
    /// Verification key material for HMAC-SHA256, if the source signs deliveries.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    /// Name of the HTTP header carrying the signature.
    pub signature_header: Option<String>,
    /// Human-readable name, advisory only.
    pub display_name: Option<String>,
    /// Originating service tag (e.g. "github"), advisory only.
    pub service_tag: Option<String>,
    /// Free text embedded in the framed message delivered to the session.
    pub prompt: Option<String>,
    /// jq expression deciding whether an event is processed at all.
    pub gate_expr: Option<String>,
    /// jq expression producing the summary body delivered to the session.
    pub summary_expr: Option<String>,
    /// Whether the subscription is deleted after its first successful delivery.
    pub one_shot: bool,
    /// Subscription status: active or paused.
    pub status: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// Number of successfully injected events. Never decreases.
    pub event_count: i64,
}

impl Subscription {
    /// Returns the signature header to consult, falling back to the default.
    pub fn signature_header_or_default(&self) -> &str {
        self.signature_header
            .as_deref()
            .unwrap_or(DEFAULT_SIGNATURE_HEADER)
    }

    /// Returns true when the subscription accepts deliveries.
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// A new webhook subscription to be inserted.
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = subscriptions)]
pub struct NewSubscription {
    /// Unique identifier, assigned at construction when the caller has none.
    pub id: String,
    /// Identifier of the target local session.
    pub session_id: String,
    /// The externally-reachable URL.
    pub webhook_url: String,
    /// Verification key material.
    pub secret: Option<String>,
    /// Name of the HTTP header carrying the signature.
    pub signature_header: Option<String>,
    /// Human-readable name.
    pub display_name: Option<String>,
    /// Originating service tag.
    pub service_tag: Option<String>,
    /// Free text embedded in the framed message.
    pub prompt: Option<String>,
    /// jq gate expression.
    pub gate_expr: Option<String>,
    /// jq summary expression.
    pub summary_expr: Option<String>,
    /// One-shot flag.
    pub one_shot: bool,
    /// Initial status (always active).
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Initial event count (always zero).
    pub event_count: i64,
}

impl NewSubscription {
    /// Creates a new subscription bound to a session.
    ///
    /// # Arguments
    /// * `id` - Identifier to use; a v4 UUID is assigned when absent.
    /// * `session_id` - Identifier of the target session.
    /// * `webhook_url` - The externally-reachable URL for this subscription.
    /// * `secret` - Optional HMAC verification secret.
    /// * `signature_header` - Optional signature header override.
    /// * `gate_expr` - Optional jq gate expression.
    /// * `summary_expr` - Optional jq summary expression.
    ///
    /// # Returns
    /// A Result containing the new subscription or a validation error message.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Option<String>,
        session_id: String,
        webhook_url: String,
        secret: Option<String>,
        signature_header: Option<String>,
        display_name: Option<String>,
        service_tag: Option<String>,
        prompt: Option<String>,
        gate_expr: Option<String>,
        summary_expr: Option<String>,
        one_shot: bool,
    ) -> Result<Self, String> {
        if session_id.trim().is_empty() {
            return Err("Session ID cannot be empty".to_string());
        }

        // Set expressions must be non-empty strings.
        if matches!(&gate_expr, Some(e) if e.trim().is_empty()) {
            return Err("Gate expression cannot be empty".to_string());
        }
        if matches!(&summary_expr, Some(e) if e.trim().is_empty()) {
            return Err("Summary expression cannot be empty".to_string());
        }

        Ok(Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            session_id,
            webhook_url,
            secret,
            signature_header,
            display_name,
            service_tag,
            prompt,
            gate_expr,
            summary_expr,
            one_shot,
            status: STATUS_ACTIVE.to_string(),
            created_at: Utc::now(),
            event_count: 0,
        })
    }
}

/// Changeset for updating a webhook subscription.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = subscriptions)]
pub struct UpdateSubscription {
    /// New target session.
    pub session_id: Option<String>,
    /// New secret. Use Some(None) to remove, None to keep unchanged.
    pub secret: Option<Option<String>>,
    /// New signature header.
    pub signature_header: Option<Option<String>>,
    /// New display name.
    pub display_name: Option<Option<String>>,
    /// New service tag.
    pub service_tag: Option<Option<String>>,
    /// New prompt.
    pub prompt: Option<Option<String>>,
    /// New gate expression.
    pub gate_expr: Option<Option<String>>,
    /// New summary expression.
    pub summary_expr: Option<Option<String>>,
    /// New one-shot flag.
    pub one_shot: Option<bool>,
    /// New status.
    pub status: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
