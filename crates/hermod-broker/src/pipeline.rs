/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! The webhook processing pipeline.
//!
//! One inbound delivery runs the stages
//! lookup -> verify -> gate -> persist -> summarize -> frame -> deliver.
//! Signature failures are logged as rejected events and surfaced to the
//! sender; a gate-filtered event is accepted silently and leaves no trace;
//! a delivery that cannot reach its session is parked in the queue and
//! drained when the session reappears. The sender always gets an answer —
//! nothing past the signature check is its problem.

use crate::dal::DAL;
use crate::filter::{FilterEngine, FilterOutcome};
use crate::injector::Injector;
use axum::http::HeaderMap;
use hermod_models::models::events::{NewEvent, NewQueuedEvent, VERIFICATION_ACCEPTED, VERIFICATION_REJECTED};
use hermod_models::models::subscriptions::Subscription;
use hermod_utils::logging::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::mpsc;

/// Summary size cap when no summary expression is configured.
const SUMMARY_LIMIT_DEFAULT: usize = 2000;
/// Summary size cap when the summary expression dropped or failed.
const SUMMARY_LIMIT_FALLBACK: usize = 500;

/// Rejection reason strings returned to the sender.
pub const REJECT_PAUSED: &str = "paused";
pub const REJECT_MISSING_SIGNATURE: &str = "missing_signature";
pub const REJECT_INVALID_SIGNATURE: &str = "invalid_signature";

/// Terminal outcome of processing one webhook request.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// The event is the broker's problem now.
    Accepted,
    /// The sender did something wrong; the reason is returned verbatim.
    Rejected(&'static str),
    /// No subscription with the requested id exists.
    NotFound,
}

/// The webhook processing state machine.
#[derive(Clone)]
pub struct Pipeline {
    dal: DAL,
    filter: FilterEngine,
    injector: Injector,
}

impl Pipeline {
    /// Creates a new pipeline.
    ///
    /// # Arguments
    /// * `dal` - The store.
    /// * `filter` - The jq filter engine.
    /// * `injector` - The session delivery transport.
    pub fn new(dal: DAL, filter: FilterEngine, injector: Injector) -> Self {
        Self {
            dal,
            filter,
            injector,
        }
    }

    /// Processes one webhook request end to end.
    ///
    /// # Arguments
    /// * `subscription_id` - The path parameter of the ingest URL.
    /// * `headers` - The request headers (signature lookup).
    /// * `body` - The raw request body.
    ///
    /// # Returns
    /// The outcome for the sender, or a store error (surfaced as 500).
    pub async fn process(
        &self,
        subscription_id: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<PipelineOutcome, diesel::result::Error> {
        // LOOKUP
        let Some(subscription) = self.dal.subscriptions().get(subscription_id)? else {
            return Ok(PipelineOutcome::NotFound);
        };

        if !subscription.is_active() {
            debug!("Rejecting delivery for paused subscription {}", subscription.id);
            return Ok(PipelineOutcome::Rejected(REJECT_PAUSED));
        }

        // VERIFY
        if let Some(secret) = &subscription.secret {
            let header_name = subscription.signature_header_or_default();
            let header_value = headers.get(header_name).and_then(|v| v.to_str().ok());

            match header_value {
                None => {
                    self.log_rejected(&subscription, body)?;
                    return Ok(PipelineOutcome::Rejected(REJECT_MISSING_SIGNATURE));
                }
                Some(signature) => {
                    if !verify_signature(secret, signature, body) {
                        warn!(
                            "Invalid signature on subscription {} (header {})",
                            subscription.id, header_name
                        );
                        self.log_rejected(&subscription, body)?;
                        return Ok(PipelineOutcome::Rejected(REJECT_INVALID_SIGNATURE));
                    }
                }
            }
        }

        // GATE
        if let Some(gate_expr) = &subscription.gate_expr {
            match self.filter.evaluate(gate_expr, body).await {
                Ok(FilterOutcome::Produced(_)) => {}
                Ok(FilterOutcome::Dropped) => {
                    debug!("Gate filter dropped event for subscription {}", subscription.id);
                    return Ok(PipelineOutcome::Accepted);
                }
                Err(e) => {
                    warn!(
                        "Gate filter failed for subscription {}, dropping event: {}",
                        subscription.id, e
                    );
                    return Ok(PipelineOutcome::Accepted);
                }
            }
        }

        // PERSIST
        let payload = String::from_utf8_lossy(body).into_owned();
        let new_event = NewEvent::new(
            subscription.id.clone(),
            payload.clone(),
            VERIFICATION_ACCEPTED.to_string(),
            false,
        )
        .expect("accepted event for an existing subscription is always valid");
        let event = self.dal.events().create(&new_event)?;

        // SUMMARIZE
        let summary = self.summarize(&subscription, &payload, body).await;

        // FRAME
        let framed = frame_message(&subscription, &event.id, &summary);

        // DELIVER
        match self.injector.inject(&subscription.session_id, &framed).await {
            Ok(true) => {
                self.dal.events().mark_injected(&event.id)?;
                self.dal
                    .subscriptions()
                    .increment_event_count(&subscription.id)?;
                info!(
                    "Injected event {} into session {}",
                    event.id, subscription.session_id
                );
                self.finish_one_shot(&subscription)?;
            }
            Ok(false) => {
                self.enqueue(&subscription, framed)?;
            }
            Err(e) => {
                warn!(
                    "Injection failed for session {}, queueing event {}: {}",
                    subscription.session_id, event.id, e
                );
                self.enqueue(&subscription, framed)?;
            }
        }

        Ok(PipelineOutcome::Accepted)
    }

    /// Drains the queued events parked for a session, oldest first.
    ///
    /// Each entry gets a single delivery attempt; entries that still cannot
    /// be delivered wait for the next appearance. A drained entry is settled
    /// transactionally: dequeue, event-count bump, injected flag.
    ///
    /// # Arguments
    /// * `session_id` - The session that just appeared.
    pub async fn drain_session(&self, session_id: &str) -> Result<(), diesel::result::Error> {
        let entries = self.dal.queued_events().list_for_session(session_id)?;
        if entries.is_empty() {
            return Ok(());
        }

        info!(
            "Draining {} queued event(s) for session {}",
            entries.len(),
            session_id
        );

        for entry in entries {
            match self
                .injector
                .inject(&entry.session_id, &entry.framed_payload)
                .await
            {
                Ok(true) => {
                    self.dal.queued_events().complete(&entry)?;
                    if let Some(subscription) =
                        self.dal.subscriptions().get(&entry.subscription_id)?
                    {
                        self.finish_one_shot(&subscription)?;
                    }
                }
                Ok(false) => {
                    debug!(
                        "Session {} vanished mid-drain, leaving remaining entries queued",
                        session_id
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Drain delivery failed for queued event {}: {}",
                        entry.id, e
                    );
                }
            }
        }

        Ok(())
    }

    async fn summarize(&self, subscription: &Subscription, payload: &str, body: &[u8]) -> String {
        match &subscription.summary_expr {
            None => truncate_utf8(payload, SUMMARY_LIMIT_DEFAULT).to_string(),
            Some(expr) => match self.filter.evaluate(expr, body).await {
                Ok(FilterOutcome::Produced(produced)) => produced,
                Ok(FilterOutcome::Dropped) => {
                    truncate_utf8(payload, SUMMARY_LIMIT_FALLBACK).to_string()
                }
                Err(e) => {
                    warn!(
                        "Summary filter failed for subscription {}, truncating: {}",
                        subscription.id, e
                    );
                    truncate_utf8(payload, SUMMARY_LIMIT_FALLBACK).to_string()
                }
            },
        }
    }

    fn log_rejected(
        &self,
        subscription: &Subscription,
        body: &[u8],
    ) -> Result<(), diesel::result::Error> {
        let new_event = NewEvent::new(
            subscription.id.clone(),
            String::from_utf8_lossy(body).into_owned(),
            VERIFICATION_REJECTED.to_string(),
            false,
        )
        .expect("rejected event for an existing subscription is always valid");
        self.dal.events().create(&new_event)?;
        Ok(())
    }

    fn enqueue(
        &self,
        subscription: &Subscription,
        framed: String,
    ) -> Result<(), diesel::result::Error> {
        let new_queued = NewQueuedEvent::new(
            subscription.id.clone(),
            subscription.session_id.clone(),
            framed,
        )
        .expect("queued event for an existing subscription is always valid");
        self.dal.queued_events().enqueue(&new_queued)?;
        Ok(())
    }

    /// Deletes a one-shot subscription after its first successful delivery.
    fn finish_one_shot(&self, subscription: &Subscription) -> Result<(), diesel::result::Error> {
        if subscription.one_shot {
            info!(
                "One-shot subscription {} delivered, removing it",
                subscription.id
            );
            self.dal.subscriptions().delete(&subscription.id)?;
        }
        Ok(())
    }
}

/// Starts the background task that drains queues on session appearance.
///
/// # Arguments
/// * `pipeline` - The pipeline to drain through.
/// * `appeared_rx` - Channel of session IDs announced by the session watch.
pub fn start_drain_task(pipeline: Pipeline, mut appeared_rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(session_id) = appeared_rx.recv().await {
            if let Err(e) = pipeline.drain_session(&session_id).await {
                error!("Queue drain failed for session {}: {:?}", session_id, e);
            }
        }
        warn!("Session appearance channel closed, drain task exiting");
    });
}

/// Verifies an HMAC-SHA256 signature header against a body.
///
/// The header value may carry a `sha256=` prefix (any case). The comparison
/// runs in constant time; a missing header is handled by the caller and a
/// length mismatch is a mismatch.
pub fn verify_signature(secret: &str, header_value: &str, body: &[u8]) -> bool {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let provided = header_value.trim();
    let provided = if provided.len() >= 7 && provided[..7].eq_ignore_ascii_case("sha256=") {
        &provided[7..]
    } else {
        provided
    };

    constant_time_eq(expected.as_bytes(), provided.as_bytes())
}

/// Compares two byte strings without short-circuiting on the first
/// difference. Differing lengths compare unequal.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Truncates a string to at most `max_bytes`, backing off to the nearest
/// character boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Renders the framed message a session receives as a single prompt.
///
/// # Arguments
/// * `subscription` - The owning subscription (service tag, prompt).
/// * `event_id` - The persisted event's id.
/// * `summary` - The text appearing inside the payload element.
pub fn frame_message(subscription: &Subscription, event_id: &str, summary: &str) -> String {
    let service = subscription.service_tag.as_deref().unwrap_or("webhook");
    let prompt = match &subscription.prompt {
        Some(prompt) => prompt.clone(),
        None => format!(
            "A {} event was received. Review and take appropriate action.",
            service
        ),
    };

    format!(
        "<webhook-event service=\"{service}\" event-id=\"{event_id}\">\n\
         {prompt}\n\
         <payload>\n\
         {summary}\n\
         </payload>\n\
         To see the full untruncated payload, use the get_event_payload tool with event_id \"{event_id}\".\n\
         If this event is too noisy, or the summary needs tuning, use update_subscription to adjust the summary_filter (jq expression) or jq_filter (to suppress unwanted events entirely) for subscription \"{subscription_id}\".\n\
         </webhook-event>",
        subscription_id = subscription.id,
    )
}
