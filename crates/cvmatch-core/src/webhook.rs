//! Webhook journal entries.
//!
//! The journal is keyed by the payment provider's event id. That unique key
//! is the only idempotency guarantee: a delivery whose id is already
//! journaled as processed is acknowledged without side effects.
//!
//! A `Logged` row is owned by the delivery that claimed it until its claim
//! lease runs out. A delivery that never finishes (dropped on timeout,
//! process crash) leaves the row reclaimable by the next provider retry.
//!
//! Lifecycle:
//!
//! ```text
//! Received ──► Logged ──► Processed
//!                 │  ▲
//!                 ▼  │ (provider retry)
//!               Failed
//!
//! Logged ──► Logged   (claim lease expired)
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Processing state of a webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    /// Parsed and authenticated, not yet journaled.
    Received,
    /// Journaled; processing in flight until the claim lease expires.
    Logged,
    /// Side effects applied.
    Processed,
    /// Processing raised an error; eligible for reprocessing.
    Failed,
}

impl WebhookStatus {
    /// Whether the journal may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Logged)
                | (Self::Logged, Self::Processed | Self::Failed)
                | (Self::Failed, Self::Logged)
        )
    }

    /// Whether the state is terminal for a successful delivery.
    #[must_use]
    pub const fn is_processed(self) -> bool {
        matches!(self, Self::Processed)
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Logged => "logged",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "logged" => Ok(Self::Logged),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseEnumError::new("webhook status", s)),
        }
    }
}

/// A journaled webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider event id (`evt_...`). Unique.
    pub external_event_id: String,

    /// Provider event type (`checkout.session.completed`, ...).
    pub event_type: String,

    /// Current state.
    pub status: WebhookStatus,

    /// Whether side effects were applied.
    pub processed: bool,

    /// Wall time spent processing, in milliseconds.
    pub processing_time_ms: Option<i64>,

    /// Last processing error.
    pub error: Option<String>,

    /// Raw event payload.
    pub payload: serde_json::Value,

    /// When the delivery was first received.
    pub received_at: DateTime<Utc>,

    /// When the current owner claimed the row for processing.
    pub claimed_at: DateTime<Utc>,

    /// When processing completed.
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// A freshly received delivery.
    #[must_use]
    pub fn received(
        external_event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            external_event_id: external_event_id.into(),
            event_type: event_type.into(),
            status: WebhookStatus::Received,
            processed: false,
            processing_time_ms: None,
            error: None,
            payload,
            received_at: now,
            claimed_at: now,
            processed_at: None,
        }
    }

    /// Whether a new delivery may take the row over: it failed, or its
    /// owner has held it in `Logged` since before `stale_before`.
    #[must_use]
    pub fn is_reclaimable(&self, stale_before: DateTime<Utc>) -> bool {
        match self.status {
            WebhookStatus::Failed => true,
            WebhookStatus::Logged => self.claimed_at < stale_before,
            WebhookStatus::Received | WebhookStatus::Processed => false,
        }
    }

    /// Take the row over for a new delivery, returning `false` if it is not
    /// reclaimable.
    pub fn reclaim(&mut self, stale_before: DateTime<Utc>) -> bool {
        if !self.is_reclaimable(stale_before) {
            return false;
        }
        self.status = WebhookStatus::Logged;
        self.processed = false;
        self.claimed_at = Utc::now();
        true
    }

    /// Cutoff for [`Self::is_reclaimable`] given a claim lease.
    #[must_use]
    pub fn lease_cutoff(lease: Duration) -> DateTime<Utc> {
        Utc::now() - lease
    }

    /// Move to `next`, returning `false` (and changing nothing) if the
    /// transition is not allowed.
    pub fn transition(&mut self, next: WebhookStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.processed = next.is_processed();
        true
    }

    /// Record successful processing.
    pub fn mark_processed(&mut self, processing_time_ms: i64) -> bool {
        if !self.transition(WebhookStatus::Processed) {
            return false;
        }
        self.processing_time_ms = Some(processing_time_ms);
        self.error = None;
        self.processed_at = Some(Utc::now());
        true
    }

    /// Record a processing failure.
    pub fn mark_failed(&mut self, error: impl Into<String>, processing_time_ms: i64) -> bool {
        if !self.transition(WebhookStatus::Failed) {
            return false;
        }
        self.processing_time_ms = Some(processing_time_ms);
        self.error = Some(error.into());
        true
    }
}
