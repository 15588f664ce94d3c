//! Per-item results
//!
//! `ItemStatus` is what a transport hands back (positional, identity
//! optional); `Outcome` is what the dispatcher records (always keyed by
//! identity).

use serde::{Deserialize, Serialize};

use crate::EventId;

/// How the dispatcher treats one item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemClass {
    /// Final success
    Success,
    /// Final failure, dropped from later attempts
    Fatal,
    /// Eligible for the next attempt
    Retryable,
}

/// Raw per-item status returned by a transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    /// Identity echoed by the sink, when it provides one
    #[serde(default)]
    pub id: Option<EventId>,

    /// HTTP-equivalent status code
    pub status: u16,

    /// Sink-provided error description
    #[serde(default)]
    pub error: Option<String>,
}

impl ItemStatus {
    /// Positional status without echoed identity
    pub fn positional(status: u16) -> Self {
        Self {
            id: None,
            status,
            error: None,
        }
    }

    /// Status echoing the item identity
    pub fn for_id(id: impl Into<EventId>, status: u16) -> Self {
        Self {
            id: Some(id.into()),
            status,
            error: None,
        }
    }

    /// Attach an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Recorded result for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub event_id: EventId,
    pub success: bool,
    pub status_code: u16,
    pub retryable: bool,
    /// Attempt (1-based) that produced this outcome
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    /// Build an outcome from a classified item status
    pub fn classified(event_id: EventId, status: &ItemStatus, class: ItemClass, attempt: u32) -> Self {
        Self {
            event_id,
            success: class == ItemClass::Success,
            status_code: status.status,
            retryable: class == ItemClass::Retryable,
            attempt,
            message: status.error.clone(),
        }
    }

    /// Outcome for an event the sink never answered for
    pub fn missing(event_id: EventId, attempt: u32, message: impl Into<String>) -> Self {
        Self {
            event_id,
            success: false,
            status_code: 0,
            retryable: true,
            attempt,
            message: Some(message.into()),
        }
    }

    /// True for a final, non-retried failure
    pub fn is_dropped(&self) -> bool {
        !self.success && !self.retryable
    }
}

/// Terminal result of one dispatch session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// One outcome per original event, in original batch order
    pub outcomes: Vec<Outcome>,
    /// Requests issued, including the first
    pub attempts: u32,
    /// Requests issued after the first
    pub retries: u32,
}

impl DispatchReport {
    /// Number of delivered events
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    /// Number of fatally dropped events
    pub fn dropped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_dropped()).count()
    }

    /// True if every event was delivered
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }
}
