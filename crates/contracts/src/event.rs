//! Event - the unit of delivery
//!
//! The dispatcher never looks inside `payload`; it only needs the identity
//! and the serialized bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::EventId;

/// Ordered events submitted together in one request
pub type Batch = Vec<Event>;

/// Identity-bearing payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Stable identity, unique within a batch
    pub id: EventId,

    /// Serialized payload (zero-copy)
    pub payload: Bytes,

    /// Routing key for stream sinks (falls back to `id`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl Event {
    /// Create an event without a partition key
    pub fn new(id: impl Into<EventId>, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            partition_key: None,
        }
    }

    /// Set the partition key
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Partition key used by stream sinks
    pub fn routing_key(&self) -> &str {
        self.partition_key.as_deref().unwrap_or(self.id.as_str())
    }
}
