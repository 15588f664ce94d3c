//! LogSink - logs batch summaries via tracing

use contracts::{ContractError, Event, ItemStatus, SinkTransport};
use tracing::{debug, info, instrument};

/// Sink that logs every batch and accepts every event
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SinkTransport for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_send",
        skip(self, batch),
        fields(sink = %self.name, events = batch.len())
    )]
    async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError> {
        let bytes: usize = batch.iter().map(|e| e.payload.len()).sum();
        info!(
            sink = %self.name,
            events = batch.len(),
            bytes,
            first = batch.first().map(|e| e.id.as_str()).unwrap_or(""),
            last = batch.last().map(|e| e.id.as_str()).unwrap_or(""),
            "Batch received"
        );
        for event in batch {
            debug!(event_id = %event.id, partition_key = event.routing_key(), "Event");
        }

        Ok(batch
            .iter()
            .map(|event| ItemStatus::for_id(event.id.clone(), 200))
            .collect())
    }
}
