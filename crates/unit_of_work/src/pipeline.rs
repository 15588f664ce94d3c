//! Record pipelines
//!
//! A pipeline consumes one source record and reports terminal success or
//! failure. `DispatchPipeline` is the standard one: it delivers the record's
//! events to every configured sink.

use std::time::Instant;

use contracts::{Batch, ContractError, DispatchReport, SinkConfig, SinkTransport};
use dispatcher::{BatchDispatcher, SinkClient, SinkRegistry};
use retry::RetryStrategy;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// One record read from a source, with the position that acknowledges it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    /// Checkpoint position committed once the record is fully processed
    pub position: String,
    pub events: Batch,
}

impl SourceRecord {
    pub fn new(position: impl Into<String>, events: Batch) -> Self {
        Self {
            position: position.into(),
            events,
        }
    }
}

/// Result of one sink's dispatch session
#[derive(Debug, Clone, PartialEq)]
pub struct SinkReport {
    pub sink: String,
    pub report: DispatchReport,
    pub elapsed_ms: f64,
}

/// Per-sink reports, in sink configuration order
pub type PipelineReport = Vec<SinkReport>;

/// Consumer pipeline
#[trait_variant::make(RecordPipeline: Send)]
pub trait LocalRecordPipeline {
    fn name(&self) -> &str;

    /// Process one record to terminal success or failure
    async fn process(&self, record: &SourceRecord) -> Result<PipelineReport, ContractError>;
}

/// Fans each record out to every sink, one dispatch session per sink
pub struct DispatchPipeline<T = SinkClient> {
    name: String,
    dispatchers: Vec<BatchDispatcher<T>>,
}

impl DispatchPipeline<SinkClient> {
    /// Build one dispatcher per sink, sharing clients through `registry`
    pub fn from_registry(
        registry: &SinkRegistry,
        sinks: &[SinkConfig],
        strategy: &RetryStrategy,
        cancel: &CancellationToken,
    ) -> Result<Self, ContractError> {
        let mut dispatchers = Vec::with_capacity(sinks.len());
        for config in sinks {
            let client = registry.get_or_create(config)?;
            dispatchers.push(
                BatchDispatcher::from_shared(client, strategy.clone())
                    .with_cancellation(cancel.child_token()),
            );
        }
        Ok(Self::new("dispatch", dispatchers))
    }
}

impl<T: SinkTransport + Sync + 'static> DispatchPipeline<T> {
    pub fn new(name: impl Into<String>, dispatchers: Vec<BatchDispatcher<T>>) -> Self {
        Self {
            name: name.into(),
            dispatchers,
        }
    }

    pub fn dispatchers(&self) -> &[BatchDispatcher<T>] {
        &self.dispatchers
    }
}

impl<T: SinkTransport + Sync + 'static> RecordPipeline for DispatchPipeline<T> {
    fn name(&self) -> &str {
        &self.name
    }

    /// Succeeds only when every sink session succeeds
    ///
    /// The first failing session aborts the others; the record is then
    /// redelivered as a whole, so sinks that already succeeded see it again.
    #[instrument(
        name = "dispatch_pipeline_process",
        skip(self, record),
        fields(position = %record.position, events = record.events.len(), sinks = self.dispatchers.len())
    )]
    async fn process(&self, record: &SourceRecord) -> Result<PipelineReport, ContractError> {
        let mut sessions = JoinSet::new();
        for (index, dispatcher) in self.dispatchers.iter().enumerate() {
            let dispatcher = dispatcher.clone();
            let batch = record.events.clone();
            sessions.spawn(async move {
                let started = Instant::now();
                let result = dispatcher.dispatch(batch).await;
                (index, dispatcher.sink_name().to_string(), result, started.elapsed())
            });
        }

        let mut reports: Vec<(usize, SinkReport)> = Vec::with_capacity(self.dispatchers.len());
        while let Some(joined) = sessions.join_next().await {
            let (index, sink, result, elapsed) =
                joined.map_err(|e| ContractError::pipeline(&self.name, format!("dispatch task failed: {e}")))?;
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

            match result {
                Ok(report) => {
                    debug!(sink = %sink, attempts = report.attempts, "Sink session resolved");
                    reports.push((index, SinkReport { sink, report, elapsed_ms }));
                }
                Err(err) => {
                    warn!(sink = %sink, error = %err, "Sink session failed, aborting the others");
                    return Err(err);
                }
            }
        }

        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }
}
