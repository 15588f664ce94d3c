//! ShardConsumer - drives the records of one shard through units of work

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::checkpoint::{CheckpointStatus, Checkpointer};
use crate::exception::FailureHandler;
use crate::pipeline::{RecordPipeline, SourceRecord};
use crate::unit::{UnitOfWork, UnitOutcome};

/// Counters for one consumer run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    pub records: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub committed: u64,
    pub checkpoint_failures: u64,
    /// Set when the run ended on the shutdown token
    pub interrupted: bool,
    /// Last position handed to a successful ack
    pub last_position: Option<String>,
}

/// Sequential consumer of one shard
///
/// Records are processed one at a time, in order; each gets its own unit of
/// work acknowledged through the checkpointer.
pub struct ShardConsumer<P, H> {
    shard_id: String,
    pipeline: Arc<P>,
    checkpointer: Arc<Checkpointer>,
    handler: Arc<H>,
    shutdown: CancellationToken,
}

impl<P, H> ShardConsumer<P, H>
where
    P: RecordPipeline + Sync,
    H: FailureHandler + Sync,
{
    pub fn new(
        shard_id: impl Into<String>,
        pipeline: Arc<P>,
        checkpointer: Arc<Checkpointer>,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shard_id: shard_id.into(),
            pipeline,
            checkpointer,
            handler,
            shutdown,
        }
    }

    /// Consume until the channel closes or shutdown is requested
    ///
    /// Shutdown drops the record in flight unacknowledged.
    #[instrument(name = "shard_consumer_run", skip(self, records), fields(shard = %self.shard_id))]
    pub async fn run(self, mut records: mpsc::Receiver<SourceRecord>) -> ConsumerSummary {
        let mut summary = ConsumerSummary::default();
        info!("Shard consumer started");

        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                next = records.recv() => match next {
                    Some(record) => record,
                    None => break,
                },
            };

            summary.records += 1;
            let position = record.position.clone();
            let unit = UnitOfWork::new(
                self.checkpointer.ack_for(position.clone()),
                Arc::clone(&self.handler),
            );

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    warn!(position = %position, "Shutdown during processing, record left unacknowledged");
                    summary.interrupted = true;
                    break;
                }
                outcome = unit.run(record, self.pipeline.as_ref()) => outcome,
            };

            match outcome {
                UnitOutcome::Acknowledged { checkpoint, .. } => {
                    summary.acknowledged += 1;
                    summary.last_position = Some(position);
                    match checkpoint {
                        CheckpointStatus::Committed => summary.committed += 1,
                        CheckpointStatus::Skipped => {}
                        CheckpointStatus::Abandoned | CheckpointStatus::Exhausted => {
                            summary.checkpoint_failures += 1
                        }
                    }
                }
                UnitOutcome::Failed(_) => summary.failed += 1,
            }
        }

        info!(
            records = summary.records,
            acknowledged = summary.acknowledged,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Shard consumer stopped"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::ShardConsumer;
    use crate::checkpoint::Checkpointer;
    use crate::exception::ExceptionHandler;
    use crate::pipeline::{PipelineReport, RecordPipeline, SourceRecord};
    use contracts::{CheckpointConfig, CheckpointStore, ContractError, Event, ExceptionStrategy};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct MemoryStore {
        commits: Mutex<Vec<String>>,
    }

    impl CheckpointStore for MemoryStore {
        fn name(&self) -> &str {
            "memory"
        }

        fn commit(&self, position: &str) -> Result<(), ContractError> {
            self.commits.lock().unwrap().push(position.to_string());
            Ok(())
        }

        fn load(&self) -> Result<Option<String>, ContractError> {
            Ok(self.commits.lock().unwrap().last().cloned())
        }
    }

    /// Fails records whose position is listed, hangs on "hang"
    struct ScriptedPipeline {
        failing: Vec<&'static str>,
    }

    impl RecordPipeline for ScriptedPipeline {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn process(&self, record: &SourceRecord) -> Result<PipelineReport, ContractError> {
            if record.position == "hang" {
                std::future::pending::<()>().await;
            }
            if self.failing.iter().any(|p| *p == record.position) {
                return Err(ContractError::pipeline("scripted", "sink down"));
            }
            Ok(Vec::new())
        }
    }

    fn consumer(
        failing: Vec<&'static str>,
        store: &Arc<MemoryStore>,
        shutdown: CancellationToken,
    ) -> ShardConsumer<ScriptedPipeline, ExceptionHandler> {
        let checkpointer = Checkpointer::new(store.clone(), &CheckpointConfig::default());
        ShardConsumer::new(
            "shard-0",
            Arc::new(ScriptedPipeline { failing }),
            Arc::new(checkpointer),
            Arc::new(ExceptionHandler::new(ExceptionStrategy::Continue)),
            shutdown,
        )
    }

    fn record(position: &str) -> SourceRecord {
        SourceRecord::new(position, vec![Event::new(position, "{}")])
    }

    #[tokio::test]
    async fn test_acks_only_successful_records() {
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = mpsc::channel(8);
        for position in ["1", "2", "3"] {
            tx.send(record(position)).await.unwrap();
        }
        drop(tx);

        let summary = consumer(vec!["2"], &store, CancellationToken::new()).run(rx).await;

        assert_eq!(summary.records, 3);
        assert_eq!(summary.acknowledged, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.committed, 2);
        assert_eq!(summary.last_position.as_deref(), Some("3"));
        assert_eq!(*store.commits.lock().unwrap(), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_record_in_flight() {
        let store = Arc::new(MemoryStore::default());
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::channel(8);
        tx.send(record("1")).await.unwrap();
        tx.send(record("hang")).await.unwrap();

        let handle = tokio::spawn(consumer(Vec::new(), &store, shutdown.clone()).run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let summary = handle.await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.acknowledged, 1);
        assert_eq!(*store.commits.lock().unwrap(), vec!["1"]);
        drop(tx);
    }
}
