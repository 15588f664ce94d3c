//! # Integration Tests
//!
//! Integration and end-to-end tests.
//!
//! Covers:
//! - Contract snapshot tests
//! - Config -> dispatch -> checkpoint flows with mock sinks (no network)

#[cfg(test)]
mod contract_tests {
    use contracts::{ConfigVersion, ContractError, ErrorKind};

    #[test]
    fn test_contracts_compile() {
        let _ = ConfigVersion::V1;
    }

    #[test]
    fn test_error_taxonomy() {
        assert!(ContractError::from_status("s", 503, "busy").kind().is_transient());
        assert!(ContractError::from_status("s", 429, "slow down").kind().is_transient());
        assert_eq!(ContractError::from_status("s", 400, "bad").kind(), ErrorKind::Client);
        assert!(!ContractError::store_corrupt("x").kind().is_transient());
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{
        CheckpointConfig, CheckpointStore, ContractError, Event, ExceptionStrategy, ItemStatus,
        SinkTransport,
    };
    use dispatcher::{BatchDispatcher, SinkRegistry};
    use retry::{BackoffPolicy, RetryStrategy, RetryableErrorSet};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use unit_of_work::{
        Checkpointer, DispatchPipeline, ExceptionHandler, FileCheckpointStore, ProcessControl,
        ShardConsumer, SourceRecord,
    };

    /// Answers 503 for listed ids until they have failed `failures` times
    struct FlakySink {
        name: &'static str,
        failing: HashSet<&'static str>,
        failures: u64,
        seen: Mutex<Vec<(String, u64)>>,
        calls: AtomicU64,
    }

    impl FlakySink {
        fn new(name: &'static str, failing: &[&'static str], failures: u64) -> Self {
            Self {
                name,
                failing: failing.iter().copied().collect(),
                failures,
                seen: Mutex::new(Vec::new()),
                calls: AtomicU64::new(0),
            }
        }

        fn failures_of(&self, id: &str) -> u64 {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .find(|(seen, _)| seen == id)
                .map(|(_, count)| *count)
                .unwrap_or(0)
        }
    }

    impl SinkTransport for FlakySink {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut seen = self.seen.lock().unwrap();
            let statuses = batch
                .iter()
                .map(|event| {
                    let id = event.id.as_str();
                    if !self.failing.contains(id) {
                        return ItemStatus::positional(200);
                    }
                    let index = match seen.iter().position(|(seen, _)| seen == id) {
                        Some(index) => index,
                        None => {
                            seen.push((id.to_string(), 0));
                            seen.len() - 1
                        }
                    };
                    let failed = &mut seen[index].1;
                    if *failed < self.failures {
                        *failed += 1;
                        ItemStatus::positional(503).with_error("busy")
                    } else {
                        ItemStatus::positional(200)
                    }
                })
                .collect();
            Ok(statuses)
        }
    }

    #[derive(Default, Clone)]
    struct RecordingControl {
        exit_code: Arc<AtomicI32>,
    }

    impl ProcessControl for RecordingControl {
        fn exit(&self, code: i32) {
            self.exit_code.store(code, Ordering::SeqCst);
        }

        async fn block(&self) {}
    }

    fn strategy(max_attempts: u32) -> RetryStrategy {
        RetryStrategy::new(BackoffPolicy::fixed(1), max_attempts, RetryableErrorSet::any())
    }

    fn file_checkpointer(dir: &tempfile::TempDir) -> (Arc<FileCheckpointStore>, Arc<Checkpointer>) {
        let store = Arc::new(FileCheckpointStore::new(dir.path().join("checkpoint.json")));
        let config = CheckpointConfig {
            delay_ms: 1,
            ..Default::default()
        };
        let checkpointer = Arc::new(Checkpointer::new(store.clone(), &config));
        (store, checkpointer)
    }

    fn record(position: &str, ids: &[&str]) -> SourceRecord {
        let events = ids
            .iter()
            .map(|id| Event::new(*id, format!(r#"{{"id":"{id}"}}"#)))
            .collect();
        SourceRecord::new(position, events)
    }

    async fn feed(records: Vec<SourceRecord>) -> mpsc::Receiver<SourceRecord> {
        let (tx, rx) = mpsc::channel(records.len().max(1));
        for record in records {
            tx.send(record).await.unwrap();
        }
        rx
    }

    /// Config file -> registry-built log sinks -> file checkpoint
    #[tokio::test]
    async fn test_e2e_config_to_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = r#"
exception_strategy = "continue"

[delivery]
max_attempts = 3
backoff_policy = "fixed"
delay_or_seed = 1

[source]
path = "events.ndjson"

[[sinks]]
name = "audit"
sink_type = "log"

[[sinks]]
name = "mirror"
sink_type = "log"
"#;
        let blueprint = ConfigLoader::load_from_str(config, ConfigFormat::Toml).unwrap();

        let registry = SinkRegistry::new();
        let shutdown = CancellationToken::new();
        let pipeline = DispatchPipeline::from_registry(
            &registry,
            &blueprint.sinks,
            &RetryStrategy::from_config(&blueprint.delivery),
            &shutdown,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);

        let (store, checkpointer) = file_checkpointer(&dir);
        let consumer = ShardConsumer::new(
            "shard-0",
            Arc::new(pipeline),
            checkpointer,
            Arc::new(ExceptionHandler::new(blueprint.exception_strategy)),
            shutdown,
        );

        let rx = feed(vec![record("2", &["a", "b"]), record("4", &["c", "d"])]).await;
        let summary = consumer.run(rx).await;

        assert_eq!(summary.acknowledged, 2);
        assert_eq!(summary.committed, 2);
        assert_eq!(store.load().unwrap().as_deref(), Some("4"));
    }

    /// A retryable subset is resent until it succeeds, then the record is acked
    #[tokio::test]
    async fn test_e2e_flaky_sink_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FlakySink::new("flaky", &["b"], 2));
        let pipeline = DispatchPipeline::new(
            "e2e",
            vec![BatchDispatcher::from_shared(Arc::clone(&sink), strategy(5))],
        );
        let (store, checkpointer) = file_checkpointer(&dir);
        let consumer = ShardConsumer::new(
            "shard-0",
            Arc::new(pipeline),
            checkpointer,
            Arc::new(ExceptionHandler::new(ExceptionStrategy::Continue)),
            CancellationToken::new(),
        );

        let summary = consumer.run(feed(vec![record("3", &["a", "b", "c"])]).await).await;

        assert_eq!(summary.acknowledged, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.failures_of("b"), 2);
        assert_eq!(store.load().unwrap().as_deref(), Some("3"));
    }

    /// Exhausted retries leave the record unacknowledged; `continue` moves on
    #[tokio::test]
    async fn test_e2e_exhausted_record_not_acknowledged() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(FlakySink::new("stuck", &["x"], u64::MAX));
        let pipeline = DispatchPipeline::new(
            "e2e",
            vec![BatchDispatcher::from_shared(Arc::clone(&sink), strategy(3))],
        );
        let (store, checkpointer) = file_checkpointer(&dir);
        let consumer = ShardConsumer::new(
            "shard-0",
            Arc::new(pipeline),
            checkpointer,
            Arc::new(ExceptionHandler::new(ExceptionStrategy::Continue)),
            CancellationToken::new(),
        );

        let rx = feed(vec![record("1", &["x"]), record("2", &["y"])]).await;
        let summary = consumer.run(rx).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.acknowledged, 1);
        assert_eq!(summary.last_position.as_deref(), Some("2"));
        assert_eq!(sink.failures_of("x"), 3);
        assert_eq!(store.load().unwrap().as_deref(), Some("2"));
    }

    /// `exit` terminates on the first failure, before any checkpoint
    #[tokio::test]
    async fn test_e2e_exit_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FlakySink::new("stuck", &["x"], u64::MAX);
        let pipeline = DispatchPipeline::new("e2e", vec![BatchDispatcher::new(sink, strategy(2))]);
        let control = RecordingControl::default();
        let (store, checkpointer) = file_checkpointer(&dir);
        let consumer = ShardConsumer::new(
            "shard-0",
            Arc::new(pipeline),
            checkpointer,
            Arc::new(ExceptionHandler::with_control(ExceptionStrategy::Exit, control.clone())),
            CancellationToken::new(),
        );

        let summary = consumer.run(feed(vec![record("1", &["x"])]).await).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(control.exit_code.load(Ordering::SeqCst), unit_of_work::exception::FAILURE_EXIT_CODE);
        assert_eq!(store.load().unwrap(), None);
    }

    /// One failing sink fails the whole record even if the others delivered
    #[tokio::test]
    async fn test_e2e_fan_out_requires_every_sink() {
        let healthy = Arc::new(FlakySink::new("healthy", &[], 0));
        let stuck = Arc::new(FlakySink::new("stuck", &["a"], u64::MAX));
        let pipeline = DispatchPipeline::new(
            "e2e",
            vec![
                BatchDispatcher::from_shared(Arc::clone(&healthy), strategy(2)),
                BatchDispatcher::from_shared(Arc::clone(&stuck), strategy(2)),
            ],
        );
        let dir = tempfile::tempdir().unwrap();
        let (store, checkpointer) = file_checkpointer(&dir);
        let consumer = ShardConsumer::new(
            "shard-0",
            Arc::new(pipeline),
            checkpointer,
            Arc::new(ExceptionHandler::new(ExceptionStrategy::Continue)),
            CancellationToken::new(),
        );

        let summary = consumer.run(feed(vec![record("1", &["a"])]).await).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.acknowledged, 0);
        assert_eq!(store.load().unwrap(), None);
    }
}
