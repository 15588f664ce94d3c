//! Pipeline orchestrator - wires source, dispatchers and checkpointing.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::{ContractError, PipelineBlueprint};
use dispatcher::SinkRegistry;
use observability::DeliveryStatsAggregator;
use retry::RetryStrategy;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use unit_of_work::{
    Checkpointer, DispatchPipeline, ExceptionHandler, FileCheckpointStore, PipelineReport,
    RecordPipeline, ShardConsumer, SourceRecord,
};

use super::{NdjsonSource, RunStats};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The pipeline blueprint
    pub blueprint: PipelineBlueprint,

    /// Force checkpoint dry mode
    pub dry_run: bool,

    /// Records buffered between the source and the consumer
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Checkpoint file: configured path, or `<source>.checkpoint.json`
    pub fn checkpoint_path(blueprint: &PipelineBlueprint) -> PathBuf {
        blueprint.checkpoint.path.clone().unwrap_or_else(|| {
            let mut path = blueprint.source.path.clone().into_os_string();
            path.push(".checkpoint.json");
            PathBuf::from(path)
        })
    }

    /// Run until the source is exhausted or `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Sinks
        let registry = SinkRegistry::new();
        let strategy = RetryStrategy::from_config(&blueprint.delivery);
        let dispatch = DispatchPipeline::from_registry(&registry, &blueprint.sinks, &strategy, &shutdown)
            .context("Failed to create sink clients")?;
        let delivery_stats = Arc::new(Mutex::new(DeliveryStatsAggregator::new()));
        let pipeline = Arc::new(RecordingPipeline {
            inner: dispatch,
            stats: Arc::clone(&delivery_stats),
        });
        info!(sinks = registry.len(), "Sink clients ready");

        // Checkpointing
        let checkpoint_path = Self::checkpoint_path(blueprint);
        let mut checkpoint_config = blueprint.checkpoint.clone();
        checkpoint_config.dry |= self.config.dry_run;
        let checkpointer = Arc::new(Checkpointer::new(
            Arc::new(FileCheckpointStore::new(&checkpoint_path)),
            &checkpoint_config,
        ));
        if checkpointer.is_dry() {
            warn!("Checkpoint dry mode, progress will not be persisted");
        }
        let resumed_after = resume_line(&checkpointer)
            .with_context(|| format!("Failed to read checkpoint {}", checkpoint_path.display()))?;

        // Source -> consumer
        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));
        let source = NdjsonSource::from_config(&blueprint.source).resume_after(resumed_after);
        let reader = tokio::spawn(source.stream(tx, shutdown.clone()));

        let consumer = ShardConsumer::new(
            blueprint.source.path.display().to_string(),
            pipeline,
            checkpointer,
            Arc::new(ExceptionHandler::new(blueprint.exception_strategy)),
            shutdown.clone(),
        );

        info!(
            source = %blueprint.source.path.display(),
            resumed_after,
            checkpoint = %checkpoint_path.display(),
            "Pipeline running"
        );
        let consumer_summary = consumer.run(rx).await;

        let events_read = reader
            .await
            .context("Source task failed")?
            .with_context(|| format!("Failed to read source {}", blueprint.source.path.display()))?;

        let delivery = delivery_stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary();

        let stats = RunStats {
            events_read,
            consumer: consumer_summary,
            delivery,
            resumed_after,
            duration: start_time.elapsed(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            throughput = format!("{:.2}", stats.throughput()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Line number after the last committed checkpoint
fn resume_line(checkpointer: &Checkpointer) -> Result<u64, ContractError> {
    match checkpointer.last_position()? {
        None => Ok(0),
        Some(position) => position.parse().map_err(|_| {
            ContractError::store_corrupt(format!("checkpoint position '{position}' is not a line number"))
        }),
    }
}

/// Folds every pipeline run into the delivery aggregator
struct RecordingPipeline<P> {
    inner: P,
    stats: Arc<Mutex<DeliveryStatsAggregator>>,
}

impl<P: RecordPipeline + Sync> RecordPipeline for RecordingPipeline<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, record: &SourceRecord) -> Result<PipelineReport, ContractError> {
        let started = Instant::now();
        let result = self.inner.process(record).await;

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        match &result {
            Ok(reports) => {
                for sink in reports {
                    stats.update(&sink.sink, &sink.report, sink.elapsed_ms);
                }
            }
            Err(_) => stats.record_failure(started.elapsed().as_secs_f64() * 1000.0),
        }
        drop(stats);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{CheckpointStore, SinkConfig, SinkType, SourceConfig};
    use std::io::Write;

    fn blueprint(source: PathBuf, checkpoint: Option<PathBuf>) -> PipelineBlueprint {
        PipelineBlueprint {
            version: Default::default(),
            delivery: Default::default(),
            checkpoint: contracts::CheckpointConfig {
                path: checkpoint,
                delay_ms: 1,
                ..Default::default()
            },
            exception_strategy: contracts::ExceptionStrategy::Continue,
            source: SourceConfig {
                path: source,
                batch_size: 2,
                id_field: Some("id".to_string()),
                partition_key_field: None,
            },
            sinks: vec![SinkConfig {
                name: "audit".to_string(),
                sink_type: SinkType::Log,
                params: Default::default(),
            }],
        }
    }

    #[test]
    fn test_default_checkpoint_path() {
        let bp = blueprint(PathBuf::from("/data/events.ndjson"), None);
        assert_eq!(
            Pipeline::checkpoint_path(&bp),
            PathBuf::from("/data/events.ndjson.checkpoint.json")
        );

        let bp = blueprint(PathBuf::from("/data/events.ndjson"), Some("/tmp/cp.json".into()));
        assert_eq!(Pipeline::checkpoint_path(&bp), PathBuf::from("/tmp/cp.json"));
    }

    #[tokio::test]
    async fn test_run_delivers_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("events.ndjson");
        let mut file = std::fs::File::create(&source).unwrap();
        for i in 0..5 {
            writeln!(file, r#"{{"id": "evt-{i}"}}"#).unwrap();
        }
        drop(file);

        let config = PipelineConfig {
            blueprint: blueprint(source.clone(), None),
            dry_run: false,
            buffer_size: 4,
            metrics_port: None,
        };
        let stats = Pipeline::new(config.clone()).run(CancellationToken::new()).await.unwrap();

        assert_eq!(stats.events_read, 5);
        assert_eq!(stats.consumer.records, 3);
        assert_eq!(stats.consumer.committed, 3);
        assert_eq!(stats.delivery.delivered, 5);
        assert_eq!(stats.delivery.delivered_per_sink.get("audit"), Some(&5));

        let store = FileCheckpointStore::new(Pipeline::checkpoint_path(&config.blueprint));
        assert_eq!(store.load().unwrap().as_deref(), Some("5"));

        // Nothing left after the checkpoint
        let rerun = Pipeline::new(config).run(CancellationToken::new()).await.unwrap();
        assert_eq!(rerun.resumed_after, 5);
        assert_eq!(rerun.events_read, 0);
        assert_eq!(rerun.consumer.records, 0);
    }

    #[tokio::test]
    async fn test_dry_run_leaves_no_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("events.ndjson");
        std::fs::write(&source, "{\"id\": \"a\"}\n").unwrap();

        let config = PipelineConfig {
            blueprint: blueprint(source, None),
            dry_run: true,
            buffer_size: 1,
            metrics_port: None,
        };
        let path = Pipeline::checkpoint_path(&config.blueprint);
        let stats = Pipeline::new(config).run(CancellationToken::new()).await.unwrap();

        assert_eq!(stats.consumer.acknowledged, 1);
        assert_eq!(stats.consumer.committed, 0);
        assert!(!path.exists());
    }
}
