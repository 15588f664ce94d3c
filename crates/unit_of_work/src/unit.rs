//! UnitOfWork - one source record, one pipeline run, at most one ack

use std::sync::Arc;

use contracts::ContractError;
use tracing::{debug, error, instrument};

use crate::checkpoint::CheckpointStatus;
use crate::exception::FailureHandler;
use crate::pipeline::{PipelineReport, RecordPipeline, SourceRecord};

/// How a unit of work ended
#[derive(Debug)]
pub enum UnitOutcome {
    /// Pipeline succeeded and the ack ran
    Acknowledged {
        report: PipelineReport,
        checkpoint: CheckpointStatus,
    },
    /// Pipeline failed; the failure handler ran and the ack did not
    Failed(ContractError),
}

impl UnitOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }
}

/// Binds the acknowledgment of one source record to its pipeline run
///
/// `run` consumes the unit, so the ack can fire at most once.
pub struct UnitOfWork<A, H> {
    ack: A,
    handler: Arc<H>,
}

impl<A, H> UnitOfWork<A, H>
where
    A: FnOnce() -> CheckpointStatus + Send + 'static,
    H: FailureHandler + Sync,
{
    pub fn new(ack: A, handler: Arc<H>) -> Self {
        Self { ack, handler }
    }

    /// Push `record` through `pipeline`; ack only on full success
    ///
    /// The ack runs on the blocking pool since checkpoint retries sleep the
    /// thread.
    #[instrument(
        name = "unit_of_work_run",
        skip(self, record, pipeline),
        fields(position = %record.position, pipeline = %pipeline.name())
    )]
    pub async fn run<P: RecordPipeline + Sync>(self, record: SourceRecord, pipeline: &P) -> UnitOutcome {
        let report = match pipeline.process(&record).await {
            Ok(report) => report,
            Err(err) => {
                self.handler.on_failure(&record.position, &err).await;
                return UnitOutcome::Failed(err);
            }
        };

        match tokio::task::spawn_blocking(self.ack).await {
            Ok(checkpoint) => {
                debug!(checkpoint = %checkpoint, "Record acknowledged");
                UnitOutcome::Acknowledged { report, checkpoint }
            }
            Err(join_err) => {
                // The ack already started; it must not be re-run
                error!(error = %join_err, "Ack task failed");
                UnitOutcome::Failed(ContractError::pipeline(
                    "ack",
                    format!("ack task failed: {join_err}"),
                ))
            }
        }
    }
}
