//! # Unit of Work
//!
//! Ties the acknowledgment of a source record to the terminal success of
//! the pipeline that consumed it.
//!
//! ## Guarantees
//! - The ack fires at most once, and only after the pipeline fully succeeded
//! - Checkpoint commits retry `StoreUnavailable` on a fixed delay and are
//!   abandoned (never fatal) otherwise
//! - Pipeline failures go through the configured exception strategy

pub mod checkpoint;
pub mod consumer;
pub mod exception;
pub mod pipeline;
pub mod store;
pub mod unit;

pub use checkpoint::{CheckpointStatus, Checkpointer};
pub use consumer::{ConsumerSummary, ShardConsumer};
pub use exception::{ExceptionHandler, FailureHandler, ProcessControl, SystemProcess};
pub use pipeline::{DispatchPipeline, PipelineReport, RecordPipeline, SinkReport, SourceRecord};
pub use store::FileCheckpointStore;
pub use unit::{UnitOfWork, UnitOutcome};
