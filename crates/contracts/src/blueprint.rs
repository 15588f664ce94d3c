//! PipelineBlueprint - Config Loader output
//!
//! Describes one delivery pipeline: retry policy, checkpointing, exception
//! strategy, the NDJSON source and the sinks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use validator::Validate;

use crate::ErrorKind;

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineBlueprint {
    /// Configuration version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Retry behaviour of every dispatch session
    #[serde(default)]
    #[validate(nested)]
    pub delivery: DeliveryConfig,

    /// Checkpoint retry behaviour
    #[serde(default)]
    #[validate(nested)]
    pub checkpoint: CheckpointConfig,

    /// What to do when a pipeline fails for a reason other than checkpointing
    #[serde(default)]
    pub exception_strategy: ExceptionStrategy,

    /// Event source
    #[validate(nested)]
    pub source: SourceConfig,

    /// Output routing
    #[validate(length(min = 1, message = "at least one sink is required"), nested)]
    pub sinks: Vec<SinkConfig>,
}

/// Backoff policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

/// Dispatch retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DeliveryConfig {
    /// Attempts per session, the first send included
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Backoff policy
    #[serde(default)]
    pub backoff_policy: BackoffKind,

    /// Milliseconds for fixed/linear, seed seconds for exponential
    #[serde(default = "default_delay_or_seed")]
    #[validate(range(min = 0.0))]
    pub delay_or_seed: f64,

    /// Error kinds that may be retried (empty = any)
    ///
    /// Outstanding bulk items report `throttled` when all of them got 429,
    /// `server_busy` when all got 429 or 5xx, and `partial_failure` otherwise.
    #[serde(default)]
    pub retryable_error_kinds: Vec<ErrorKind>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_or_seed() -> f64 {
    1.0
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_policy: BackoffKind::default(),
            delay_or_seed: default_delay_or_seed(),
            retryable_error_kinds: Vec::new(),
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct CheckpointConfig {
    /// Commit attempts before giving up
    #[serde(default = "default_checkpoint_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    /// Fixed delay between commit attempts
    #[serde(default = "default_checkpoint_delay_ms")]
    pub delay_ms: u64,

    /// Skip commits entirely
    #[serde(default)]
    pub dry: bool,

    /// Checkpoint file (file store)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_checkpoint_attempts() -> u32 {
    30
}

fn default_checkpoint_delay_ms() -> u64 {
    3000
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_checkpoint_attempts(),
            delay_ms: default_checkpoint_delay_ms(),
            dry: false,
            path: None,
        }
    }
}

/// Reaction to an unrecoverable pipeline failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStrategy {
    /// Terminate the process; the supervisor restarts from the last checkpoint
    #[default]
    Exit,
    /// Stall the consumer until an operator intervenes
    Block,
    /// Log and move on without acknowledging the failed record
    Continue,
}

/// NDJSON source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Input file, one JSON event per line
    pub path: PathBuf,

    /// Events per dispatch batch
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: usize,

    /// Field holding the event id (`line-<n>` when absent)
    #[serde(default)]
    pub id_field: Option<String>,

    /// Field holding the partition key
    #[serde(default)]
    pub partition_key_field: Option<String>,
}

fn default_batch_size() -> usize {
    100
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Sink name, also the registry key
    #[validate(length(min = 1, message = "sink name cannot be empty"))]
    pub name: String,

    /// Sink type
    pub sink_type: SinkType,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl SinkConfig {
    /// Look up a parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Search-engine `_bulk` endpoint
    SearchBulk,
    /// Stream service batch-put endpoint
    RecordStream,
    /// Log every batch, accept everything
    Log,
}

impl SinkType {
    /// Parameters that must be present
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Self::SearchBulk => &["url", "index"],
            Self::RecordStream => &["url", "stream_name"],
            Self::Log => &[],
        }
    }
}
