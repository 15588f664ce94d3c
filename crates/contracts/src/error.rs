//! Layered error definitions
//!
//! Categorized by source: config / transport / item / checkpoint / retry

use thiserror::Error;

use crate::{ErrorKind, Outcome};

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors (transient) =====
    /// Connection failure or timeout, no response received
    #[error("sink '{sink_name}' network error: {message}")]
    Network { sink_name: String, message: String },

    /// Sink throttled the whole request
    #[error("sink '{sink_name}' throttled request: {message}")]
    Throttled { sink_name: String, message: String },

    /// Sink answered with a server-side failure
    #[error("sink '{sink_name}' busy (status {status}): {message}")]
    ServerBusy {
        sink_name: String,
        status: u16,
        message: String,
    },

    /// Some items of a bulk request are still outstanding
    #[error("sink '{sink_name}' partial failure: {outstanding} item(s) outstanding after attempt {attempt}")]
    PartialFailure {
        sink_name: String,
        outstanding: usize,
        attempt: u32,
    },

    // ===== Client Errors (fatal) =====
    /// Malformed request, never retried
    #[error("sink '{sink_name}' rejected request: {message}")]
    Client { sink_name: String, message: String },

    // ===== Checkpoint Errors =====
    /// Checkpoint backend unavailable
    #[error("checkpoint store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Checkpoint state unreadable or rejected
    #[error("checkpoint store corrupt: {message}")]
    StoreCorrupt { message: String },

    // ===== Terminal Errors =====
    /// Retry budget exhausted; `outcomes` holds diagnostics only
    #[error("retries exhausted after {attempts} attempt(s): {cause}")]
    ExhaustedRetries {
        attempts: u32,
        outcomes: Vec<Outcome>,
        #[source]
        cause: Box<ContractError>,
    },

    /// Session torn down before it resolved
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    /// Pipeline stage failure
    #[error("pipeline '{stage}' failed: {message}")]
    Pipeline { stage: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create network error
    pub fn network(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create client (malformed request) error
    pub fn client(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Client {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Create store unavailable error
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Create store corrupt error
    pub fn store_corrupt(message: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            message: message.into(),
        }
    }

    /// Create cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create pipeline stage error
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Map a whole-request HTTP status to the matching error
    pub fn from_status(sink_name: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        let sink_name = sink_name.into();
        let message = body.into();
        match status {
            429 => Self::Throttled { sink_name, message },
            400..=499 => Self::Client { sink_name, message },
            _ => Self::ServerBusy {
                sink_name,
                status,
                message,
            },
        }
    }

    /// Failure classification for retry decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } => ErrorKind::Configuration,
            Self::Network { .. } => ErrorKind::Network,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::ServerBusy { .. } => ErrorKind::ServerBusy,
            Self::PartialFailure { .. } => ErrorKind::PartialFailure,
            Self::Client { .. } => ErrorKind::Client,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::StoreCorrupt { .. } => ErrorKind::StoreCorrupt,
            Self::ExhaustedRetries { .. } => ErrorKind::ExhaustedRetries,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::Pipeline { .. } | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Partial outcomes attached to an exhausted-retries error
    pub fn partial_outcomes(&self) -> &[Outcome] {
        match self {
            Self::ExhaustedRetries { outcomes, .. } => outcomes,
            _ => &[],
        }
    }
}
