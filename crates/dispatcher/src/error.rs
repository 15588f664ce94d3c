//! Dispatcher error types

use contracts::ContractError;
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink could not be built from its configuration
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Sink name not present in the registry
    #[error("unknown sink '{0}'")]
    UnknownSink(String),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl DispatcherError {
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<DispatcherError> for ContractError {
    fn from(err: DispatcherError) -> Self {
        match err {
            DispatcherError::Contract(inner) => inner,
            DispatcherError::SinkCreation { name, message } => {
                ContractError::config_validation(format!("sinks.{name}"), message)
            }
            DispatcherError::UnknownSink(name) => {
                ContractError::config_validation("sinks", format!("unknown sink '{name}'"))
            }
        }
    }
}
