//! CheckpointStore trait - consumer progress interface
//!
//! Commits are synchronous: they run on the consumer's blocking thread.

use crate::ContractError;

/// Durable consumption-progress store
pub trait CheckpointStore: Send + Sync {
    /// Store name (used for logging)
    fn name(&self) -> &str;

    /// Persist `position` as the resume point
    ///
    /// # Errors
    /// - `StoreUnavailable`: backend down, safe to retry
    /// - `StoreCorrupt`: backend state unusable, do not retry
    fn commit(&self, position: &str) -> Result<(), ContractError>;

    /// Last committed position, if any
    fn load(&self) -> Result<Option<String>, ContractError>;
}
