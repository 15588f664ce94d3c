//! Checkpointer - bounded-retry commit of consumer progress
//!
//! Runs on the consumer's blocking thread: the retry waits are thread
//! sleeps, never tokio timers.

use std::fmt;
use std::sync::Arc;

use contracts::{CheckpointConfig, CheckpointStore, ContractError, ErrorKind};
use retry::{BackoffPolicy, RetryStrategy, RetryableErrorSet};
use tracing::{debug, error, info, instrument, warn};

/// Result of one checkpoint action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    Committed,
    /// Dry mode, nothing written
    Skipped,
    /// Store failed with a non-retryable error
    Abandoned,
    /// Store stayed unavailable for every attempt
    Exhausted,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Skipped => "skipped",
            Self::Abandoned => "abandoned",
            Self::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commits positions through a [`CheckpointStore`]
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    strategy: RetryStrategy,
    dry: bool,
}

impl Checkpointer {
    /// Fixed-delay retry on `StoreUnavailable` only, as configured
    pub fn new(store: Arc<dyn CheckpointStore>, config: &CheckpointConfig) -> Self {
        let strategy = RetryStrategy::new(
            BackoffPolicy::fixed(config.delay_ms),
            config.max_attempts,
            RetryableErrorSet::of([ErrorKind::StoreUnavailable]),
        );
        Self::with_strategy(store, strategy, config.dry)
    }

    pub fn with_strategy(store: Arc<dyn CheckpointStore>, strategy: RetryStrategy, dry: bool) -> Self {
        Self { store, strategy, dry }
    }

    pub fn is_dry(&self) -> bool {
        self.dry
    }

    /// Commit `position`, blocking the calling thread between attempts
    ///
    /// Never fails: errors are logged and reported through the status.
    #[instrument(name = "checkpoint", skip(self), fields(store = %self.store.name()))]
    pub fn checkpoint(&self, position: &str) -> CheckpointStatus {
        let status = if self.dry {
            debug!(position, "Dry mode, checkpoint skipped");
            CheckpointStatus::Skipped
        } else {
            match self
                .strategy
                .run_blocking("checkpoint", || self.store.commit(position))
            {
                Ok(()) => {
                    info!(position, "Checkpoint committed");
                    CheckpointStatus::Committed
                }
                Err(ContractError::ExhaustedRetries { attempts, cause, .. }) => {
                    error!(
                        position,
                        attempts,
                        error = %cause,
                        "Checkpoint store unavailable, giving up on this checkpoint"
                    );
                    CheckpointStatus::Exhausted
                }
                Err(err) => {
                    warn!(
                        position,
                        kind = %err.kind(),
                        error = %err,
                        "Checkpoint failed, abandoning it"
                    );
                    CheckpointStatus::Abandoned
                }
            }
        };

        observability::record_checkpoint(status.as_str());
        status
    }

    /// Ack action committing `position`
    pub fn ack_for(self: &Arc<Self>, position: impl Into<String>) -> impl FnOnce() -> CheckpointStatus + Send + 'static {
        let checkpointer = Arc::clone(self);
        let position = position.into();
        move || checkpointer.checkpoint(&position)
    }

    /// Last committed position
    pub fn last_position(&self) -> Result<Option<String>, ContractError> {
        self.store.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails the first `failures` commits with the given error
    struct FlakyStore {
        failures: u32,
        corrupt: bool,
        calls: Mutex<u32>,
        committed: Mutex<Option<String>>,
    }

    impl FlakyStore {
        fn new(failures: u32, corrupt: bool) -> Arc<Self> {
            Arc::new(Self {
                failures,
                corrupt,
                calls: Mutex::new(0),
                committed: Mutex::new(None),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl CheckpointStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        fn commit(&self, position: &str) -> Result<(), ContractError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls <= self.failures {
                return Err(if self.corrupt {
                    ContractError::store_corrupt("lease lost")
                } else {
                    ContractError::store_unavailable("connection refused")
                });
            }
            *self.committed.lock().unwrap() = Some(position.to_string());
            Ok(())
        }

        fn load(&self) -> Result<Option<String>, ContractError> {
            Ok(self.committed.lock().unwrap().clone())
        }
    }

    fn config(max_attempts: u32) -> CheckpointConfig {
        CheckpointConfig {
            max_attempts,
            delay_ms: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_retries_unavailable_store() {
        let store = FlakyStore::new(2, false);
        let checkpointer = Checkpointer::new(store.clone(), &config(30));

        assert_eq!(checkpointer.checkpoint("10"), CheckpointStatus::Committed);
        assert_eq!(store.calls(), 3);
        assert_eq!(checkpointer.last_position().unwrap().as_deref(), Some("10"));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let store = FlakyStore::new(u32::MAX, false);
        let checkpointer = Checkpointer::new(store.clone(), &config(5));

        assert_eq!(checkpointer.checkpoint("10"), CheckpointStatus::Exhausted);
        assert_eq!(store.calls(), 5);
    }

    #[test]
    fn test_corrupt_store_abandoned_without_retry() {
        let store = FlakyStore::new(1, true);
        let checkpointer = Checkpointer::new(store.clone(), &config(30));

        assert_eq!(checkpointer.checkpoint("10"), CheckpointStatus::Abandoned);
        assert_eq!(store.calls(), 1);
    }

    #[test]
    fn test_dry_mode_skips_store() {
        let store = FlakyStore::new(0, false);
        let dry = CheckpointConfig {
            dry: true,
            ..config(30)
        };
        let checkpointer = Checkpointer::new(store.clone(), &dry);

        assert_eq!(checkpointer.checkpoint("10"), CheckpointStatus::Skipped);
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn test_ack_for_commits_position() {
        let store = FlakyStore::new(0, false);
        let checkpointer = Arc::new(Checkpointer::new(store.clone(), &config(3)));

        let ack = checkpointer.ack_for("99");
        assert_eq!(ack(), CheckpointStatus::Committed);
        assert_eq!(store.load().unwrap().as_deref(), Some("99"));
    }
}
