//! Exception strategy for unrecoverable pipeline failures
//!
//! Checkpoint failures never reach this handler; they are abandoned by the
//! checkpointer.

use contracts::{ContractError, ExceptionStrategy};
use tracing::{error, warn};

/// Exit code used by the `exit` strategy
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Process-level actions, injectable for tests
#[trait_variant::make(ProcessControl: Send)]
pub trait LocalProcessControl {
    /// Terminate the process
    fn exit(&self, code: i32);

    /// Suspend the caller indefinitely
    async fn block(&self);
}

/// The real process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn exit(&self, code: i32) {
        std::process::exit(code)
    }

    async fn block(&self) {
        std::future::pending::<()>().await
    }
}

/// Reaction to a failed unit of work
#[trait_variant::make(FailureHandler: Send)]
pub trait LocalFailureHandler {
    /// Called once per failed record; the record is not acknowledged
    async fn on_failure(&self, position: &str, error: &ContractError);
}

/// `FailureHandler` applying an [`ExceptionStrategy`]
#[derive(Debug, Clone)]
pub struct ExceptionHandler<C = SystemProcess> {
    strategy: ExceptionStrategy,
    control: C,
}

impl ExceptionHandler<SystemProcess> {
    pub fn new(strategy: ExceptionStrategy) -> Self {
        Self::with_control(strategy, SystemProcess)
    }
}

impl<C> ExceptionHandler<C> {
    pub fn with_control(strategy: ExceptionStrategy, control: C) -> Self {
        Self { strategy, control }
    }

    pub fn strategy(&self) -> ExceptionStrategy {
        self.strategy
    }
}

impl<C: ProcessControl + Sync> FailureHandler for ExceptionHandler<C> {
    async fn on_failure(&self, position: &str, error: &ContractError) {
        match self.strategy {
            ExceptionStrategy::Exit => {
                error!(
                    position,
                    kind = %error.kind(),
                    error = %error,
                    "Pipeline failed, exiting; processing resumes from the last checkpoint"
                );
                self.control.exit(FAILURE_EXIT_CODE);
            }
            ExceptionStrategy::Block => {
                error!(
                    position,
                    kind = %error.kind(),
                    error = %error,
                    "Pipeline failed, blocking consumer until restarted"
                );
                self.control.block().await;
            }
            ExceptionStrategy::Continue => {
                warn!(
                    position,
                    kind = %error.kind(),
                    error = %error,
                    "Pipeline failed, skipping record without acknowledging it"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ExceptionHandler, FailureHandler, ProcessControl, FAILURE_EXIT_CODE};
    use contracts::{ContractError, ExceptionStrategy};
    use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct RecordingControl {
        exit_code: Arc<AtomicI32>,
        blocks: Arc<AtomicU64>,
    }

    impl ProcessControl for RecordingControl {
        fn exit(&self, code: i32) {
            self.exit_code.store(code, Ordering::SeqCst);
        }

        async fn block(&self) {
            self.blocks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn failure() -> ContractError {
        ContractError::pipeline("dispatch", "sink down")
    }

    #[tokio::test]
    async fn test_exit_strategy_exits() {
        let control = RecordingControl::default();
        let handler = ExceptionHandler::with_control(ExceptionStrategy::Exit, control.clone());

        handler.on_failure("7", &failure()).await;

        assert_eq!(control.exit_code.load(Ordering::SeqCst), FAILURE_EXIT_CODE);
        assert_eq!(control.blocks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_block_strategy_blocks() {
        let control = RecordingControl::default();
        let handler = ExceptionHandler::with_control(ExceptionStrategy::Block, control.clone());

        handler.on_failure("7", &failure()).await;

        assert_eq!(control.blocks.load(Ordering::SeqCst), 1);
        assert_eq!(control.exit_code.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_continue_strategy_only_logs() {
        let control = RecordingControl::default();
        let handler = ExceptionHandler::with_control(ExceptionStrategy::Continue, control.clone());

        handler.on_failure("7", &failure()).await;

        assert_eq!(control.blocks.load(Ordering::SeqCst), 0);
        assert_eq!(control.exit_code.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_system_block_never_returns() {
        let handler = ExceptionHandler::new(ExceptionStrategy::Block);
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            handler.on_failure("7", &failure()),
        )
        .await;
        assert!(blocked.is_err());
    }
}
