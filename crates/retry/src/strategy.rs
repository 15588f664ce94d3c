//! Retry strategy
//!
//! Turns a sequence of failures into either "wait, then retry" or a terminal
//! verdict. The original attempt counts as position 1.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, DeliveryConfig, ErrorKind};
use tracing::{error, warn};

use crate::backoff::{BackoffPolicy, Timer, TimerFactory};

/// Default attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Error kinds for which retry is permitted
///
/// An empty set permits every kind. Membership is polymorphic: a set holding
/// `Transient` admits `Network`, `Throttled`, ...
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryableErrorSet {
    kinds: HashSet<ErrorKind>,
}

impl RetryableErrorSet {
    /// Retry on any error
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn permits(&self, kind: ErrorKind) -> bool {
        self.kinds.is_empty() || self.kinds.iter().any(|allowed| kind.is_a(*allowed))
    }
}

/// Why a failure ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// `max_attempts` reached
    Exhausted { attempts: u32 },
    /// Failure kind outside the retryable set
    NotRetryable { attempts: u32, kind: ErrorKind },
}

impl TerminalReason {
    pub fn attempts(&self) -> u32 {
        match *self {
            Self::Exhausted { attempts } | Self::NotRetryable { attempts, .. } => attempts,
        }
    }
}

/// Decision for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then issue attempt `next_attempt`
    Proceed { delay: Duration, next_attempt: u32 },
    Terminal(TerminalReason),
}

/// Retry configuration shared by many sessions
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    timers: TimerFactory,
    max_attempts: u32,
    retryable: Arc<RetryableErrorSet>,
}

impl RetryStrategy {
    /// `max_attempts` of zero is treated as one
    pub fn new(policy: BackoffPolicy, max_attempts: u32, retryable: RetryableErrorSet) -> Self {
        Self {
            timers: TimerFactory::new(policy),
            max_attempts: max_attempts.max(1),
            retryable: Arc::new(retryable),
        }
    }

    /// Build from the `delivery` configuration section
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(
            BackoffPolicy::from_config(config.backoff_policy, config.delay_or_seed),
            config.max_attempts,
            RetryableErrorSet::of(config.retryable_error_kinds.iter().copied()),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn policy(&self) -> &BackoffPolicy {
        self.timers.policy()
    }

    pub fn retryable(&self) -> &RetryableErrorSet {
        &self.retryable
    }

    /// Start a retry session with a fresh timer
    pub fn session(&self, operation: impl Into<String>) -> RetrySession {
        RetrySession {
            operation: operation.into(),
            timer: self.timers.create(),
            max_attempts: self.max_attempts,
            retryable: Arc::clone(&self.retryable),
        }
    }

    /// Drive `op` until it succeeds or the strategy gives up
    ///
    /// Exhaustion surfaces as `ExhaustedRetries` wrapping the last failure;
    /// a non-retryable failure is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ContractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ContractError>>,
    {
        let mut session = self.session(operation);
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Err(reason) = session.on_failure(&err).await {
                        return Err(terminal_error(reason, err));
                    }
                }
            }
        }
    }

    /// Blocking variant of [`run`](Self::run) for dedicated threads
    pub fn run_blocking<T, F>(&self, operation: &str, mut op: F) -> Result<T, ContractError>
    where
        F: FnMut() -> Result<T, ContractError>,
    {
        let mut session = self.session(operation);
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Err(reason) = session.on_failure_blocking(&err) {
                        return Err(terminal_error(reason, err));
                    }
                }
            }
        }
    }
}

/// Map a terminal verdict to the error surfaced to callers
pub fn terminal_error(reason: TerminalReason, last: ContractError) -> ContractError {
    match reason {
        TerminalReason::Exhausted { attempts } => ContractError::ExhaustedRetries {
            attempts,
            outcomes: Vec::new(),
            cause: Box::new(last),
        },
        TerminalReason::NotRetryable { .. } => last,
    }
}

/// One logical retry sequence
#[derive(Debug)]
pub struct RetrySession {
    operation: String,
    timer: Timer,
    max_attempts: u32,
    retryable: Arc<RetryableErrorSet>,
}

impl RetrySession {
    /// Position of the attempt currently in flight (1-based)
    pub fn attempt(&self) -> u32 {
        self.timer.attempt()
    }

    /// Terminal verdict for a failure of the current attempt, if any
    fn evaluate(&self, failure: &ContractError) -> Option<TerminalReason> {
        let attempt = self.timer.attempt();
        let kind = failure.kind();

        if !self.retryable.permits(kind) {
            error!(
                operation = %self.operation,
                attempt,
                kind = %kind,
                error = %failure,
                "Failure is not retryable"
            );
            return Some(TerminalReason::NotRetryable {
                attempts: attempt,
                kind,
            });
        }

        if attempt >= self.max_attempts {
            error!(
                operation = %self.operation,
                attempt,
                max_attempts = self.max_attempts,
                error = %failure,
                "Retry attempts exhausted"
            );
            return Some(TerminalReason::Exhausted { attempts: attempt });
        }

        warn!(
            operation = %self.operation,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = self.timer.peek_delay().as_millis() as u64,
            error = %failure,
            "Attempt failed, retrying"
        );
        None
    }

    /// Evaluate a failure without waiting
    ///
    /// On `Proceed` the timer has advanced; the caller schedules the wait.
    pub fn decide(&mut self, failure: &ContractError) -> RetryDecision {
        match self.evaluate(failure) {
            Some(reason) => RetryDecision::Terminal(reason),
            None => RetryDecision::Proceed {
                delay: self.timer.next_delay(),
                next_attempt: self.timer.attempt(),
            },
        }
    }

    /// Evaluate a failure and, if retrying, wait on the tokio timer
    ///
    /// Returns the next attempt number, or the terminal verdict.
    pub async fn on_failure(&mut self, failure: &ContractError) -> Result<u32, TerminalReason> {
        if let Some(reason) = self.evaluate(failure) {
            return Err(reason);
        }
        self.timer.next().await;
        Ok(self.timer.attempt())
    }

    /// Like [`on_failure`](Self::on_failure) but blocks the thread
    pub fn on_failure_blocking(&mut self, failure: &ContractError) -> Result<u32, TerminalReason> {
        if let Some(reason) = self.evaluate(failure) {
            return Err(reason);
        }
        self.timer.next_blocking();
        Ok(self.timer.attempt())
    }
}
