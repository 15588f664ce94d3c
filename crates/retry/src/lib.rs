//! # Retry
//!
//! Backoff timers and the retry strategy shared by the batch dispatcher and
//! the checkpointer.
//!
//! - `BackoffPolicy` / `TimerFactory` / `Timer`: attempt number -> delay
//! - `RetryStrategy` / `RetrySession`: failure -> retry or terminal verdict

pub mod backoff;
pub mod strategy;

pub use backoff::{BackoffPolicy, Timer, TimerFactory};
pub use strategy::{
    terminal_error, RetryDecision, RetrySession, RetryStrategy, RetryableErrorSet,
    TerminalReason, DEFAULT_MAX_ATTEMPTS,
};
