//! Backoff timer
//!
//! `BackoffPolicy` is a pure function from attempt number to delay. A
//! `TimerFactory` holds the configured policy and hands out independent
//! `Timer`s, one per retry session.

use std::time::Duration;

use contracts::BackoffKind;
use tracing::warn;

/// Delay policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay every attempt
    Fixed { delay_ms: u64 },
    /// `step_ms * attempt`
    Linear { step_ms: u64 },
    /// `seed_seconds ^ attempt` seconds, seed clamped to >= 1
    Exponential { seed_seconds: f64 },
}

impl BackoffPolicy {
    pub fn fixed(delay_ms: u64) -> Self {
        Self::Fixed { delay_ms }
    }

    pub fn linear(step_ms: u64) -> Self {
        Self::Linear { step_ms }
    }

    pub fn exponential(seed_seconds: f64) -> Self {
        Self::Exponential { seed_seconds }
    }

    /// Build from the `delivery` section of the configuration
    ///
    /// `value` is milliseconds for fixed/linear and seed seconds for
    /// exponential.
    pub fn from_config(kind: BackoffKind, value: f64) -> Self {
        let millis = value.max(0.0).round() as u64;
        match kind {
            BackoffKind::Fixed => Self::fixed(millis),
            BackoffKind::Linear => Self::linear(millis),
            BackoffKind::Exponential => Self::exponential(value),
        }
    }

    /// Delay for a 1-based attempt number
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Linear { step_ms } => Duration::from_millis(step_ms.saturating_mul(attempt as u64)),
            Self::Exponential { seed_seconds } => {
                let exponent = attempt.min(i32::MAX as u32) as i32;
                let millis = clamp_seed(seed_seconds).powi(exponent) * 1000.0;
                // float -> int casts saturate
                Duration::from_millis(millis.round() as u64)
            }
        }
    }

    /// True if an exponential seed below one second will be clamped
    pub fn is_clamped(&self) -> bool {
        matches!(*self, Self::Exponential { seed_seconds } if !(seed_seconds >= 1.0))
    }
}

fn clamp_seed(seed_seconds: f64) -> f64 {
    if seed_seconds >= 1.0 {
        seed_seconds
    } else {
        1.0
    }
}

/// Creates fresh timers sharing one policy
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFactory {
    policy: BackoffPolicy,
}

impl TimerFactory {
    /// Create a factory, surfacing a warning for clamped exponential seeds
    pub fn new(policy: BackoffPolicy) -> Self {
        if let BackoffPolicy::Exponential { seed_seconds } = policy {
            if policy.is_clamped() {
                warn!(
                    seed_seconds,
                    "Exponential backoff seed below 1s, clamping to 1s (use 1 for a fixed-equivalent baseline)"
                );
            }
        }
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// New timer with attempt reset to 1
    pub fn create(&self) -> Timer {
        Timer {
            policy: self.policy,
            attempt: 1,
        }
    }
}

/// Per-session backoff state
#[derive(Debug, Clone)]
pub struct Timer {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Timer {
    /// Current attempt counter (no side effects)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next call to `next` will produce
    pub fn peek_delay(&self) -> Duration {
        self.policy.delay_for(self.attempt)
    }

    /// Delay for the current attempt, then advance the counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Advance and wait on the tokio timer
    pub async fn next(&mut self) -> Duration {
        let delay = self.next_delay();
        tokio::time::sleep(delay).await;
        delay
    }

    /// Advance and block the current thread
    ///
    /// Only for dedicated threads with nothing else to run.
    pub fn next_blocking(&mut self) -> Duration {
        let delay = self.next_delay();
        std::thread::sleep(delay);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: BackoffPolicy, n: usize) -> Vec<u64> {
        let mut timer = TimerFactory::new(policy).create();
        (0..n).map(|_| timer.next_delay().as_millis() as u64).collect()
    }

    #[test]
    fn test_fixed_is_constant() {
        assert_eq!(delays(BackoffPolicy::fixed(500), 5), vec![500; 5]);
    }

    #[test]
    fn test_linear_steps() {
        assert_eq!(delays(BackoffPolicy::linear(100), 3), vec![100, 200, 300]);
    }

    #[test]
    fn test_exponential_powers() {
        assert_eq!(
            delays(BackoffPolicy::exponential(2.0), 4),
            vec![2000, 4000, 8000, 16000]
        );
    }

    #[test]
    fn test_exponential_seed_clamped() {
        let clamped = BackoffPolicy::exponential(0.5);
        assert!(clamped.is_clamped());
        assert_eq!(delays(clamped, 4), delays(BackoffPolicy::exponential(1.0), 4));
        assert_eq!(delays(clamped, 3), vec![1000, 1000, 1000]);
    }

    #[test]
    fn test_attempt_counter() {
        let mut timer = TimerFactory::new(BackoffPolicy::linear(10)).create();
        assert_eq!(timer.attempt(), 1);
        assert_eq!(timer.attempt(), 1);

        let first = timer.next_delay();
        assert_eq!(first, Duration::from_millis(10));
        assert_eq!(timer.attempt(), 2);
    }

    #[test]
    fn test_factory_timers_are_independent() {
        let factory = TimerFactory::new(BackoffPolicy::linear(100));
        let mut a = factory.create();
        a.next_delay();
        a.next_delay();

        let mut b = factory.create();
        assert_eq!(b.attempt(), 1);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(a.attempt(), 3);
    }

    #[test]
    fn test_large_attempts_saturate() {
        let policy = BackoffPolicy::exponential(10.0);
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(u64::MAX));

        let linear = BackoffPolicy::linear(u64::MAX);
        assert_eq!(linear.delay_for(2), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_from_config() {
        assert_eq!(
            BackoffPolicy::from_config(BackoffKind::Fixed, 250.0),
            BackoffPolicy::fixed(250)
        );
        assert_eq!(
            BackoffPolicy::from_config(BackoffKind::Exponential, 1.5),
            BackoffPolicy::exponential(1.5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_waits_for_delay() {
        let mut timer = TimerFactory::new(BackoffPolicy::fixed(500)).create();
        let start = tokio::time::Instant::now();

        let waited = timer.next().await;

        assert_eq!(waited, Duration::from_millis(500));
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(timer.attempt(), 2);
    }
}
