//! Delivery metrics
//!
//! Prometheus series are emitted through the `metrics` facade; the
//! `DeliveryStatsAggregator` keeps an in-memory view for run summaries.

use std::collections::HashMap;

use contracts::DispatchReport;
use metrics::{counter, histogram};

/// Record one send attempt (first send or retry)
pub fn record_dispatch_attempt(sink_name: &str) {
    counter!(
        "batchline_dispatch_attempts_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
}

/// Record per-item results of one attempt
///
/// `status` is one of `delivered`, `dropped` or `retried`.
pub fn record_items(sink_name: &str, status: &'static str, count: usize) {
    if count == 0 {
        return;
    }
    counter!(
        "batchline_items_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(count as u64);
}

/// Record a session that ended with exhausted retries
pub fn record_dispatch_exhausted(sink_name: &str) {
    counter!(
        "batchline_dispatch_exhausted_total",
        "sink" => sink_name.to_string()
    )
    .increment(1);
}

/// Record wall time of a whole dispatch session
pub fn record_dispatch_duration_ms(sink_name: &str, duration_ms: f64) {
    histogram!(
        "batchline_dispatch_duration_ms",
        "sink" => sink_name.to_string()
    )
    .record(duration_ms);
}

/// Record a checkpoint result (`committed`, `skipped`, `abandoned`, `exhausted`)
pub fn record_checkpoint(status: &'static str) {
    counter!("batchline_checkpoint_total", "status" => status).increment(1);
}

/// In-memory aggregation of dispatch sessions
#[derive(Debug, Clone, Default)]
pub struct DeliveryStatsAggregator {
    /// Sessions that resolved
    pub completed_sessions: u64,

    /// Sessions that ended in an error
    pub failed_sessions: u64,

    pub delivered: u64,

    pub dropped: u64,

    /// Retries across all sessions
    pub retries: u64,

    /// Attempts per completed session
    pub attempt_stats: RunningStats,

    /// Session wall time (ms)
    pub duration_stats: RunningStats,

    /// Delivered events per sink
    pub delivered_per_sink: HashMap<String, u64>,
}

impl DeliveryStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a resolved session
    pub fn update(&mut self, sink_name: &str, report: &DispatchReport, duration_ms: f64) {
        self.completed_sessions += 1;
        let delivered = report.delivered() as u64;
        self.delivered += delivered;
        self.dropped += report.dropped() as u64;
        self.retries += report.retries as u64;
        self.attempt_stats.push(report.attempts as f64);
        self.duration_stats.push(duration_ms);
        *self
            .delivered_per_sink
            .entry(sink_name.to_string())
            .or_insert(0) += delivered;
    }

    /// Fold in a session that failed
    pub fn record_failure(&mut self, duration_ms: f64) {
        self.failed_sessions += 1;
        self.duration_stats.push(duration_ms);
    }

    pub fn summary(&self) -> DeliverySummary {
        let total = self.completed_sessions + self.failed_sessions;
        DeliverySummary {
            completed_sessions: self.completed_sessions,
            failed_sessions: self.failed_sessions,
            delivered: self.delivered,
            dropped: self.dropped,
            retries: self.retries,
            failure_rate: if total > 0 {
                self.failed_sessions as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            attempts: StatsSummary::from(&self.attempt_stats),
            duration_ms: StatsSummary::from(&self.duration_stats),
            delivered_per_sink: self.delivered_per_sink.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Delivery summary
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub retries: u64,
    pub failure_rate: f64,
    pub attempts: StatsSummary,
    pub duration_ms: StatsSummary,
    pub delivered_per_sink: HashMap<String, u64>,
}

impl std::fmt::Display for DeliverySummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Delivery Summary ===")?;
        writeln!(
            f,
            "Sessions: {} completed, {} failed ({:.2}%)",
            self.completed_sessions, self.failed_sessions, self.failure_rate
        )?;
        writeln!(f, "Events delivered: {}", self.delivered)?;
        writeln!(f, "Events dropped: {}", self.dropped)?;
        writeln!(f, "Retries: {}", self.retries)?;
        writeln!(f, "Attempts per session: {}", self.attempts)?;
        writeln!(f, "Session duration (ms): {}", self.duration_ms)?;

        if !self.delivered_per_sink.is_empty() {
            writeln!(f, "Delivered per sink:")?;
            let mut sinks: Vec<_> = self.delivered_per_sink.iter().collect();
            sinks.sort();
            for (sink, count) in sinks {
                writeln!(f, "  {}: {}", sink, count)?;
            }
        }

        Ok(())
    }
}

/// Summary of a running statistic
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.mean }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
