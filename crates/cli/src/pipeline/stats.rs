//! Run statistics.

use std::time::Duration;

use observability::DeliverySummary;
use unit_of_work::ConsumerSummary;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Events handed to the consumer by the source
    pub events_read: u64,

    /// Per-record counters from the shard consumer
    pub consumer: ConsumerSummary,

    /// Per-sink delivery aggregation
    pub delivery: DeliverySummary,

    /// Line the run resumed after
    pub resumed_after: u64,

    pub duration: Duration,
}

impl RunStats {
    /// Delivered events per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.delivery.delivered as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                      Run Statistics                          ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        let consumer = &self.consumer;
        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Resumed after line: {}", self.resumed_after);
        println!("   ├─ Events read: {}", self.events_read);
        println!(
            "   ├─ Records: {} ({} acknowledged, {} failed)",
            consumer.records, consumer.acknowledged, consumer.failed
        );
        println!(
            "   ├─ Checkpoints: {} committed, {} failed",
            consumer.committed, consumer.checkpoint_failures
        );
        match &consumer.last_position {
            Some(position) => println!("   ├─ Last acknowledged line: {}", position),
            None => println!("   ├─ Last acknowledged line: none"),
        }
        println!("   └─ Throughput: {:.2} events/s", self.throughput());

        if consumer.interrupted {
            println!("\n⚠️  Run interrupted by shutdown");
        }

        println!("\n{}", self.delivery);
    }
}
