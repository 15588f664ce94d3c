//! # Dispatcher
//!
//! Reliable batch delivery.
//!
//! Responsible for:
//! - Sending a batch to one sink and classifying every item's outcome
//! - Resending only the retryable subset under the configured retry strategy
//! - Sharing sink clients across sessions through the `SinkRegistry`

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod sinks;

pub use contracts::{DispatchReport, SinkTransport};
pub use dispatcher::BatchDispatcher;
pub use error::DispatcherError;
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use registry::{SinkClient, SinkRegistry};
pub use session::{AttemptSummary, DispatchSession};
pub use sinks::{LogSink, RecordStreamSink, SearchBulkSink};
