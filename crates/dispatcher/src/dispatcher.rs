//! BatchDispatcher - reliable bulk send
//!
//! One session per `dispatch` call: send, align the per-item statuses to
//! identities, narrow the next request to what is still outstanding, and let
//! the retry strategy decide whether and when to resend. A session never has
//! more than one request in flight; sessions themselves run concurrently.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use contracts::{Batch, ContractError, DispatchReport, SinkTransport};
use retry::RetryStrategy;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::metrics::DispatchMetrics;
use crate::session::DispatchSession;

/// Session state, for logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Sending,
    PartialFailure,
    Done,
    Fatal,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sending => "sending",
            Self::PartialFailure => "partial_failure",
            Self::Done => "done",
            Self::Fatal => "fatal",
        })
    }
}

/// Drives dispatch sessions against one sink transport
pub struct BatchDispatcher<T> {
    transport: Arc<T>,
    strategy: RetryStrategy,
    metrics: Arc<DispatchMetrics>,
    cancel: CancellationToken,
}

impl<T> Clone for BatchDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            strategy: self.strategy.clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: SinkTransport + Sync + 'static> BatchDispatcher<T> {
    pub fn new(transport: T, strategy: RetryStrategy) -> Self {
        Self::from_shared(Arc::new(transport), strategy)
    }

    /// Dispatcher over a transport shared with other dispatchers
    pub fn from_shared(transport: Arc<T>, strategy: RetryStrategy) -> Self {
        Self {
            transport,
            strategy,
            metrics: Arc::new(DispatchMetrics::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to abort sessions of this dispatcher
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn sink_name(&self) -> &str {
        self.transport.name()
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver `batch`, resending failed events until every event resolved
    ///
    /// Returns one outcome per event in original order. Per-item rejections
    /// (dropped events) are part of a successful report. The error cases are
    /// a non-transient transport failure, a terminal retry verdict
    /// (`ExhaustedRetries`, with diagnostics) and cancellation.
    #[instrument(
        name = "batch_dispatch",
        skip(self, batch),
        fields(sink = %self.transport.name(), events = batch.len())
    )]
    pub async fn dispatch(&self, batch: Batch) -> Result<DispatchReport, ContractError> {
        if batch.is_empty() {
            debug!("Empty batch, nothing to send");
            return Ok(DispatchReport::default());
        }

        let sink = self.transport.name().to_string();
        let mut session = DispatchSession::new(&sink, batch)?;
        let mut retry = self.strategy.session(format!("dispatch to '{sink}'"));
        let started = Instant::now();

        loop {
            let request = session.next_request();
            let attempt = session.attempt();
            debug!(
                state = %DispatchState::Sending,
                attempt,
                events = request.len(),
                "Sending request"
            );
            self.metrics.inc_attempts();
            observability::record_dispatch_attempt(&sink);

            let sent = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.on_cancel(&sink, attempt)),
                result = self.transport.send(&request) => result,
            };

            let failure = match sent {
                Ok(statuses) => {
                    let transport = &self.transport;
                    let summary =
                        session.apply_response(&request, statuses, |status| transport.classify(status));
                    self.metrics.add_delivered(summary.succeeded);
                    self.metrics.add_dropped(summary.dropped);
                    observability::record_items(&sink, "delivered", summary.succeeded);
                    observability::record_items(&sink, "dropped", summary.dropped);
                    observability::record_items(&sink, "retried", summary.retryable);

                    if session.is_resolved() {
                        let report = session.into_report(attempt - 1);
                        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                        observability::record_dispatch_duration_ms(&sink, elapsed_ms);
                        info!(
                            state = %DispatchState::Done,
                            attempts = report.attempts,
                            delivered = report.delivered(),
                            dropped = report.dropped(),
                            elapsed_ms,
                            "Batch resolved"
                        );
                        return Ok(report);
                    }

                    debug!(
                        state = %DispatchState::PartialFailure,
                        attempt,
                        outstanding = session.outstanding_len(),
                        "Events outstanding"
                    );
                    session.outstanding_failure()
                }
                Err(err) if !err.kind().is_transient() => {
                    warn!(
                        state = %DispatchState::Fatal,
                        attempt,
                        kind = %err.kind(),
                        error = %err,
                        "Transport failure is not transient"
                    );
                    return Err(err);
                }
                Err(err) => {
                    session.apply_transport_failure(&request, &err);
                    err
                }
            };

            let decision = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.on_cancel(&sink, attempt)),
                decision = retry.on_failure(&failure) => decision,
            };

            match decision {
                Ok(next_attempt) => {
                    self.metrics.inc_retries();
                    session.advance(next_attempt);
                }
                Err(reason) => {
                    self.metrics.inc_exhausted();
                    observability::record_dispatch_exhausted(&sink);
                    return Err(ContractError::ExhaustedRetries {
                        attempts: reason.attempts(),
                        outcomes: session.into_diagnostics(),
                        cause: Box::new(failure),
                    });
                }
            }
        }
    }

    /// Run `dispatch` as an independent task
    pub fn spawn(&self, batch: Batch) -> JoinHandle<Result<DispatchReport, ContractError>> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(batch).await })
    }

    fn on_cancel(&self, sink: &str, attempt: u32) -> ContractError {
        self.metrics.inc_cancelled();
        warn!(attempt, "Dispatch cancelled, discarding partial outcomes");
        ContractError::cancelled(format!("dispatch to '{sink}'"))
    }
}
