//! SinkTransport trait - Dispatcher output interface
//!
//! A transport issues exactly one request per `send` call and returns one
//! status per item. The response may be positional; the dispatcher re-derives
//! identities itself.

use crate::{ContractError, Event, ItemClass, ItemStatus};

/// Default classification for HTTP-style status codes
///
/// 2xx succeed, 400 (malformed request) is final, everything else may be
/// retried.
pub fn classify_http_status(status: u16) -> ItemClass {
    match status {
        200..=299 => ItemClass::Success,
        400 => ItemClass::Fatal,
        _ => ItemClass::Retryable,
    }
}

/// Bulk sink transport
///
/// All sink implementations must implement this trait.
#[trait_variant::make(SinkTransport: Send)]
pub trait LocalSinkTransport {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Send one request containing `batch`
    ///
    /// # Errors
    /// Returns a transport error when no per-item response is available.
    /// Transient kinds make every in-flight event retryable; any other kind
    /// terminates the dispatch session.
    async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError>;

    /// Classify one item status
    fn classify(&self, status: &ItemStatus) -> ItemClass {
        classify_http_status(status.status)
    }
}
