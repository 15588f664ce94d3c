//! SinkRegistry - shared sink clients keyed by sink name
//!
//! Clients are created lazily from configuration and shared by every
//! dispatch session; they carry no per-session state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use contracts::{ContractError, Event, ItemClass, ItemStatus, SinkConfig, SinkTransport, SinkType};
use tracing::{debug, info, instrument};

use crate::error::DispatcherError;
use crate::sinks::{LogSink, RecordStreamSink, SearchBulkSink};

/// Any configured sink transport
pub enum SinkClient {
    SearchBulk(SearchBulkSink),
    RecordStream(RecordStreamSink),
    Log(LogSink),
}

impl SinkClient {
    /// Build a client from configuration
    #[instrument(
        name = "sink_client_create",
        skip(config),
        fields(sink = %config.name, sink_type = ?config.sink_type)
    )]
    pub fn from_config(config: &SinkConfig) -> Result<Self, DispatcherError> {
        let client = match config.sink_type {
            SinkType::Log => Self::Log(LogSink::new(&config.name)),
            SinkType::SearchBulk => Self::SearchBulk(
                SearchBulkSink::from_params(&config.name, &config.params)
                    .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?,
            ),
            SinkType::RecordStream => Self::RecordStream(
                RecordStreamSink::from_params(&config.name, &config.params)
                    .map_err(|e| DispatcherError::sink_creation(&config.name, e.to_string()))?,
            ),
        };
        Ok(client)
    }

    pub fn sink_type(&self) -> SinkType {
        match self {
            Self::SearchBulk(_) => SinkType::SearchBulk,
            Self::RecordStream(_) => SinkType::RecordStream,
            Self::Log(_) => SinkType::Log,
        }
    }
}

impl SinkTransport for SinkClient {
    fn name(&self) -> &str {
        match self {
            Self::SearchBulk(sink) => sink.name(),
            Self::RecordStream(sink) => sink.name(),
            Self::Log(sink) => sink.name(),
        }
    }

    async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError> {
        match self {
            Self::SearchBulk(sink) => sink.send(batch).await,
            Self::RecordStream(sink) => sink.send(batch).await,
            Self::Log(sink) => sink.send(batch).await,
        }
    }

    fn classify(&self, status: &ItemStatus) -> ItemClass {
        match self {
            Self::SearchBulk(sink) => sink.classify(status),
            Self::RecordStream(sink) => sink.classify(status),
            Self::Log(sink) => sink.classify(status),
        }
    }
}

/// Registry of shared sink clients
#[derive(Default)]
pub struct SinkRegistry {
    clients: Mutex<HashMap<String, Arc<SinkClient>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<SinkClient>>> {
        // Entries are inserted whole, so a poisoned map is still consistent
        self.clients.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Client for `config.name`, created on first use
    ///
    /// Creation happens under the registry lock, so concurrent callers
    /// observe a single client per name.
    pub fn get_or_create(&self, config: &SinkConfig) -> Result<Arc<SinkClient>, DispatcherError> {
        let mut clients = self.lock();
        if let Some(client) = clients.get(&config.name) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(SinkClient::from_config(config)?);
        clients.insert(config.name.clone(), Arc::clone(&client));
        info!(sink = %config.name, sink_type = ?config.sink_type, "Sink client registered");
        Ok(client)
    }

    pub fn get(&self, name: &str) -> Result<Arc<SinkClient>, DispatcherError> {
        self.lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DispatcherError::UnknownSink(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every client; sessions holding one keep it alive until they end
    pub fn clear(&self) {
        let mut clients = self.lock();
        debug!(clients = clients.len(), "Clearing sink registry");
        clients.clear();
    }
}
