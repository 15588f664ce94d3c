//! DispatchSession - per-operation delivery state
//!
//! Owned by exactly one dispatch task, so accumulation needs no locking.
//! Every response is aligned to identities before it touches the state.

use std::collections::{HashMap, HashSet};

use contracts::{ContractError, DispatchReport, Event, EventId, ItemClass, ItemStatus, Outcome};
use tracing::warn;

/// Per-attempt tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptSummary {
    pub succeeded: usize,
    pub dropped: usize,
    pub retryable: usize,
    /// Entries with unknown, duplicate or missing identity
    pub ignored: usize,
}

/// State of one logical send operation
#[derive(Debug)]
pub struct DispatchSession {
    sink_name: String,
    original: Vec<Event>,
    attempt: u32,
    /// Identities not yet finally resolved
    outstanding: HashSet<EventId>,
    /// Final outcomes (success or dropped), at most one per identity
    resolved: HashMap<EventId, Outcome>,
    /// Latest retryable outcome of each outstanding identity
    pending: HashMap<EventId, Outcome>,
}

impl DispatchSession {
    /// Start a session; identities must be unique within the batch
    pub fn new(sink_name: impl Into<String>, batch: Vec<Event>) -> Result<Self, ContractError> {
        let sink_name = sink_name.into();
        let mut outstanding = HashSet::with_capacity(batch.len());
        for event in &batch {
            if !outstanding.insert(event.id.clone()) {
                return Err(ContractError::client(
                    &sink_name,
                    format!("duplicate event id '{}' in batch", event.id),
                ));
            }
        }

        Ok(Self {
            sink_name,
            resolved: HashMap::with_capacity(batch.len()),
            pending: HashMap::new(),
            original: batch,
            attempt: 1,
            outstanding,
        })
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn batch_len(&self) -> usize {
        self.original.len()
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    /// True once nothing is outstanding
    pub fn is_resolved(&self) -> bool {
        self.outstanding.is_empty()
    }

    /// Events of the next request: exactly the outstanding identities, in
    /// original order
    pub fn next_request(&self) -> Vec<Event> {
        self.original
            .iter()
            .filter(|event| self.outstanding.contains(&event.id))
            .cloned()
            .collect()
    }

    /// Record the response to `sent`
    ///
    /// Echoed identities win; otherwise the identity is taken from the
    /// request position. Events without a usable answer stay retryable.
    pub fn apply_response<C>(
        &mut self,
        sent: &[Event],
        statuses: Vec<ItemStatus>,
        classify: C,
    ) -> AttemptSummary
    where
        C: Fn(&ItemStatus) -> ItemClass,
    {
        let mut summary = AttemptSummary::default();
        let mut answered: HashSet<EventId> = HashSet::with_capacity(sent.len());

        if statuses.len() != sent.len() {
            warn!(
                sink = %self.sink_name,
                attempt = self.attempt,
                sent = sent.len(),
                received = statuses.len(),
                "Response length differs from request"
            );
        }

        for (position, status) in statuses.into_iter().enumerate() {
            let Some(id) = status
                .id
                .clone()
                .or_else(|| sent.get(position).map(|e| e.id.clone()))
            else {
                summary.ignored += 1;
                continue;
            };

            if !self.outstanding.contains(&id) {
                warn!(sink = %self.sink_name, event_id = %id, "Status for unknown or resolved event ignored");
                summary.ignored += 1;
                continue;
            }
            if !answered.insert(id.clone()) {
                warn!(sink = %self.sink_name, event_id = %id, "Duplicate status ignored");
                summary.ignored += 1;
                continue;
            }

            let class = classify(&status);
            let outcome = Outcome::classified(id.clone(), &status, class, self.attempt);
            match class {
                ItemClass::Success => {
                    summary.succeeded += 1;
                    self.resolve(id, outcome);
                }
                ItemClass::Fatal => {
                    warn!(
                        sink = %self.sink_name,
                        event_id = %id,
                        status = status.status,
                        error = status.error.as_deref().unwrap_or(""),
                        "Event rejected, dropping"
                    );
                    summary.dropped += 1;
                    self.resolve(id, outcome);
                }
                ItemClass::Retryable => {
                    summary.retryable += 1;
                    self.pending.insert(id, outcome);
                }
            }
        }

        for event in sent {
            if self.outstanding.contains(&event.id) && !answered.contains(&event.id) {
                summary.retryable += 1;
                self.pending.insert(
                    event.id.clone(),
                    Outcome::missing(event.id.clone(), self.attempt, "no status in response"),
                );
            }
        }

        summary
    }

    /// Failure handed to the retry strategy while events are outstanding
    ///
    /// When every outstanding event was throttled the failure is `Throttled`.
    /// When every one failed with 429 or 5xx, and at least one with 5xx, it is
    /// `ServerBusy` carrying the highest status. Missing answers and any other
    /// code give `PartialFailure`.
    pub fn outstanding_failure(&self) -> ContractError {
        let outstanding = self.outstanding.len();
        let codes: Vec<u16> = self.pending.values().map(|o| o.status_code).collect();
        let server_error = |code: u16| (500..=599).contains(&code);

        if !codes.is_empty() && codes.len() == outstanding {
            if codes.iter().all(|&code| code == 429) {
                return ContractError::Throttled {
                    sink_name: self.sink_name.clone(),
                    message: format!("{outstanding} item(s) throttled on attempt {}", self.attempt),
                };
            }
            if codes.iter().all(|&code| code == 429 || server_error(code)) {
                let status = codes.iter().copied().filter(|&code| server_error(code)).max().unwrap_or(500);
                return ContractError::ServerBusy {
                    sink_name: self.sink_name.clone(),
                    status,
                    message: format!("{outstanding} item(s) failed on attempt {}", self.attempt),
                };
            }
        }

        ContractError::PartialFailure {
            sink_name: self.sink_name.clone(),
            outstanding,
            attempt: self.attempt,
        }
    }

    /// Record a transport failure: every in-flight event stays retryable
    pub fn apply_transport_failure(&mut self, sent: &[Event], error: &ContractError) {
        let message = error.to_string();
        for event in sent {
            if self.outstanding.contains(&event.id) {
                self.pending.insert(
                    event.id.clone(),
                    Outcome::missing(event.id.clone(), self.attempt, message.clone()),
                );
            }
        }
    }

    /// Move to the given attempt number
    pub fn advance(&mut self, next_attempt: u32) {
        self.attempt = next_attempt;
    }

    fn resolve(&mut self, id: EventId, outcome: Outcome) {
        self.outstanding.remove(&id);
        self.pending.remove(&id);
        self.resolved.insert(id, outcome);
    }

    /// Final report in original batch order
    ///
    /// Only meaningful once [`is_resolved`](Self::is_resolved).
    pub fn into_report(mut self, retries: u32) -> DispatchReport {
        let outcomes = self
            .original
            .iter()
            .filter_map(|event| self.resolved.remove(&event.id))
            .collect();
        DispatchReport {
            outcomes,
            attempts: self.attempt,
            retries,
        }
    }

    /// Everything known so far, for error diagnostics
    pub fn into_diagnostics(mut self) -> Vec<Outcome> {
        self.original
            .iter()
            .filter_map(|event| {
                self.resolved
                    .remove(&event.id)
                    .or_else(|| self.pending.remove(&event.id))
            })
            .collect()
    }
}
