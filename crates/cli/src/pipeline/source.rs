//! NDJSON source - one JSON event per line, read in batches
//!
//! Positions are 1-based line numbers; a record's position is the line of
//! its last event. Lines that are not UTF-8 are skipped.

use std::path::PathBuf;

use contracts::{ContractError, Event, SourceConfig};
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use unit_of_work::SourceRecord;

/// Batched reader over an NDJSON file
#[derive(Debug, Clone)]
pub struct NdjsonSource {
    path: PathBuf,
    batch_size: usize,
    id_field: Option<String>,
    partition_key_field: Option<String>,
    resume_after: u64,
}

impl NdjsonSource {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            path: config.path.clone(),
            batch_size: config.batch_size.max(1),
            id_field: config.id_field.clone(),
            partition_key_field: config.partition_key_field.clone(),
            resume_after: 0,
        }
    }

    /// Skip every line up to and including `line`
    pub fn resume_after(mut self, line: u64) -> Self {
        self.resume_after = line;
        self
    }

    /// Build the event for one line
    ///
    /// The id comes from `id_field` when the line is a JSON object carrying
    /// it, otherwise it is `line-<n>`.
    pub fn event_from_line(&self, line_no: u64, line: &str) -> Event {
        let parsed: Option<Value> = match serde_json::from_str(line) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(line = line_no, error = %e, "Line is not valid JSON, sending it as is");
                None
            }
        };

        let field = |name: &Option<String>| {
            let name = name.as_deref()?;
            match parsed.as_ref()?.get(name)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        let id = field(&self.id_field).unwrap_or_else(|| format!("line-{line_no}"));
        let event = Event::new(id, line.to_string());
        match field(&self.partition_key_field) {
            Some(key) => event.with_partition_key(key),
            None => event,
        }
    }

    /// Read the file and send one record per batch
    ///
    /// Stops early when `shutdown` fires or the receiver goes away. Returns
    /// the number of events sent; skipped lines are not counted.
    #[instrument(name = "ndjson_source", skip(self, records, shutdown), fields(path = %self.path.display()))]
    pub async fn stream(
        self,
        records: mpsc::Sender<SourceRecord>,
        shutdown: CancellationToken,
    ) -> Result<u64, ContractError> {
        let file = File::open(&self.path).await?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();

        let mut line_no = 0u64;
        let mut sent = 0u64;
        let mut skipped = 0u64;
        let mut batch = Vec::with_capacity(self.batch_size);

        if self.resume_after > 0 {
            info!(after_line = self.resume_after, "Resuming after checkpoint");
        }

        loop {
            raw.clear();
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(sent),
                read = reader.read_until(b'\n', &mut raw) => read?,
            };

            let at_eof = read == 0;
            if !at_eof {
                line_no += 1;
                if line_no > self.resume_after {
                    match decode_line(&raw) {
                        Ok(line) if line.trim().is_empty() => {}
                        Ok(line) => batch.push(self.event_from_line(line_no, line)),
                        Err(e) => {
                            warn!(line = line_no, error = %e, "Line is not UTF-8, skipping");
                            skipped += 1;
                        }
                    }
                }
            }

            let full = batch.len() >= self.batch_size;
            if !batch.is_empty() && (full || at_eof) {
                let events = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                let count = events.len() as u64;
                let record = SourceRecord::new(line_no.to_string(), events);
                debug!(position = line_no, events = count, "Batch read");

                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return Ok(sent),
                    result = records.send(record) => {
                        if result.is_err() {
                            debug!("Consumer gone, stopping source");
                            return Ok(sent);
                        }
                    }
                }
                sent += count;
            }

            if at_eof {
                info!(lines = line_no, events = sent, skipped, "Source exhausted");
                return Ok(sent);
            }
        }
    }
}

/// Line content without its terminator
fn decode_line(raw: &[u8]) -> Result<&str, std::str::Utf8Error> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(path: PathBuf, batch_size: usize) -> SourceConfig {
        SourceConfig {
            path,
            batch_size,
            id_field: Some("id".to_string()),
            partition_key_field: Some("user".to_string()),
        }
    }

    fn write_lines(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    async fn collect(source: NdjsonSource) -> (u64, Vec<SourceRecord>) {
        let (tx, mut rx) = mpsc::channel(16);
        let sent = source.stream(tx, CancellationToken::new()).await.unwrap();
        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        (sent, records)
    }

    #[test]
    fn test_event_ids_from_field_or_line() {
        let source = NdjsonSource::from_config(&config("unused".into(), 10));

        let event = source.event_from_line(3, r#"{"id": "evt-1", "user": "ana"}"#);
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.routing_key(), "ana");

        let numeric = source.event_from_line(4, r#"{"id": 42}"#);
        assert_eq!(numeric.id, "42");

        let missing = source.event_from_line(5, r#"{"other": true}"#);
        assert_eq!(missing.id, "line-5");

        let garbage = source.event_from_line(6, "not json");
        assert_eq!(garbage.id, "line-6");
        assert_eq!(&garbage.payload[..], b"not json");
    }

    #[tokio::test]
    async fn test_batches_with_last_line_position() {
        let file = write_lines(&[
            r#"{"id": "a"}"#,
            r#"{"id": "b"}"#,
            "",
            r#"{"id": "c"}"#,
            r#"{"id": "d"}"#,
            r#"{"id": "e"}"#,
        ]);
        let source = NdjsonSource::from_config(&config(file.path().to_path_buf(), 2));

        let (sent, records) = collect(source).await;

        assert_eq!(sent, 5);
        let positions: Vec<_> = records.iter().map(|r| r.position.as_str()).collect();
        assert_eq!(positions, vec!["2", "5", "6"]);
        assert_eq!(records[1].events[0].id, "c");
        assert_eq!(records[2].events.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_lines() {
        let file = write_lines(&[r#"{"id": "a"}"#, r#"{"id": "b"}"#, r#"{"id": "c"}"#]);
        let source =
            NdjsonSource::from_config(&config(file.path().to_path_buf(), 10)).resume_after(2);

        let (sent, records) = collect(source).await;

        assert_eq!(sent, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, "3");
        assert_eq!(records[0].events[0].id, "c");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = NdjsonSource::from_config(&config("/nonexistent/events.ndjson".into(), 10));
        let (tx, _rx) = mpsc::channel(1);
        let err = source.stream(tx, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), contracts::ErrorKind::Io);
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{\"id\":\"a\"}\n\xff\xfe\n{\"id\":\"c\"}\r\n").unwrap();
        let source = NdjsonSource::from_config(&config(file.path().to_path_buf(), 1));

        let (sent, records) = collect(source).await;

        assert_eq!(sent, 2);
        let ids: Vec<_> = records.iter().map(|r| r.events[0].id.to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(records[1].position, "3");
        assert_eq!(&records[1].events[0].payload[..], br#"{"id":"c"}"#);
    }

    #[tokio::test]
    async fn test_fallback_id_does_not_collide_with_numeric_id() {
        let file = write_lines(&[r#"{"id": 2}"#, r#"{"other": 1}"#]);
        let source = NdjsonSource::from_config(&config(file.path().to_path_buf(), 10));

        let (_, records) = collect(source).await;

        let ids: Vec<_> = records[0].events.iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["2", "line-2"]);
    }
}
