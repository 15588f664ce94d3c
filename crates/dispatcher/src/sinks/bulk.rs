//! SearchBulkSink - search-engine `_bulk` indexing over HTTP

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use contracts::{ContractError, Event, EventId, ItemStatus, SinkTransport};
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::{endpoint, http_client, map_request_error, required_param, success_body, timeout_from_params};

/// Indexes every event as one `index` action of a bulk request
pub struct SearchBulkSink {
    name: String,
    index: String,
    endpoint: Url,
    client: Client,
}

impl SearchBulkSink {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        index: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let endpoint = endpoint(&name, base_url, "_bulk")?;
        let client = http_client(&name, timeout)?;
        debug!(sink = %name, endpoint = %endpoint, "SearchBulkSink created");

        Ok(Self {
            index: index.into(),
            name,
            endpoint,
            client,
        })
    }

    /// Create from params (`url`, `index`, optional `timeout_ms`)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let url = required_param(&name, params, "url")?;
        let index = required_param(&name, params, "index")?.to_string();
        let timeout = timeout_from_params(&name, params)?;
        Self::new(name, url, index, timeout)
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl SinkTransport for SearchBulkSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "search_bulk_send",
        skip(self, batch),
        fields(sink = %self.name, events = batch.len())
    )]
    async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError> {
        let BulkBody { body, included, rejected } = encode_bulk_body(&self.index, batch);
        for status in &rejected {
            warn!(
                event_id = ?status.id,
                error = status.error.as_deref().unwrap_or(""),
                "Event cannot be encoded, rejecting"
            );
        }
        if included.is_empty() {
            return Ok(rejected);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| map_request_error(&self.name, e))?;

        let status = response.status().as_u16();
        let body = success_body(&self.name, response).await?;
        let statuses = parse_bulk_response(&body).map_err(|e| ContractError::ServerBusy {
            sink_name: self.name.clone(),
            status,
            message: format!("unreadable bulk response: {e}"),
        })?;

        if statuses.len() != included.len() {
            warn!(
                sent = included.len(),
                received = statuses.len(),
                "Bulk response item count mismatch"
            );
        }

        // Positions refer to the encoded subset, not to `batch`
        let mut statuses: Vec<ItemStatus> = statuses
            .into_iter()
            .enumerate()
            .map(|(position, mut status)| {
                if status.id.is_none() {
                    status.id = included.get(position).cloned();
                }
                status
            })
            .collect();
        statuses.extend(rejected);
        Ok(statuses)
    }
}

/// Encoded `_bulk` request
#[derive(Debug, Default)]
pub struct BulkBody {
    /// NDJSON action/document pairs
    pub body: String,
    /// Events present in `body`, in request order
    pub included: Vec<EventId>,
    /// 400 statuses for events left out of `body`
    pub rejected: Vec<ItemStatus>,
}

/// Encode events as NDJSON action/document pairs
///
/// Multi-line JSON payloads are compacted onto one line. Payloads that are
/// not UTF-8, or span lines without being JSON, are left out and rejected
/// per item.
pub fn encode_bulk_body(index: &str, batch: &[Event]) -> BulkBody {
    let mut encoded = BulkBody {
        body: String::with_capacity(batch.iter().map(|e| e.payload.len() + 64).sum()),
        ..BulkBody::default()
    };

    for event in batch {
        let document = match bulk_document(&event.payload) {
            Ok(document) => document,
            Err(reason) => {
                encoded
                    .rejected
                    .push(ItemStatus::for_id(event.id.clone(), 400).with_error(reason));
                continue;
            }
        };

        let action = json!({ "index": { "_index": index, "_id": event.id.as_str() } });
        encoded.body.push_str(&action.to_string());
        encoded.body.push('\n');
        encoded.body.push_str(&document);
        encoded.body.push('\n');
        encoded.included.push(event.id.clone());
    }

    encoded
}

fn bulk_document(payload: &[u8]) -> Result<Cow<'_, str>, String> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| format!("payload is not UTF-8: {e}"))?
        .trim_end();
    if !text.contains('\n') {
        return Ok(Cow::Borrowed(text));
    }

    serde_json::from_str::<serde_json::Value>(text)
        .map(|value| Cow::Owned(value.to_string()))
        .map_err(|e| format!("payload spans multiple lines and is not JSON: {e}"))
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Parse a `_bulk` response into per-item statuses
///
/// `_id` is echoed when present; each item holds exactly one action entry.
pub fn parse_bulk_response(body: &str) -> Result<Vec<ItemStatus>, serde_json::Error> {
    let response: BulkResponse = serde_json::from_str(body)?;
    if response.errors {
        debug!(items = response.items.len(), "Bulk response reports item errors");
    }

    Ok(response
        .items
        .into_iter()
        .filter_map(|action| action.into_values().next())
        .map(|item| ItemStatus {
            id: item.id.map(Into::into),
            status: item.status,
            error: item.error.map(describe_error),
        })
        .collect())
}

fn describe_error(error: serde_json::Value) -> String {
    let kind = error.get("type").and_then(|v| v.as_str());
    let reason = error.get("reason").and_then(|v| v.as_str());
    match (kind, reason) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_body() {
        let batch = vec![
            Event::new("a", "{\"msg\":\"one\"}\n"),
            Event::new("b", "{\"msg\":\"two\"}"),
        ];
        let encoded = encode_bulk_body("logs", &batch);
        let lines: Vec<_> = encoded.body.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"index":{"_id":"a","_index":"logs"}}"#);
        assert_eq!(lines[1], r#"{"msg":"one"}"#);
        assert!(encoded.body.ends_with('\n'));
        assert_eq!(encoded.included, vec![EventId::from("a"), EventId::from("b")]);
        assert!(encoded.rejected.is_empty());
    }

    #[test]
    fn test_encode_compacts_pretty_json() {
        let batch = vec![Event::new("a", "{\n  \"msg\": 1\n}")];
        let encoded = encode_bulk_body("logs", &batch);

        assert_eq!(encoded.body.lines().nth(1), Some(r#"{"msg":1}"#));
        assert!(encoded.rejected.is_empty());
    }

    #[test]
    fn test_encode_rejects_per_item() {
        let batch = vec![
            Event::new("ok", "{}"),
            Event::new("binary", &b"\xff\xfe"[..]),
            Event::new("text", "line one\nline two"),
        ];
        let encoded = encode_bulk_body("logs", &batch);

        assert_eq!(encoded.included, vec![EventId::from("ok")]);
        assert_eq!(encoded.body.lines().count(), 2);
        let rejected: Vec<_> = encoded.rejected.iter().map(|s| (s.id.clone(), s.status)).collect();
        assert_eq!(
            rejected,
            vec![(Some(EventId::from("binary")), 400), (Some(EventId::from("text")), 400)]
        );
        assert!(encoded.rejected[0].error.as_deref().unwrap().contains("not UTF-8"));
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 429,
                    "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}}},
                {"create": {"_id": "c", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}}
            ]
        }"#;
        let statuses = parse_bulk_response(body).unwrap();

        assert_eq!(statuses.len(), 3);
        assert_eq!(statuses[0].id, Some(EventId::from("a")));
        assert_eq!(statuses[1].status, 429);
        assert_eq!(
            statuses[1].error.as_deref(),
            Some("es_rejected_execution_exception: queue full")
        );
        assert_eq!(statuses[2].status, 400);
    }

    #[test]
    fn test_from_params_requires_index() {
        let params = HashMap::from([("url".to_string(), "http://localhost:9200".to_string())]);
        let err = SearchBulkSink::from_params("search", &params).err().unwrap();
        assert!(err.to_string().contains("missing 'index'"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        // Port 9 (discard) is closed on test hosts
        let sink = SearchBulkSink::new("search", "http://127.0.0.1:9", "logs", Duration::from_secs(2)).unwrap();
        let err = sink.send(&[Event::new("a", "{}")]).await.unwrap_err();
        assert!(err.kind().is_transient());
    }
}
