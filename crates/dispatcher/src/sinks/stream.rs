//! RecordStreamSink - batched record production to a stream service

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use contracts::{ContractError, Event, ItemStatus, SinkTransport};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{endpoint, http_client, map_request_error, required_param, success_body, timeout_from_params};

const PUT_RECORDS_TARGET: &str = "Kinesis_20131202.PutRecords";

/// Status code for a per-record error code
pub fn status_for_error_code(code: &str) -> u16 {
    match code {
        "ProvisionedThroughputExceededException" => 429,
        "InternalFailure" => 500,
        "ValidationException" | "InvalidArgumentException" => 400,
        _ => 500,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsRequest<'a> {
    stream_name: &'a str,
    records: Vec<PutRecordsEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsEntry<'a> {
    data: String,
    partition_key: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsResponse {
    #[serde(default)]
    failed_record_count: u32,
    #[serde(default)]
    records: Vec<PutRecordsResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRecordsResult {
    #[serde(default)]
    sequence_number: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Produces every event as one record of a batch-put request
///
/// Responses are positional; the dispatcher aligns them to the request.
pub struct RecordStreamSink {
    name: String,
    stream_name: String,
    endpoint: Url,
    client: Client,
}

impl RecordStreamSink {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        stream_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let endpoint = endpoint(&name, base_url, "")?;
        let client = http_client(&name, timeout)?;

        Ok(Self {
            stream_name: stream_name.into(),
            name,
            endpoint,
            client,
        })
    }

    /// Create from params (`url`, `stream_name`, optional `timeout_ms`)
    pub fn from_params(
        name: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let url = required_param(&name, params, "url")?;
        let stream_name = required_param(&name, params, "stream_name")?.to_string();
        let timeout = timeout_from_params(&name, params)?;
        Self::new(name, url, stream_name, timeout)
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    fn encode_request<'a>(&'a self, batch: &'a [Event]) -> PutRecordsRequest<'a> {
        PutRecordsRequest {
            stream_name: &self.stream_name,
            records: batch
                .iter()
                .map(|event| PutRecordsEntry {
                    data: STANDARD.encode(&event.payload),
                    partition_key: event.routing_key(),
                })
                .collect(),
        }
    }
}

fn decode_response(body: &str) -> Result<Vec<ItemStatus>, serde_json::Error> {
    let response: PutRecordsResponse = serde_json::from_str(body)?;
    if response.failed_record_count > 0 {
        debug!(failed = response.failed_record_count, "Batch-put reports failed records");
    }

    Ok(response
        .records
        .into_iter()
        .map(|record| match record.error_code {
            Some(code) => {
                let message = match record.error_message {
                    Some(message) => format!("{code}: {message}"),
                    None => code.clone(),
                };
                ItemStatus::positional(status_for_error_code(&code)).with_error(message)
            }
            None => {
                let status = ItemStatus::positional(200);
                match record.sequence_number {
                    Some(_) => status,
                    None => status.with_error("record accepted without sequence number"),
                }
            }
        })
        .collect())
}

impl SinkTransport for RecordStreamSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "record_stream_send",
        skip(self, batch),
        fields(sink = %self.name, stream = %self.stream_name, events = batch.len())
    )]
    async fn send(&self, batch: &[Event]) -> Result<Vec<ItemStatus>, ContractError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-amz-json-1.1")
            .header("X-Amz-Target", PUT_RECORDS_TARGET)
            .json(&self.encode_request(batch))
            .send()
            .await
            .map_err(|e| map_request_error(&self.name, e))?;

        let status = response.status().as_u16();
        let body = success_body(&self.name, response).await?;
        decode_response(&body).map_err(|e| ContractError::ServerBusy {
            sink_name: self.name.clone(),
            status,
            message: format!("unreadable batch-put response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{classify_http_status, ItemClass};

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(status_for_error_code("ProvisionedThroughputExceededException"), 429);
        assert_eq!(status_for_error_code("InternalFailure"), 500);
        assert_eq!(status_for_error_code("ValidationException"), 400);
        assert_eq!(status_for_error_code("KMSThrottlingException"), 500);
    }

    #[test]
    fn test_decode_mixed_response() {
        let body = r#"{
            "FailedRecordCount": 2,
            "Records": [
                {"SequenceNumber": "4955", "ShardId": "shardId-000000000000"},
                {"ErrorCode": "ProvisionedThroughputExceededException", "ErrorMessage": "Rate exceeded"},
                {"ErrorCode": "ValidationException"}
            ]
        }"#;
        let statuses = decode_response(body).unwrap();

        let classes: Vec<_> = statuses.iter().map(|s| classify_http_status(s.status)).collect();
        assert_eq!(
            classes,
            vec![ItemClass::Success, ItemClass::Retryable, ItemClass::Fatal]
        );
        assert!(statuses.iter().all(|s| s.id.is_none()));
        assert_eq!(
            statuses[1].error.as_deref(),
            Some("ProvisionedThroughputExceededException: Rate exceeded")
        );
    }

    #[test]
    fn test_request_uses_partition_key() {
        let sink = RecordStreamSink::new("stream", "http://localhost:4567", "events", Duration::from_secs(1)).unwrap();
        let batch = vec![
            Event::new("a", "hello").with_partition_key("user-1"),
            Event::new("b", "world"),
        ];
        let encoded = serde_json::to_value(sink.encode_request(&batch)).unwrap();

        assert_eq!(encoded["StreamName"], "events");
        assert_eq!(encoded["Records"][0]["PartitionKey"], "user-1");
        assert_eq!(encoded["Records"][0]["Data"], "aGVsbG8=");
        assert_eq!(encoded["Records"][1]["PartitionKey"], "b");
    }
}
