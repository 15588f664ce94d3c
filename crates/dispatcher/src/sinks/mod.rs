//! Sink transports
//!
//! Contains SearchBulkSink, RecordStreamSink and LogSink, plus the HTTP
//! plumbing the first two share.

mod bulk;
mod log;
mod stream;

use std::collections::HashMap;
use std::time::Duration;

use contracts::ContractError;
use reqwest::{Client, Response, Url};

pub use self::bulk::{encode_bulk_body, parse_bulk_response, BulkBody, SearchBulkSink};
pub use self::log::LogSink;
pub use self::stream::{status_for_error_code, RecordStreamSink};

/// Request timeout when `timeout_ms` is not configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read `timeout_ms` from sink params
pub(crate) fn timeout_from_params(
    sink_name: &str,
    params: &HashMap<String, String>,
) -> Result<Duration, ContractError> {
    match params.get("timeout_ms") {
        None => Ok(DEFAULT_TIMEOUT),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| {
                ContractError::config_validation(
                    format!("sinks.{sink_name}.timeout_ms"),
                    format!("invalid timeout '{raw}': {e}"),
                )
            }),
    }
}

pub(crate) fn required_param<'a>(
    sink_name: &str,
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, ContractError> {
    params.get(key).map(String::as_str).ok_or_else(|| {
        ContractError::config_validation(
            format!("sinks.{sink_name}.{key}"),
            format!("missing '{key}' parameter"),
        )
    })
}

/// Build the request URL from a base URL and a path
///
/// Invalid URLs are configuration errors and never reach a send.
pub(crate) fn endpoint(sink_name: &str, base: &str, path: &str) -> Result<Url, ContractError> {
    let invalid = |message: String| ContractError::config_validation(format!("sinks.{sink_name}.url"), message);

    let base = Url::parse(base).map_err(|e| invalid(format!("invalid url '{base}': {e}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }

    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| invalid(format!("invalid url '{joined}': {e}")))
}

pub(crate) fn http_client(sink_name: &str, timeout: Duration) -> Result<Client, ContractError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ContractError::config_validation(format!("sinks.{sink_name}"), e.to_string()))
}

/// Map a request failure without a usable response
pub(crate) fn map_request_error(sink_name: &str, err: reqwest::Error) -> ContractError {
    if err.is_builder() {
        ContractError::config_validation(format!("sinks.{sink_name}"), err.to_string())
    } else if let Some(status) = err.status() {
        ContractError::from_status(sink_name, status.as_u16(), err.to_string())
    } else {
        // connect, timeout, body and decode failures
        ContractError::network(sink_name, err.to_string())
    }
}

/// Body of a 2xx response; any other status becomes a whole-request error
pub(crate) async fn success_body(sink_name: &str, response: Response) -> Result<String, ContractError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| map_request_error(sink_name, e))?;

    if status.is_success() {
        Ok(body)
    } else {
        Err(ContractError::from_status(sink_name, status.as_u16(), body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ErrorKind;

    #[test]
    fn test_endpoint_join() {
        let url = endpoint("s", "http://localhost:9200/", "/_bulk").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/_bulk");
    }

    #[test]
    fn test_endpoint_rejects_bad_urls() {
        let err = endpoint("s", "not a url", "_bulk").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = endpoint("s", "ftp://host", "_bulk").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_timeout_param() {
        let mut params = HashMap::new();
        assert_eq!(timeout_from_params("s", &params).unwrap(), DEFAULT_TIMEOUT);

        params.insert("timeout_ms".to_string(), "250".to_string());
        assert_eq!(timeout_from_params("s", &params).unwrap(), Duration::from_millis(250));

        params.insert("timeout_ms".to_string(), "soon".to_string());
        assert!(timeout_from_params("s", &params).is_err());
    }
}
