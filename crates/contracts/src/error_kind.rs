//! ErrorKind - failure classification used by retry decisions
//!
//! Kinds form a small closed hierarchy. A retryable set containing a parent
//! kind also admits every subtype of that parent.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Any recoverable condition (parent of the four kinds below)
    Transient,
    /// Connection refused/reset, timeouts
    Network,
    /// Sink asked us to slow down (429, throughput exceeded)
    Throttled,
    /// Sink-side 5xx
    ServerBusy,
    /// Some items of a bulk request need another attempt
    PartialFailure,

    /// Malformed request; never retried
    Client,
    /// Checkpoint backend is down
    StoreUnavailable,
    /// Checkpoint backend rejected or returned unreadable state
    StoreCorrupt,
    /// Missing or invalid setting
    Configuration,
    /// Retry budget used up
    ExhaustedRetries,
    /// Owning session was torn down
    Cancelled,
    Io,
    Other,
}

impl ErrorKind {
    /// Declared supertype, if any
    pub fn parent(self) -> Option<ErrorKind> {
        match self {
            Self::Network | Self::Throttled | Self::ServerBusy | Self::PartialFailure => {
                Some(Self::Transient)
            }
            _ => None,
        }
    }

    /// True if `self` equals `ancestor` or is a declared subtype of it
    pub fn is_a(self, ancestor: ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// Shorthand for `is_a(ErrorKind::Transient)`
    pub fn is_transient(self) -> bool {
        self.is_a(Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Network => "network",
            Self::Throttled => "throttled",
            Self::ServerBusy => "server_busy",
            Self::PartialFailure => "partial_failure",
            Self::Client => "client",
            Self::StoreUnavailable => "store_unavailable",
            Self::StoreCorrupt => "store_corrupt",
            Self::Configuration => "configuration",
            Self::ExhaustedRetries => "exhausted_retries",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtypes_match_parent() {
        for kind in [
            ErrorKind::Network,
            ErrorKind::Throttled,
            ErrorKind::ServerBusy,
            ErrorKind::PartialFailure,
        ] {
            assert!(kind.is_a(ErrorKind::Transient), "{kind} should be transient");
            assert!(kind.is_a(kind));
        }
    }

    #[test]
    fn test_parent_does_not_match_subtype() {
        assert!(!ErrorKind::Transient.is_a(ErrorKind::Network));
        assert!(!ErrorKind::Throttled.is_a(ErrorKind::Network));
    }

    #[test]
    fn test_fatal_kinds_are_not_transient() {
        assert!(!ErrorKind::Client.is_transient());
        assert!(!ErrorKind::Configuration.is_transient());
        assert!(!ErrorKind::StoreUnavailable.is_transient());
    }

    #[test]
    fn test_serde_snake_case() {
        let kinds: Vec<ErrorKind> =
            serde_json::from_str(r#"["transient", "server_busy", "store_unavailable"]"#).unwrap();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::Transient,
                ErrorKind::ServerBusy,
                ErrorKind::StoreUnavailable
            ]
        );
    }
}
