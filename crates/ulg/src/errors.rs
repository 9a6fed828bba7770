//! 💀 Typed errors, for the places where a caller has to branch on WHAT went wrong.
//!
//! Everywhere else it's `anyhow` and a context string. Here it's enums, because the
//! HTTP layer needs to know "store is down" (503) from "store said no" (502), and the
//! coordinator needs to know which file failures are worth another attempt.

use reqwest::StatusCode;
use thiserror::Error;

/// 📡 Things that go wrong talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 🔌 never got an answer: refused, timed out, DNS, TLS, the usual suspects
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    /// 🙅 got an answer, and the answer was a non-2xx status
    #[error("document store returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    /// 🧩 got a 2xx answer we couldn't make sense of
    #[error("failed to decode document store response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn rejected(status: StatusCode, body: String) -> Self {
        StoreError::Rejected { status, body }
    }

    /// 🚦 true when the store itself is down or overloaded, as opposed to refusing our request
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Rejected { status, .. } => matches!(
                *status,
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
            ),
            StoreError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Unavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// 📁 Why one ingestion file ended up in the error pile. Every variant routes the file
/// to `error`; only `Transport` is worth trying again unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileError {
    #[error("could not read file: {0}")]
    Read(String),
    #[error("could not encode file: {0}")]
    Encode(String),
    #[error("could not reach the document store: {0}")]
    Transport(String),
    #[error("{failed} documents rejected, {succeeded} accepted: {reason}")]
    PartialIndex {
        succeeded: usize,
        failed: usize,
        reason: String,
    },
}

impl FileError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FileError::Transport(_))
    }

    /// 🏷️ short label for report tables
    pub fn kind(&self) -> &'static str {
        match self {
            FileError::Read(_) => "ReadError",
            FileError::Encode(_) => "EncodeError",
            FileError::Transport(_) => "TransportError",
            FileError::PartialIndex { .. } => "PartialIndexError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_transport_failures_get_a_second_chance() {
        assert!(FileError::Transport("connection refused".into()).is_retryable());
        assert!(!FileError::Read("gone".into()).is_retryable());
        assert!(!FileError::Encode("empty".into()).is_retryable());
        assert!(
            !FileError::PartialIndex {
                succeeded: 9,
                failed: 1,
                reason: "mapper_parsing_exception".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn the_one_where_partial_index_explains_itself() {
        let the_error = FileError::PartialIndex {
            succeeded: 9,
            failed: 1,
            reason: "bad date".into(),
        };
        assert_eq!(the_error.to_string(), "1 documents rejected, 9 accepted: bad date");
        assert_eq!(the_error.kind(), "PartialIndexError");
    }

    #[test]
    fn the_one_where_a_busy_cluster_counts_as_unavailable() {
        assert!(StoreError::Unavailable("refused".into()).is_unavailable());
        assert!(StoreError::rejected(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_unavailable());
        assert!(!StoreError::rejected(StatusCode::BAD_REQUEST, String::new()).is_unavailable());
        assert!(!StoreError::Decode("?".into()).is_unavailable());
    }
}
