//! ==============================================================================
//! error.rs - typed failures of a single poll iteration
//! ==============================================================================
//!
//! purpose:
//!     the poll loop needs to tell failures apart (a timeout is counted
//!     separately from a bad payload), so the fetcher, the converter and the
//!     sink each return a small typed error instead of an anyhow chain.
//!
//! relationships:
//!     - produced by: fetcher.rs, convert.rs, sink.rs
//!     - consumed by: poller.rs (classify, count, record in the snapshot)
//!
//! none of these are fatal. the loop records them and moves on to the next
//! tick.
//!
//! ==============================================================================

use std::time::Duration;

/// Failure of one request to the gateway's live-data endpoint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// The full round trip (connect + read) exceeded the configured timeout.
    #[error("device did not answer within {0:?}")]
    Timeout(Duration),

    /// Nothing is listening at the configured address.
    #[error("connection refused by {0}")]
    ConnectionRefused(String),

    /// The body arrived but is not the JSON object we expect.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("fetch failed: {0}")]
    Other(String),
}

/// A raw field that could not be turned into a canonical value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert field `{field}`: {reason}")]
pub struct ConversionError {
    /// Raw key as sent by the device.
    pub field: String,
    pub reason: String,
}

impl ConversionError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// A required field is not present in the feed at all.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "required field missing")
    }
}

/// Failure to forward a reading to the time-series sink.
///
/// The poll loop treats every variant the same way (count and continue);
/// the distinction only shows up in the log line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    #[error("sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// The sink answered but refused the write.
    #[error("sink rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl SinkError {
    /// Whether retrying the same write later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Timeout(_) | SinkError::Unreachable(_) => true,
            SinkError::Rejected { status, .. } => *status >= 500,
        }
    }
}
