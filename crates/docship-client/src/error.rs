//! Error types for the bulk client.

use thiserror::Error;

/// Failure picking an index or pipeline name for an event.
#[derive(Error, Debug)]
pub enum SelectError {
    /// The selecting field holds something other than a string
    #[error("Field {field} is not a string: {value}")]
    NotAString {
        field: String,
        value: serde_json::Value,
    },

    /// Failure reported by a custom selector
    #[error("{0}")]
    Custom(String),
}

/// Local failure turning one event into a bulk item.
///
/// An event failing here never reaches the wire and is counted as
/// non-indexable.
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Index selector could not produce a name
    #[error("Failed to select event index: {0}")]
    IndexSelection(#[source] SelectError),

    /// Pipeline selector failed
    #[error("Failed to select pipeline: {0}")]
    PipelineSelection(#[source] SelectError),

    /// Neither metadata nor the selector supplied an index
    #[error("No target index for event")]
    MissingIndex,

    /// Selected index name is not accepted by the indexing service
    #[error("Invalid index name {name:?}: {reason}")]
    InvalidIndexName { name: String, reason: String },

    /// A delete action needs a document id
    #[error("op_type delete requires _id")]
    DeleteWithoutId,

    /// Document serialization failed
    #[error("Failed to encode event for output: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single bulk HTTP exchange.
///
/// Any of these means the server's per-item outcome is unknown.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection, DNS, TLS or timeout failure
    #[error("Bulk request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Status line arrived but the body could not be read
    #[error("Failed to read bulk response: {0}")]
    ResponseBody(#[source] reqwest::Error),

    /// Exchange aborted by the caller's cancellation token
    #[error("Bulk request cancelled")]
    Cancelled,

    /// Request body could not be produced
    #[error("Failed to build bulk request: {0}")]
    Build(#[from] std::io::Error),
}

/// Error surfaced by [`crate::BulkPublisher::publish`].
///
/// Every other failure class is absorbed into the batch's
/// ack/retry/drop calls and the metrics.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PublishError {
    /// The server rejected items for capacity reasons; they were retried
    #[error("{count} bulk items rejected with 429 Too Many Requests")]
    TooManyRequests { count: usize },
}

/// Failure constructing a client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Settings failed validation
    #[error("Invalid configuration: {0}")]
    Config(#[from] docship_types::DocshipError),

    /// Base URL could not be parsed
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Configured header name or value is not valid HTTP
    #[error("Invalid header {0:?}")]
    InvalidHeader(String),

    /// Server version string could not be parsed
    #[error("Invalid server version {0:?}")]
    InvalidVersion(String),

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
