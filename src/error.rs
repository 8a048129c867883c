//! Error types for influxql-stream.

use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by row parser callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type for influxql-stream operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed (connect, TLS, or the body stream broke).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status code.
    #[error("InfluxDB returned {status}: {message}")]
    Status {
        /// HTTP status code of the response.
        status: reqwest::StatusCode,
        /// Error message from the response body, if any.
        message: String,
    },

    /// A framed response document was not valid JSON for the expected shape.
    #[error("Failed to decode response document: {0}")]
    Json(#[from] serde_json::Error),

    /// The byte stream could not be split into JSON documents.
    #[error("Malformed response stream at byte {offset}: {message}")]
    Malformed {
        /// Absolute offset in the response body.
        offset: u64,
        /// What was wrong.
        message: String,
    },

    /// Query returned an error from InfluxDB inside the response stream.
    #[error("Query error from InfluxDB: {message}")]
    Query {
        /// Error message returned by InfluxDB.
        message: String,
        /// Statement that failed, when the error was reported per statement.
        statement_id: Option<u64>,
    },

    /// The caller's row parser failed.
    #[error("Row parser failed: {0}")]
    RowParser(#[source] BoxError),

    /// The query was cancelled by the caller, or the call was abandoned.
    #[error("Query was cancelled")]
    Cancelled,

    /// The query exceeded the configured request timeout.
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error during streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for explicit cancellation and for timeouts.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Timeout(_))
    }

    /// True when the connection could not be used: transport errors and
    /// non-success status codes.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Status { .. } | Error::Io(_))
    }

    /// True when the response body could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Json(_) | Error::Malformed { .. })
    }
}

/// Result type alias for influxql-stream operations.
pub type Result<T> = std::result::Result<T, Error>;
