//! Connector SDK error types.
//!
//! Provides a unified error hierarchy for extraction:
//! - `ConnectorError`: Top-level error for partition creation and execution
//! - `SerdeError`: Row to Arrow conversion errors
//! - `FailureScope`: Whether an error fails one stream or the whole sync

use thiserror::Error;
use tributary_core::query::QueryError;
use tributary_core::reservation::ReservationError;

/// How far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// Only the affected stream fails; other streams keep running.
    Stream,
    /// The whole sync must abort.
    Sync,
}

/// Errors that can occur during extraction.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Invalid connector configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Error reading rows from the source.
    #[error("read error: {0}")]
    ReadError(String),

    /// Error emitting rows downstream.
    #[error("write error: {0}")]
    WriteError(String),

    /// Checkpoint load, save, or decode error.
    #[error("checkpoint error: {0}")]
    CheckpointError(String),

    /// A lifecycle transition that is not allowed.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// The expected state.
        expected: String,
        /// The actual state.
        actual: String,
    },

    /// The stream's shape does not support the requested read.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Memory reservation failed.
    #[error("reservation error: {0}")]
    Reservation(#[from] ReservationError),

    /// Query compilation failed.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Row conversion error.
    #[error("serde error: {0}")]
    Serde(#[from] SerdeError),

    /// A read returned more rows than the partition's reservation holds.
    #[error("partition {partition} read about {needed} bytes into a {reserved}-byte reservation")]
    ReservationOverflow {
        /// The reading partition.
        partition: String,
        /// Estimated size of the rows read.
        needed: u64,
        /// Bytes reserved by the partition.
        reserved: u64,
    },

    /// One or more partitions of a concurrent extraction failed.
    #[error("{failed} of {total} partitions failed; first error: {first}")]
    PartitionsFailed {
        /// Number of failed partitions.
        failed: usize,
        /// Number of partitions dispatched.
        total: usize,
        /// The first failure observed.
        first: Box<ConnectorError>,
    },

    /// The extraction was cancelled before completing.
    #[error("extraction cancelled")]
    Cancelled,

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),

    /// An I/O error from the underlying system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Returns how far this error propagates.
    ///
    /// Configuration errors stop the sync before any creator is built.
    /// Everything else is confined to the stream it occurred in.
    #[must_use]
    pub fn scope(&self) -> FailureScope {
        match self {
            Self::ConfigurationError(_) => FailureScope::Sync,
            _ => FailureScope::Stream,
        }
    }
}

impl From<tributary_core::Error> for ConnectorError {
    fn from(e: tributary_core::Error) -> Self {
        match e {
            tributary_core::Error::Reservation(e) => Self::Reservation(e),
            tributary_core::Error::Query(e) => Self::Query(e),
        }
    }
}

/// Errors that occur while converting rows to Arrow.
#[derive(Debug, Error)]
pub enum SerdeError {
    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// A value could not be converted to the target Arrow type.
    #[error("type conversion error: field '{field}', expected {expected}: {message}")]
    TypeConversion {
        /// The field name.
        field: String,
        /// The expected Arrow data type.
        expected: String,
        /// Details about the conversion failure.
        message: String,
    },

    /// A row does not have one value per column.
    #[error("malformed row: expected {expected} values, got {got}")]
    MalformedRow {
        /// Number of columns.
        expected: usize,
        /// Number of values in the row.
        got: usize,
    },

    /// Arrow rejected the assembled columns.
    #[error("arrow error: {0}")]
    Arrow(String),
}

impl From<serde_json::Error> for SerdeError {
    fn from(e: serde_json::Error) -> Self {
        SerdeError::Json(e.to_string())
    }
}
