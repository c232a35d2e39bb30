//! Core connector traits.
//!
//! Defines the async traits a concrete source implements to plug into
//! partitioned extraction:
//! - `SelectQuerier`: Executes a compiled query and returns its rows
//! - `RecordSink`: Receives row batches and checkpoints, in emission order

use std::fmt;

use arrow_array::RecordBatch;
use async_trait::async_trait;
use serde_json::Value;
use tributary_core::query::SelectQuery;

use crate::checkpoint::OpaqueState;
use crate::error::ConnectorError;
use crate::feed::StreamId;

/// One row, with one value per selected column.
pub type Record = Vec<Value>;

/// Identifier of a partition within a sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(String);

impl PartitionId {
    /// Creates the id of the `seq`-th partition of `stream`.
    #[must_use]
    pub fn new(stream: &StreamId, seq: u64) -> Self {
        Self(format!("{stream}#{seq}"))
    }

    /// Returns the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A batch of rows read by one partition.
#[derive(Debug, Clone)]
pub struct PartitionBatch {
    /// The stream the rows belong to.
    pub stream: StreamId,

    /// The partition that read them.
    pub partition: PartitionId,

    /// The rows as an Arrow `RecordBatch`.
    pub records: RecordBatch,
}

impl PartitionBatch {
    /// Returns the number of rows in the batch.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.records.num_rows()
    }
}

/// Executes compiled queries against the source.
///
/// # Example
///
/// ```rust,ignore
/// struct PgQuerier { pool: PgPool }
///
/// #[async_trait]
/// impl SelectQuerier for PgQuerier {
///     async fn execute(&self, query: &SelectQuery) -> Result<Vec<Record>, ConnectorError> {
///         let mut stmt = self.pool.prepare(&query.sql).await?;
///         for binding in &query.bindings {
///             stmt.bind(&binding.value, binding.field_type.field_type());
///         }
///         // ...
///     }
/// }
/// ```
#[async_trait]
pub trait SelectQuerier: Send + Sync {
    /// Runs `query` and returns every row it produces, with values in
    /// `query.columns` order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::ReadError` if the query fails.
    async fn execute(&self, query: &SelectQuery) -> Result<Vec<Record>, ConnectorError>;
}

/// Destination for extracted rows and checkpoints.
///
/// For a given partition, every `emit` happens before its `checkpoint`.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Receives a batch of rows.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::WriteError` if the batch cannot be accepted.
    async fn emit(&self, batch: PartitionBatch) -> Result<(), ConnectorError>;

    /// Receives the checkpoint of a completed partition.
    ///
    /// Called after the state has been persisted. Default does nothing.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::WriteError` if the checkpoint cannot be forwarded.
    async fn checkpoint(
        &self,
        _stream: &StreamId,
        _partition: &PartitionId,
        _state: &OpaqueState,
    ) -> Result<(), ConnectorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Int64Array;
    use arrow_schema::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_partition_id() {
        let id = PartitionId::new(&StreamId::new(Some("public"), "orders"), 3);
        assert_eq!(id.to_string(), "public.orders#3");
        assert_eq!(id.as_str(), "public.orders#3");
    }

    #[test]
    fn test_partition_batch_rows() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, true)]));
        let records =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1, 2, 3]))]).unwrap();
        let stream = StreamId::new(None, "t");
        let batch = PartitionBatch {
            partition: PartitionId::new(&stream, 0),
            stream,
            records,
        };
        assert_eq!(batch.num_rows(), 3);
    }
}
