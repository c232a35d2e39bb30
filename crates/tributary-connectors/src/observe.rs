//! Lifecycle hooks for extraction.
//!
//! The partitions creator and the reservation manager report lifecycle
//! events to injected observers instead of logging directly.
//! [`TracingObserver`] turns both kinds of event into `tracing` records.

use tracing::{debug, info, warn};
use tributary_core::reservation::{NoopObserver, ReservationObserver};

use crate::error::ConnectorError;
use crate::feed::StreamId;
use crate::partition::JdbcPartition;

/// Hook invoked at partition lifecycle points.
///
/// All methods default to doing nothing.
pub trait ExtractObserver: Send + Sync {
    /// The initial partition of a stream was created.
    fn partition_created(&self, _partition: &JdbcPartition) {}

    /// A partition was split against `prior_states` checkpoints.
    fn partitions_split(
        &self,
        _stream: &StreamId,
        _prior_states: usize,
        _partitions: &[JdbcPartition],
    ) {
    }

    /// A partition emitted all of its rows and its checkpoint was saved.
    fn partition_checkpointed(&self, _partition: &JdbcPartition, _rows: u64) {}

    /// A partition failed. No checkpoint is emitted for it.
    fn partition_failed(&self, _partition: &JdbcPartition, _error: &ConnectorError) {}
}

impl ExtractObserver for NoopObserver {}

/// Observer that records every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExtractObserver for TracingObserver {
    fn partition_created(&self, partition: &JdbcPartition) {
        info!(
            stream = %partition.stream_id(),
            partition = %partition.id(),
            domain = %partition.checkpoint_key(),
            "partition created"
        );
    }

    fn partitions_split(&self, stream: &StreamId, prior_states: usize, partitions: &[JdbcPartition]) {
        info!(
            stream = %stream,
            prior_states,
            partitions = partitions.len(),
            "partition split"
        );
    }

    fn partition_checkpointed(&self, partition: &JdbcPartition, rows: u64) {
        info!(
            stream = %partition.stream_id(),
            partition = %partition.id(),
            rows,
            "partition checkpointed"
        );
    }

    fn partition_failed(&self, partition: &JdbcPartition, error: &ConnectorError) {
        warn!(
            stream = %partition.stream_id(),
            partition = %partition.id(),
            error = %error,
            "partition failed"
        );
    }
}

impl ReservationObserver for TracingObserver {
    fn reservation_granted(&self, amount: u64, reserved: u64) {
        debug!(amount, reserved, "reservation granted");
    }

    fn reservation_blocked(&self, amount: u64, reserved: u64) {
        debug!(amount, reserved, "reservation blocked, waiting for capacity");
    }

    fn reservation_released(&self, amount: u64, reserved: u64) {
        debug!(amount, reserved, "reservation released");
    }
}
