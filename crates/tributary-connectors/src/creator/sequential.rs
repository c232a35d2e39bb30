//! Sequential partitions creator.

use std::sync::Arc;

use super::state::{CreatorState, Lifecycle};
use super::{finish, split, worker, ExtractContext, ExtractSummary};
use crate::error::ConnectorError;
use crate::partition::{JdbcPartition, PartitionFactory};

/// Runs sub-partitions one at a time, in split order.
///
/// Stops at the first failed partition. Partitions that finished before it
/// keep their checkpoints.
pub struct SequentialCreator {
    factory: Arc<dyn PartitionFactory>,
    partition: JdbcPartition,
}

impl SequentialCreator {
    pub(crate) fn new(factory: Arc<dyn PartitionFactory>, partition: JdbcPartition) -> Self {
        Self { factory, partition }
    }

    /// Returns the initial partition.
    #[must_use]
    pub fn partition(&self) -> &JdbcPartition {
        &self.partition
    }

    pub(crate) async fn run(self, ctx: &ExtractContext) -> Result<ExtractSummary, ConnectorError> {
        let stream = self.partition.stream_id().clone();
        let mut lifecycle = Lifecycle::new(stream.clone());
        let plan = split(ctx, self.factory.as_ref(), &self.partition, &mut lifecycle).await?;

        let mut summary = ExtractSummary::new(stream, "sequential", plan.partitions.len());
        for partition in &plan.partitions {
            lifecycle.advance(CreatorState::Executing(partition.id().clone()))?;
            let rows = worker::run_partition(ctx, partition).await?;
            lifecycle.advance(CreatorState::Checkpointed(partition.id().clone()))?;
            summary.record(rows);
        }
        finish(ctx, &self.partition, &mut lifecycle, plan.prior_states, &summary).await?;
        Ok(summary)
    }
}
