//! Concurrent partitions creator.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::state::{CreatorState, Lifecycle};
use super::{finish, split, worker, ExtractContext, ExtractSummary};
use crate::error::ConnectorError;
use crate::partition::{JdbcPartition, PartitionFactory};

/// Runs sub-partitions on a pool of at most `max_concurrency` workers.
///
/// A worker holds its pool permit before it reserves memory, so at most
/// `max_concurrency` reservations are held by one stream at a time. A failed
/// partition does not stop its siblings: the creator waits for every worker
/// and then reports all failures at once, keeping the checkpoints of the
/// partitions that succeeded.
pub struct ConcurrentCreator {
    factory: Arc<dyn PartitionFactory>,
    partition: JdbcPartition,
}

impl ConcurrentCreator {
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

        let total = plan.partitions.len();
        let mut summary = ExtractSummary::new(stream.clone(), "concurrent", total);
        let pool = Arc::new(Semaphore::new(ctx.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for partition in plan.partitions {
            let ctx = ctx.clone();
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let _permit = pool
                    .acquire_owned()
                    .await
                    .map_err(|_| ConnectorError::Cancelled)?;
                let mut worker_state = Lifecycle::after_split(partition.stream_id().clone());
                worker_state.advance(CreatorState::Executing(partition.id().clone()))?;
                let rows = worker::run_partition(&ctx, &partition).await?;
                worker_state.advance(CreatorState::Checkpointed(partition.id().clone()))?;
                Ok::<_, ConnectorError>(rows)
            });
        }

        let mut failed = 0;
        let mut first = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(ConnectorError::Internal(format!("partition task failed: {e}")))
            });
            match outcome {
                Ok(rows) => summary.record(rows),
                Err(e) => {
                    failed += 1;
                    if first.is_none() {
                        first = Some(e);
                    }
                }
            }
        }

        if let Some(first) = first {
            warn!(stream = %stream, failed, total, "partitions failed");
            return Err(ConnectorError::PartitionsFailed {
                failed,
                total,
                first: Box::new(first),
            });
        }
        finish(ctx, &self.partition, &mut lifecycle, plan.prior_states, &summary).await?;
        Ok(summary)
    }
}
