//! Partitions creators.
//!
//! A [`PartitionsCreator`] drives one stream to completion: it loads the
//! stream's prior checkpoints, splits the initial partition against them,
//! and executes the resulting sub-partitions either one at a time
//! ([`SequentialCreator`]) or on a bounded worker pool
//! ([`ConcurrentCreator`]).
//!
//! Every partition reserves memory before it reads, emits its rows, and only
//! then saves its checkpoint. A failed partition saves nothing, so a rerun
//! resumes from exactly the partitions that did not finish. Once every
//! partition has finished, the stream's checkpoints are folded into the
//! single state of the initial partition.

mod concurrent;
mod sequential;
mod state;
mod worker;

use std::fmt;
use std::sync::Arc;

use tracing::debug;
use tributary_core::query::{AnsiSelectQueryGenerator, SelectQueryGenerator};
use tributary_core::reservation::ReservationManager;

pub use concurrent::ConcurrentCreator;
pub use sequential::SequentialCreator;
pub use state::CreatorState;

use crate::checkpoint::CheckpointStore;
use crate::config::{ExecutionMode, ExtractConfig};
use crate::connector::{RecordSink, SelectQuerier};
use crate::error::ConnectorError;
use crate::feed::{Feed, StreamId};
use crate::metrics::ExtractMetrics;
use crate::observe::{ExtractObserver, TracingObserver};
use crate::partition::{JdbcPartition, PartitionFactory};

/// Everything a partition needs to execute.
///
/// Cheap to clone: every collaborator is behind an `Arc`.
#[derive(Clone)]
pub struct ExtractContext {
    querier: Arc<dyn SelectQuerier>,
    generator: Arc<dyn SelectQueryGenerator>,
    store: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    reservations: Arc<ReservationManager>,
    observer: Arc<dyn ExtractObserver>,
    metrics: Arc<ExtractMetrics>,
    config: ExtractConfig,
}

impl ExtractContext {
    /// Creates a context with ANSI SQL generation, `tracing` observers, and
    /// a reservation manager sized by `config.memory_bytes`.
    #[must_use]
    pub fn new(
        querier: Arc<dyn SelectQuerier>,
        store: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            querier,
            generator: Arc::new(AnsiSelectQueryGenerator),
            store,
            sink,
            reservations: Arc::new(ReservationManager::with_observer(
                config.memory_bytes,
                Arc::new(TracingObserver),
            )),
            observer: Arc::new(TracingObserver),
            metrics: Arc::new(ExtractMetrics::new()),
            config,
        }
    }

    /// Replaces the query generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn SelectQueryGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Replaces the partition observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExtractObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replaces the reservation manager, e.g. to share one across feeds.
    #[must_use]
    pub fn with_reservations(mut self, reservations: Arc<ReservationManager>) -> Self {
        self.reservations = reservations;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ExtractMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the query generator.
    #[must_use]
    pub fn generator(&self) -> &Arc<dyn SelectQueryGenerator> {
        &self.generator
    }

    /// Returns the checkpoint store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Returns the reservation manager.
    #[must_use]
    pub fn reservations(&self) -> &Arc<ReservationManager> {
        &self.reservations
    }

    /// Returns the partition observer.
    #[must_use]
    pub fn observer(&self) -> &Arc<dyn ExtractObserver> {
        &self.observer
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> &Arc<ExtractMetrics> {
        &self.metrics
    }

    /// Returns the extraction settings.
    #[must_use]
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }
}

impl fmt::Debug for ExtractContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractContext")
            .field("reservations", &self.reservations)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Outcome of running one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    /// The stream.
    pub stream: StreamId,
    /// Strategy that ran it: `none`, `sequential`, or `concurrent`.
    pub strategy: &'static str,
    /// Number of sub-partitions after the split.
    pub partitions: usize,
    /// Rows emitted.
    pub records: u64,
    /// Checkpoints saved.
    pub checkpoints: usize,
}

impl ExtractSummary {
    fn new(stream: StreamId, strategy: &'static str, partitions: usize) -> Self {
        Self {
            stream,
            strategy,
            partitions,
            records: 0,
            checkpoints: 0,
        }
    }

    fn record(&mut self, rows: u64) {
        self.records += rows;
        self.checkpoints += 1;
    }
}

/// Drives the partitions of one stream.
pub enum PartitionsCreator {
    /// The stream has nothing to read.
    NoPartitions(StreamId),
    /// Sub-partitions run one at a time, in split order.
    Sequential(SequentialCreator),
    /// Sub-partitions run on a bounded worker pool.
    Concurrent(ConcurrentCreator),
}

impl PartitionsCreator {
    /// Returns the strategy name.
    #[must_use]
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::NoPartitions(_) => "none",
            Self::Sequential(_) => "sequential",
            Self::Concurrent(_) => "concurrent",
        }
    }

    /// Returns the stream this creator drives.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        match self {
            Self::NoPartitions(stream) => stream,
            Self::Sequential(c) => c.partition().stream_id(),
            Self::Concurrent(c) => c.partition().stream_id(),
        }
    }

    /// Returns the initial partition, if any.
    #[must_use]
    pub fn partition(&self) -> Option<&JdbcPartition> {
        match self {
            Self::NoPartitions(_) => None,
            Self::Sequential(c) => Some(c.partition()),
            Self::Concurrent(c) => Some(c.partition()),
        }
    }

    /// Runs the stream to completion.
    ///
    /// # Errors
    ///
    /// Returns the first partition error (sequential), or
    /// `ConnectorError::PartitionsFailed` once every worker has finished
    /// (concurrent).
    pub async fn run(self, ctx: &ExtractContext) -> Result<ExtractSummary, ConnectorError> {
        match self {
            Self::NoPartitions(stream) => {
                let mut lifecycle = state::Lifecycle::new(stream.clone());
                lifecycle.advance(CreatorState::Done)?;
                Ok(ExtractSummary::new(stream, "none", 0))
            }
            Self::Sequential(c) => c.run(ctx).await,
            Self::Concurrent(c) => c.run(ctx).await,
        }
    }
}

impl fmt::Debug for PartitionsCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionsCreator")
            .field("strategy", &self.strategy())
            .field("stream", self.stream_id())
            .finish()
    }
}

/// Builds the partitions creator of a feed.
pub struct PartitionsCreatorFactory {
    factory: Arc<dyn PartitionFactory>,
    mode: ExecutionMode,
    observer: Arc<dyn ExtractObserver>,
}

impl PartitionsCreatorFactory {
    /// Creates a creator factory that schedules with `mode`.
    #[must_use]
    pub fn new(factory: Arc<dyn PartitionFactory>, mode: ExecutionMode) -> Self {
        Self {
            factory,
            mode,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replaces the observer notified of created partitions.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExtractObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Returns the creator for `feed`.
    ///
    /// Global feeds are not handled and yield `None`. A stream with nothing
    /// to read yields [`PartitionsCreator::NoPartitions`].
    ///
    /// # Errors
    ///
    /// Returns the partition factory's error if the stream cannot be inspected.
    pub async fn make(&self, feed: &Feed) -> Result<Option<PartitionsCreator>, ConnectorError> {
        let Feed::Stream(stream) = feed else {
            return Ok(None);
        };
        let Some(partition) = self.factory.create(stream).await? else {
            return Ok(Some(PartitionsCreator::NoPartitions(stream.id.clone())));
        };
        self.observer.partition_created(&partition);

        let factory = Arc::clone(&self.factory);
        Ok(Some(match self.mode {
            ExecutionMode::Sequential => {
                PartitionsCreator::Sequential(SequentialCreator::new(factory, partition))
            }
            ExecutionMode::Concurrent => {
                PartitionsCreator::Concurrent(ConcurrentCreator::new(factory, partition))
            }
        }))
    }
}

impl fmt::Debug for PartitionsCreatorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionsCreatorFactory")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Sub-partitions of one run and the number of states they were split
/// against.
struct SplitPlan {
    partitions: Vec<JdbcPartition>,
    prior_states: usize,
}

/// Loads the stream's prior checkpoints and splits `partition` against them.
async fn split(
    ctx: &ExtractContext,
    factory: &dyn PartitionFactory,
    partition: &JdbcPartition,
    lifecycle: &mut state::Lifecycle,
) -> Result<SplitPlan, ConnectorError> {
    lifecycle.advance(CreatorState::Splitting)?;
    let prior = ctx.store.load(partition.stream_id()).await?;
    let partitions = factory.split(partition, &prior)?;
    ctx.observer
        .partitions_split(partition.stream_id(), prior.len(), &partitions);
    Ok(SplitPlan {
        partitions,
        prior_states: prior.len(),
    })
}

/// Moves the creator to `Done` and replaces the stream's states with the
/// completed state of the initial partition, which covers all of them.
async fn finish(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
    lifecycle: &mut state::Lifecycle,
    prior_states: usize,
    summary: &ExtractSummary,
) -> Result<(), ConnectorError> {
    lifecycle.advance(CreatorState::Done)?;
    let states = prior_states + summary.checkpoints;
    if states <= 1 {
        return Ok(());
    }
    let key = partition.checkpoint_key();
    ctx.store
        .replace(partition.stream_id(), &key, partition.completed_state())
        .await?;
    ctx.metrics.record_checkpoint();
    debug!(stream = %partition.stream_id(), key = %key, states, "compacted checkpoints");
    Ok(())
}
