//! # Tributary Connectors
//!
//! Partitioned, checkpointed extraction of relational streams.
//!
//! A feed is turned into one initial partition covering the stream's key
//! range. The partition is split against the checkpoints of earlier runs,
//! and the resulting sub-partitions are read one at a time or on a bounded
//! worker pool. Every partition reserves memory before reading, emits its
//! rows as Arrow batches, and then saves a checkpoint describing what it
//! consumed.
//!
//! - [`partition`] - Partitions, key ranges, and the partition factory
//! - [`creator`] - Sequential and concurrent partitions creators
//! - [`checkpoint`] - Opaque partition states and their stores
//! - [`runtime`] - Per-feed background tasks and whole-sync runs
//! - [`testing`] - In-memory table, recording sink, and observers
//!
//! ## Architecture
//!
//! ```text
//! Feed -> PartitionsCreatorFactory::make -> PartitionFactory::create
//!      -> PartitionsCreator::run
//!           load checkpoints -> PartitionFactory::split
//!           per sub-partition: reserve -> SELECT ... -> RecordSink::emit
//!                              -> CheckpointStore::save
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Common test patterns that are acceptable
#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
    )
)]

/// Connector error types.
pub mod error;

/// Connector configuration types.
pub mod config;

/// Feeds and stream descriptions.
pub mod feed;

/// Core connector traits (`SelectQuerier`, `RecordSink`).
pub mod connector;

/// Partition checkpoint states and stores.
pub mod checkpoint;

/// Partitions and the partition factory.
pub mod partition;

/// Partitions creators.
pub mod creator;

/// Lifecycle observers.
pub mod observe;

/// Extraction metrics.
pub mod metrics;

/// Row to Arrow conversion.
pub mod batch;

/// Extraction runtime for feed lifecycle management.
pub mod runtime;

/// Testing utilities (in-memory table, recording sink, helpers).
pub mod testing;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore, OpaqueState};
pub use config::{ConnectorConfig, ExecutionMode, ExtractConfig};
pub use connector::{PartitionBatch, PartitionId, Record, RecordSink, SelectQuerier};
pub use creator::{ExtractContext, ExtractSummary, PartitionsCreator, PartitionsCreatorFactory};
pub use error::{ConnectorError, FailureScope};
pub use feed::{Feed, StreamFeed, StreamId, SyncMode};
pub use partition::{JdbcPartition, JdbcPartitionFactory, PartitionFactory};
pub use runtime::{ExtractRuntime, SyncReport};
