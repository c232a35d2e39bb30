//! # Partitions
//!
//! A partition is a bounded, resumable slice of one stream.
//!
//! - [`JdbcPartition`]: either a full-table snapshot or a [`KeyRange`] over
//!   one ordered column
//! - [`StreamState`]: per-stream state shared by all of a stream's
//!   partitions (key bounds, adaptive fetch size)
//! - [`PartitionFactory`]: creates the initial partition of a stream and
//!   splits it against prior checkpoints
//!
//! ## Lifecycle
//!
//! ```text
//! create(feed) -> Unsplit partition covering (-inf, max]
//!       │
//!       ▼
//! split(partition, prior states) -> Split partitions covering the
//!                                   unconsumed remainder, ordered by key
//! ```

mod factory;
mod range;

pub use factory::{JdbcPartitionFactory, PartitionFactory};
pub use range::{compare_values, KeyOrder, KeyRange};

pub(crate) use range::{RangeCheckpoint, SnapshotCheckpoint};

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::OnceCell;
use tributary_core::query::{
    Field, LimitNode, LimitState, SelectNode, SelectQueryRoot, WhereClause,
};

use crate::checkpoint::OpaqueState;
use crate::connector::PartitionId;
use crate::feed::{StreamFeed, StreamId};

/// Smallest and largest key of a stream's partitioning column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyBounds {
    /// Smallest non-null key, if known.
    pub min: Option<Value>,
    /// Largest key, `None` for an empty table.
    pub max: Option<Value>,
}

/// State shared by every partition of one stream during one sync.
///
/// Key bounds are read once per sync. The fetch size outlives the sync
/// and is carried into the next one.
#[derive(Debug)]
pub struct StreamState {
    feed: StreamFeed,
    bounds: OnceCell<KeyBounds>,
    limit: Arc<LimitState>,
}

impl StreamState {
    /// Creates stream state with an adaptive fetch size.
    #[must_use]
    pub fn new(feed: StreamFeed, limit: LimitState) -> Self {
        Self::with_shared_limit(feed, Arc::new(limit))
    }

    pub(crate) fn with_shared_limit(feed: StreamFeed, limit: Arc<LimitState>) -> Self {
        Self {
            feed,
            bounds: OnceCell::new(),
            limit,
        }
    }

    /// Returns the feed.
    #[must_use]
    pub fn feed(&self) -> &StreamFeed {
        &self.feed
    }

    /// Returns the stream id.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.feed.id
    }

    /// Returns the key bounds, once read.
    #[must_use]
    pub fn bounds(&self) -> Option<&KeyBounds> {
        self.bounds.get()
    }

    /// Returns the fetch size shared by chunked reads of this stream.
    #[must_use]
    pub fn limit(&self) -> &Arc<LimitState> {
        &self.limit
    }

    pub(crate) fn bounds_cell(&self) -> &OnceCell<KeyBounds> {
        &self.bounds
    }
}

/// How a range partition reads its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Repeated `ORDER BY key LIMIT n` queries, each starting after the last
    /// key read. Requires a unique key.
    Chunked,
    /// Like `Chunked`, for keys that may repeat. A full chunk is completed
    /// with every row sharing its last key before the next chunk starts
    /// after that key.
    Ordered,
}

/// What a partition covers.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionKind {
    /// Every row of the stream, read in one unordered query.
    Snapshot,
    /// Rows whose `column` lies in `range`.
    Range {
        /// The partitioning column.
        column: Field,
        /// The covered keys.
        range: KeyRange,
        /// How rows are read.
        mode: ReadMode,
    },
}

/// Whether a partition is the initial one or the result of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOrigin {
    /// Freshly created; covers the stream's whole domain.
    Unsplit,
    /// Produced by `split`; covers part of the unconsumed remainder.
    Split,
}

/// A bounded, executable slice of a stream.
#[derive(Debug, Clone)]
pub struct JdbcPartition {
    id: PartitionId,
    stream: Arc<StreamState>,
    kind: PartitionKind,
    origin: PartitionOrigin,
}

impl JdbcPartition {
    pub(crate) fn new(
        id: PartitionId,
        stream: Arc<StreamState>,
        kind: PartitionKind,
        origin: PartitionOrigin,
    ) -> Self {
        Self {
            id,
            stream,
            kind,
            origin,
        }
    }

    /// Returns the partition id.
    #[must_use]
    pub fn id(&self) -> &PartitionId {
        &self.id
    }

    /// Returns the shared stream state.
    #[must_use]
    pub fn stream(&self) -> &Arc<StreamState> {
        &self.stream
    }

    /// Returns the stream id.
    #[must_use]
    pub fn stream_id(&self) -> &StreamId {
        self.stream.id()
    }

    /// Returns what the partition covers.
    #[must_use]
    pub fn kind(&self) -> &PartitionKind {
        &self.kind
    }

    /// Returns the partition origin.
    #[must_use]
    pub fn origin(&self) -> PartitionOrigin {
        self.origin
    }

    /// Returns the key range, for range partitions.
    #[must_use]
    pub fn range(&self) -> Option<&KeyRange> {
        match &self.kind {
            PartitionKind::Snapshot => None,
            PartitionKind::Range { range, .. } => Some(range),
        }
    }

    /// Key under which this partition's checkpoint is stored. Derived from
    /// the covered domain, so it is stable across syncs.
    #[must_use]
    pub fn checkpoint_key(&self) -> String {
        match &self.kind {
            PartitionKind::Snapshot => "snapshot".to_string(),
            PartitionKind::Range { column, range, .. } => format!("{}:{range}", column.id),
        }
    }

    /// The state recorded once every row of the partition has been emitted.
    #[must_use]
    pub fn completed_state(&self) -> OpaqueState {
        match &self.kind {
            PartitionKind::Snapshot => SnapshotCheckpoint { complete: true }.to_state(),
            PartitionKind::Range { column, range, .. } => {
                RangeCheckpoint::completed(&column.id, range).to_state()
            }
        }
    }

    /// Builds the query reading this partition's rows.
    ///
    /// For range partitions, `after` replaces the lower bound so a chunked
    /// read can resume after the last key it saw.
    #[must_use]
    pub fn select_query(&self, after: Option<&Value>, limit: LimitNode) -> SelectQueryRoot {
        let feed = self.stream.feed();
        let root = SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
            .from(feed.id.table_name())
            .limit(limit);

        match &self.kind {
            PartitionKind::Snapshot => root,
            PartitionKind::Range { column, range, .. } => {
                let upper = WhereClause::lesser_or_equal(column.clone(), range.upper.clone());
                let filter = match after.or(range.lower.as_ref()) {
                    Some(lower) => WhereClause::And(vec![
                        WhereClause::greater(column.clone(), lower.clone()),
                        upper,
                    ]),
                    None => upper,
                };
                root.filter(filter).order_by(vec![column.clone()])
            }
        }
    }

    /// Builds the query reading every row whose key equals `key`, or `None`
    /// for snapshot partitions.
    #[must_use]
    pub fn key_query(&self, key: &Value) -> Option<SelectQueryRoot> {
        let PartitionKind::Range { column, .. } = &self.kind else {
            return None;
        };
        let feed = self.stream.feed();
        Some(
            SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
                .from(feed.id.table_name())
                .filter(WhereClause::equal(column.clone(), key.clone())),
        )
    }
}
