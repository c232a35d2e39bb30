//! Partition creation and splitting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};
use tributary_core::query::{
    Field, LimitNode, LimitState, SelectNode, SelectQueryGenerator, SelectQueryRoot,
};

use super::range::{RangeCheckpoint, SnapshotCheckpoint};
use super::{
    JdbcPartition, KeyBounds, KeyOrder, KeyRange, PartitionKind, PartitionOrigin, ReadMode,
    StreamState,
};
use crate::checkpoint::OpaqueState;
use crate::config::ExtractConfig;
use crate::connector::{PartitionId, Record, SelectQuerier};
use crate::error::ConnectorError;
use crate::feed::{StreamFeed, StreamId, SyncMode};

/// Creates and splits the partitions of a stream.
#[async_trait]
pub trait PartitionFactory: Send + Sync {
    /// Returns the stream's initial, unsplit partition, or `None` when the
    /// stream has nothing to read.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError` if the stream cannot be queried or has no
    /// usable key for its sync mode.
    async fn create(&self, feed: &StreamFeed) -> Result<Option<JdbcPartition>, ConnectorError>;

    /// Returns the state shared by every partition of `feed`'s stream in
    /// the current sync, creating it on first use.
    fn stream_state(&self, feed: &StreamFeed) -> Arc<StreamState>;

    /// Splits `partition` into non-overlapping sub-partitions whose union is
    /// the part of `partition` not consumed according to `prior`.
    ///
    /// With no prior states the union is the whole partition.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::CheckpointError` for undecodable states.
    fn split(
        &self,
        partition: &JdbcPartition,
        prior: &[OpaqueState],
    ) -> Result<Vec<JdbcPartition>, ConnectorError>;
}

/// Partition factory for SQL sources.
///
/// Before creating a partition it validates the stream with a `LIMIT 0`
/// query and reads the key bounds with `MAX` and an ordered `LIMIT 1`.
/// Every `create` starts a new [`StreamState`], so bounds are read once
/// per sync and rows added since the previous sync are seen.
pub struct JdbcPartitionFactory {
    querier: Arc<dyn SelectQuerier>,
    generator: Arc<dyn SelectQueryGenerator>,
    config: ExtractConfig,
    streams: Mutex<HashMap<StreamId, Arc<StreamState>>>,
    next_seq: AtomicU64,
}

impl JdbcPartitionFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(
        querier: Arc<dyn SelectQuerier>,
        generator: Arc<dyn SelectQueryGenerator>,
        config: ExtractConfig,
    ) -> Self {
        Self {
            querier,
            generator,
            config,
            streams: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Replaces the stream's state with a fresh one that keeps the adaptive
    /// fetch size of the previous sync.
    fn begin_sync(&self, feed: &StreamFeed) -> Arc<StreamState> {
        let mut streams = self.streams.lock();
        let limit = streams.get(&feed.id).map_or_else(
            || {
                Arc::new(LimitState::new(
                    self.config.fetch_size_initial,
                    self.config.fetch_size_max,
                ))
            },
            |previous| Arc::clone(previous.limit()),
        );
        let stream = Arc::new(StreamState::with_shared_limit(feed.clone(), limit));
        streams.insert(feed.id.clone(), Arc::clone(&stream));
        stream
    }

    fn partition(
        &self,
        stream: &Arc<StreamState>,
        kind: PartitionKind,
        origin: PartitionOrigin,
    ) -> JdbcPartition {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        JdbcPartition::new(
            PartitionId::new(stream.id(), seq),
            Arc::clone(stream),
            kind,
            origin,
        )
    }

    async fn query(&self, ast: &SelectQueryRoot) -> Result<Vec<Record>, ConnectorError> {
        let query = self.generator.generate(ast)?;
        debug!(sql = %query.sql, "metadata query");
        self.querier.execute(&query).await
    }

    async fn check_columns(&self, feed: &StreamFeed) -> Result<(), ConnectorError> {
        let ast = SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
            .from(feed.id.table_name())
            .limit(LimitNode::LimitZero);
        self.query(&ast).await.map(|_| ())
    }

    async fn fetch_bounds(
        &self,
        feed: &StreamFeed,
        column: &Field,
    ) -> Result<KeyBounds, ConnectorError> {
        let table = feed.id.table_name();
        let max = self
            .query(&SelectQueryRoot::new(SelectNode::MaxValue(column.clone())).from(table.clone()))
            .await?;
        let min = self
            .query(
                &SelectQueryRoot::new(SelectNode::Columns(vec![column.clone()]))
                    .from(table)
                    .order_by(vec![column.clone()])
                    .limit(LimitNode::Limit(Arc::new(LimitState::fixed(1)))),
            )
            .await?;
        Ok(KeyBounds {
            min: first_value(min),
            max: first_value(max),
        })
    }

    fn decode_range_states(
        stream: &StreamId,
        column: &Field,
        prior: &[OpaqueState],
    ) -> Result<Vec<KeyRange>, ConnectorError> {
        let mut consumed = Vec::with_capacity(prior.len());
        for state in prior {
            let decoded: RangeCheckpoint = match serde_json::from_value(state.value().clone()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    if is_snapshot_state(state) {
                        warn!(stream = %stream, "ignoring snapshot checkpoint for range partition");
                        continue;
                    }
                    return Err(ConnectorError::CheckpointError(format!(
                        "undecodable state for {stream}: {e}"
                    )));
                }
            };
            match &decoded.column {
                Some(name) if *name != column.id => {
                    warn!(
                        stream = %stream,
                        state_column = %name,
                        column = %column.id,
                        "ignoring checkpoint for a different key column"
                    );
                }
                _ => consumed.push(decoded.consumed()),
            }
        }
        Ok(consumed)
    }
}

impl std::fmt::Debug for JdbcPartitionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JdbcPartitionFactory")
            .field("config", &self.config)
            .field("streams", &self.streams.lock().len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PartitionFactory for JdbcPartitionFactory {
    async fn create(&self, feed: &StreamFeed) -> Result<Option<JdbcPartition>, ConnectorError> {
        if feed.fields.is_empty() {
            return Err(ConnectorError::SchemaMismatch(format!(
                "stream {} selects no columns",
                feed.id
            )));
        }
        let stream = self.begin_sync(feed);
        self.check_columns(feed).await?;

        let Some((column, mode, order)) = key_column(feed)? else {
            debug!(stream = %feed.id, "no single-column key, reading as snapshot");
            return Ok(Some(self.partition(
                &stream,
                PartitionKind::Snapshot,
                PartitionOrigin::Unsplit,
            )));
        };

        let bounds = stream
            .bounds_cell()
            .get_or_try_init(|| self.fetch_bounds(feed, &column))
            .await?;
        let Some(max) = bounds.max.clone() else {
            debug!(stream = %feed.id, column = %column.id, "stream is empty");
            return Ok(None);
        };

        Ok(Some(self.partition(
            &stream,
            PartitionKind::Range {
                column,
                range: KeyRange::new(None, max).with_order(order),
                mode,
            },
            PartitionOrigin::Unsplit,
        )))
    }

    fn stream_state(&self, feed: &StreamFeed) -> Arc<StreamState> {
        let mut streams = self.streams.lock();
        Arc::clone(streams.entry(feed.id.clone()).or_insert_with(|| {
            Arc::new(StreamState::new(
                feed.clone(),
                LimitState::new(self.config.fetch_size_initial, self.config.fetch_size_max),
            ))
        }))
    }

    fn split(
        &self,
        partition: &JdbcPartition,
        prior: &[OpaqueState],
    ) -> Result<Vec<JdbcPartition>, ConnectorError> {
        let stream = partition.stream();
        match partition.kind() {
            PartitionKind::Snapshot => {
                if prior.iter().any(is_snapshot_state) {
                    return Ok(Vec::new());
                }
                Ok(vec![self.partition(
                    stream,
                    PartitionKind::Snapshot,
                    PartitionOrigin::Split,
                )])
            }
            PartitionKind::Range {
                column,
                range,
                mode,
            } => {
                let consumed = Self::decode_range_states(stream.id(), column, prior)?;
                let remaining = range.subtract(&consumed)?;
                if remaining.is_empty() {
                    return Ok(Vec::new());
                }

                let per_piece = (self.config.split_count / remaining.len()).max(1);
                let min = stream.bounds().and_then(|b| b.min.as_ref());
                Ok(remaining
                    .iter()
                    .flat_map(|r| r.subdivide(per_piece, min))
                    .map(|range| {
                        self.partition(
                            stream,
                            PartitionKind::Range {
                                column: column.clone(),
                                range,
                                mode: *mode,
                            },
                            PartitionOrigin::Split,
                        )
                    })
                    .collect())
            }
        }
    }
}

/// Picks the partitioning column: the cursor for incremental syncs, a
/// single-column primary key for full refreshes.
fn key_column(feed: &StreamFeed) -> Result<Option<(Field, ReadMode, KeyOrder)>, ConnectorError> {
    match feed.sync_mode {
        SyncMode::Incremental => {
            let cursor = feed.cursor.clone().ok_or_else(|| {
                ConnectorError::SchemaMismatch(format!(
                    "incremental stream {} has no cursor column",
                    feed.id
                ))
            })?;
            let Some(order) = KeyOrder::for_type(&cursor.field_type) else {
                return Err(ConnectorError::SchemaMismatch(format!(
                    "cursor {} of {} has unorderable type {}",
                    cursor.id, feed.id, cursor.field_type
                )));
            };
            if feed.field_index(&cursor.id).is_none() {
                return Err(ConnectorError::SchemaMismatch(format!(
                    "cursor {} is not selected in {}",
                    cursor.id, feed.id
                )));
            }
            Ok(Some((cursor, ReadMode::Ordered, order)))
        }
        SyncMode::FullRefresh => match feed.primary_key.as_slice() {
            [key] if feed.field_index(&key.id).is_some() => Ok(KeyOrder::for_type(
                &key.field_type,
            )
            .map(|order| (key.clone(), ReadMode::Chunked, order))),
            _ => Ok(None),
        },
    }
}

fn is_snapshot_state(state: &OpaqueState) -> bool {
    serde_json::from_value::<SnapshotCheckpoint>(state.value().clone())
        .is_ok_and(|s| s.complete)
}

fn first_value(rows: Vec<Record>) -> Option<Value> {
    rows.into_iter()
        .next()
        .and_then(|row| row.into_iter().next())
        .filter(|v| !v.is_null())
}
