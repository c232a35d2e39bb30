//! Testing utilities for extraction.
//!
//! Provides an in-memory table that answers the generated SQL, a sink that
//! records everything it receives, and observers that record lifecycle
//! events.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arrow_array::{Array, Int32Array, RecordBatch};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tributary_core::query::{Field, FieldType, SelectQuery};
use tributary_core::reservation::ReservationObserver;

use crate::checkpoint::OpaqueState;
use crate::connector::{PartitionBatch, PartitionId, Record, RecordSink, SelectQuerier};
use crate::error::ConnectorError;
use crate::feed::{StreamFeed, StreamId};
use crate::observe::ExtractObserver;
use crate::partition::{JdbcPartition, KeyOrder};

/// In-memory table that executes the SQL produced by
/// `AnsiSelectQueryGenerator`.
///
/// Understands `SELECT cols | MAX(col)`, `FROM`, conjunctive `WHERE`
/// clauses with `=`, `>` and `<=`, single-column `ORDER BY`, and `LIMIT`.
/// Values are compared in the [`KeyOrder`] of their column's type. Every
/// executed statement is recorded.
#[derive(Debug)]
pub struct MemoryTable {
    stream: StreamId,
    fields: Vec<Field>,
    primary_key: Vec<Field>,
    rows: Mutex<Vec<Record>>,
    executed: Mutex<Vec<String>>,
    delay: Option<Duration>,
    fail_on: Option<String>,
    fail_on_binding: Option<Value>,
}

impl MemoryTable {
    /// Creates a table with the given columns and rows.
    #[must_use]
    pub fn new(stream: StreamId, fields: Vec<Field>, rows: Vec<Record>) -> Self {
        Self {
            stream,
            fields,
            primary_key: Vec::new(),
            rows: Mutex::new(rows),
            executed: Mutex::new(Vec::new()),
            delay: None,
            fail_on: None,
            fail_on_binding: None,
        }
    }

    /// Creates `public.items(id INT PRIMARY KEY, name TEXT)` with ids `1..=n`.
    #[must_use]
    pub fn items(n: i64) -> Self {
        Self::new(
            StreamId::new(Some("public"), "items"),
            vec![
                Field::new("id", FieldType::Int),
                Field::new("name", FieldType::String),
            ],
            (1..=n).map(item).collect(),
        )
        .with_primary_key("id")
    }

    /// Creates `public.prices(id INT, code DECIMAL PRIMARY KEY)` with one row
    /// per code, numbering ids from 1 in the given order. Codes are carried
    /// as strings.
    #[must_use]
    pub fn prices(codes: &[&str]) -> Self {
        let rows = (1..)
            .zip(codes)
            .map(|(id, code)| vec![json!(id), json!(code)])
            .collect();
        Self::new(
            StreamId::new(Some("public"), "prices"),
            vec![
                Field::new("id", FieldType::Int),
                Field::new("code", FieldType::BigDecimal),
            ],
            rows,
        )
        .with_primary_key("code")
    }

    /// Declares `column` as the single-column primary key.
    #[must_use]
    pub fn with_primary_key(mut self, column: &str) -> Self {
        self.primary_key = self.fields.iter().filter(|f| f.id == column).cloned().collect();
        self
    }

    /// Appends a row.
    pub fn insert(&self, row: Record) {
        self.rows.lock().push(row);
    }

    /// Appends `items` rows for `ids`.
    pub fn insert_items(&self, ids: impl IntoIterator<Item = i64>) {
        self.rows.lock().extend(ids.into_iter().map(item));
    }

    /// Delays every query by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails every query whose SQL contains `pattern`.
    #[must_use]
    pub fn fail_when_sql_contains(mut self, pattern: impl Into<String>) -> Self {
        self.fail_on = Some(pattern.into());
        self
    }

    /// Fails every query that binds `value`, which singles out the
    /// partitions whose bounds include it.
    #[must_use]
    pub fn fail_when_bound(mut self, value: Value) -> Self {
        self.fail_on_binding = Some(value);
        self
    }

    /// Full-refresh feed over every column, keyed by the primary key.
    #[must_use]
    pub fn full_refresh_feed(&self) -> StreamFeed {
        StreamFeed::new(self.stream.clone(), self.fields.clone())
            .with_primary_key(self.primary_key.clone())
    }

    /// Incremental feed over every column, with `cursor` as the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `cursor` is not a column of the table.
    #[must_use]
    pub fn incremental_feed(&self, cursor: &str) -> StreamFeed {
        let field = self
            .fields
            .iter()
            .find(|f| f.id == cursor)
            .cloned()
            .expect("cursor column");
        self.full_refresh_feed().incremental(field)
    }

    /// Returns the SQL of every executed query, in execution order.
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn column(&self, id: &str) -> Result<usize, ConnectorError> {
        self.fields
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| ConnectorError::ReadError(format!("unknown column {id}")))
    }

    fn order(&self, index: usize) -> KeyOrder {
        KeyOrder::for_type(&self.fields[index].field_type).unwrap_or_default()
    }

    fn run(&self, query: &SelectQuery) -> Result<Vec<Record>, ConnectorError> {
        let sql = query.sql.as_str();
        let table = self.rows.lock();
        let mut rows: Vec<&Record> = table.iter().collect();

        if let Some(filter) = clause(sql, "WHERE ", &[" ORDER BY ", " LIMIT "]) {
            let leaves = filter
                .trim_start_matches('(')
                .trim_end_matches(')')
                .split(") AND (");
            for (leaf, binding) in leaves.zip(&query.bindings) {
                let mut tokens = leaf.split_whitespace();
                let (Some(column), Some(op)) = (tokens.next(), tokens.next()) else {
                    return Err(ConnectorError::ReadError(format!("bad predicate {leaf}")));
                };
                let index = self.column(column)?;
                let order = self.order(index);
                let wanted = match op {
                    "=" => vec![CmpOrdering::Equal],
                    ">" => vec![CmpOrdering::Greater],
                    "<=" => vec![CmpOrdering::Less, CmpOrdering::Equal],
                    other => return Err(ConnectorError::ReadError(format!("bad operator {other}"))),
                };
                rows.retain(|row| {
                    order
                        .compare(&row[index], &binding.value)
                        .is_ok_and(|ordering| wanted.contains(&ordering))
                });
            }
        }

        if let Some(column) = clause(sql, "ORDER BY ", &[" LIMIT "]) {
            let index = self.column(column)?;
            let order = self.order(index);
            rows.sort_by(|a, b| match (&a[index], &b[index]) {
                (Value::Null, Value::Null) => CmpOrdering::Equal,
                (Value::Null, _) => CmpOrdering::Less,
                (_, Value::Null) => CmpOrdering::Greater,
                (x, y) => order.compare(x, y).unwrap_or(CmpOrdering::Equal),
            });
        }

        if let Some(limit) = clause(sql, "LIMIT ", &[]) {
            let limit = limit
                .parse::<usize>()
                .map_err(|e| ConnectorError::ReadError(format!("bad limit {limit}: {e}")))?;
            rows.truncate(limit);
        }

        if sql.starts_with("SELECT MAX(") {
            let index = self.column(&query.columns[0].id)?;
            let order = self.order(index);
            let max = rows
                .iter()
                .map(|row| &row[index])
                .filter(|v| !v.is_null())
                .max_by(|a, b| order.compare(a, b).unwrap_or(CmpOrdering::Equal))
                .cloned()
                .unwrap_or(Value::Null);
            return Ok(vec![vec![max]]);
        }

        let projection = query
            .columns
            .iter()
            .map(|c| self.column(&c.id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }
}

fn item(id: i64) -> Record {
    vec![json!(id), json!(format!("item-{id}"))]
}

/// Returns the text after `keyword` up to the first of `terminators`.
fn clause<'a>(sql: &'a str, keyword: &str, terminators: &[&str]) -> Option<&'a str> {
    let start = sql.find(keyword)? + keyword.len();
    let rest = &sql[start..];
    let end = terminators
        .iter()
        .filter_map(|t| rest.find(t))
        .min()
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

#[async_trait]
impl SelectQuerier for MemoryTable {
    async fn execute(&self, query: &SelectQuery) -> Result<Vec<Record>, ConnectorError> {
        self.executed.lock().push(query.sql.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(pattern) = &self.fail_on {
            if query.sql.contains(pattern.as_str()) {
                return Err(ConnectorError::ReadError(format!(
                    "injected failure: {}",
                    query.sql
                )));
            }
        }
        if let Some(value) = &self.fail_on_binding {
            if query.bindings.iter().any(|b| &b.value == value) {
                return Err(ConnectorError::ReadError(format!(
                    "injected failure: {} bound {value}",
                    query.sql
                )));
            }
        }
        self.run(query)
    }
}

/// Something a [`RecordingSink`] received.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// A batch of rows.
    Rows {
        /// Emitting partition.
        partition: PartitionId,
        /// The rows.
        records: RecordBatch,
    },
    /// A partition checkpoint.
    Checkpoint {
        /// Stream of the partition.
        stream: StreamId,
        /// Completed partition.
        partition: PartitionId,
        /// Saved state.
        state: OpaqueState,
    },
}

/// Sink that records every batch and checkpoint, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event received so far.
    #[must_use]
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Returns the checkpoints received so far, in arrival order.
    #[must_use]
    pub fn checkpoints(&self) -> Vec<(PartitionId, OpaqueState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Checkpoint {
                    partition, state, ..
                } => Some((partition.clone(), state.clone())),
                SinkEvent::Rows { .. } => None,
            })
            .collect()
    }

    /// Returns the first column of every received row, assuming it is an
    /// `Int32` column, in arrival order.
    #[must_use]
    pub fn row_ids(&self) -> Vec<i64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Rows { records, .. } => {
                    records.column(0).as_any().downcast_ref::<Int32Array>()
                }
                SinkEvent::Checkpoint { .. } => None,
            })
            .flat_map(|ids| {
                (0..ids.len())
                    .filter(|&i| !ids.is_null(i))
                    .map(|i| i64::from(ids.value(i)))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[async_trait]
impl RecordSink for RecordingSink {
    async fn emit(&self, batch: PartitionBatch) -> Result<(), ConnectorError> {
        self.events.lock().push(SinkEvent::Rows {
            partition: batch.partition,
            records: batch.records,
        });
        Ok(())
    }

    async fn checkpoint(
        &self,
        stream: &StreamId,
        partition: &PartitionId,
        state: &OpaqueState,
    ) -> Result<(), ConnectorError> {
        self.events.lock().push(SinkEvent::Checkpoint {
            stream: stream.clone(),
            partition: partition.clone(),
            state: state.clone(),
        });
        Ok(())
    }
}

/// Observer that records partition events as short strings, such as
/// `"checkpointed public.items#0 3"`.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    /// Creates an empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl ExtractObserver for RecordingObserver {
    fn partition_created(&self, partition: &JdbcPartition) {
        self.events
            .lock()
            .push(format!("created {}", partition.checkpoint_key()));
    }

    fn partitions_split(&self, stream: &StreamId, prior_states: usize, partitions: &[JdbcPartition]) {
        self.events.lock().push(format!(
            "split {stream} {prior_states} {}",
            partitions.len()
        ));
    }

    fn partition_checkpointed(&self, partition: &JdbcPartition, rows: u64) {
        self.events
            .lock()
            .push(format!("checkpointed {} {rows}", partition.id()));
    }

    fn partition_failed(&self, partition: &JdbcPartition, _error: &ConnectorError) {
        self.events
            .lock()
            .push(format!("failed {}", partition.id()));
    }
}

/// Reservation observer that tracks how many reservations are held.
#[derive(Debug, Default)]
pub struct ReservationTracker {
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    granted: AtomicU64,
}

impl ReservationTracker {
    /// Creates a tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reservations currently held.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most reservations ever held at once.
    #[must_use]
    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Reservations granted in total.
    #[must_use]
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::SeqCst)
    }
}

impl ReservationObserver for ReservationTracker {
    fn reservation_granted(&self, _amount: u64, _reserved: u64) {
        self.granted.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn reservation_released(&self, _amount: u64, _reserved: u64) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tributary_core::query::{
        AnsiSelectQueryGenerator, LimitNode, LimitState, SelectNode, SelectQueryGenerator,
        SelectQueryRoot, WhereClause,
    };

    fn query(table: &MemoryTable, root: &SelectQueryRoot) -> Vec<Record> {
        let query = AnsiSelectQueryGenerator.generate(root).unwrap();
        table.run(&query).unwrap()
    }

    #[test]
    fn test_memory_table_filters_orders_and_limits() {
        let table = MemoryTable::items(10);
        let feed = table.full_refresh_feed();
        let id = feed.fields[0].clone();
        let root = SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
            .from(feed.id.table_name())
            .filter(WhereClause::And(vec![
                WhereClause::greater(id.clone(), json!(3)),
                WhereClause::lesser_or_equal(id.clone(), json!(8)),
            ]))
            .order_by(vec![id.clone()])
            .limit(LimitNode::Limit(Arc::new(LimitState::fixed(2))));

        let rows = query(&table, &root);
        assert_eq!(rows, vec![vec![json!(4), json!("item-4")], vec![json!(5), json!("item-5")]]);

        let max = SelectQueryRoot::new(SelectNode::MaxValue(id)).from(feed.id.table_name());
        assert_eq!(query(&table, &max), vec![vec![json!(10)]]);
        assert_eq!(query(&MemoryTable::items(0), &max), vec![vec![Value::Null]]);
    }

    #[test]
    fn test_memory_table_orders_decimal_strings_numerically() {
        let table = MemoryTable::prices(&["2", "10", "9.5"]);
        let feed = table.full_refresh_feed();
        let code = feed.fields[1].clone();
        let root = SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
            .from(feed.id.table_name())
            .filter(WhereClause::greater(code.clone(), json!("3")))
            .order_by(vec![code.clone()]);
        let ids: Vec<_> = query(&table, &root).into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![json!(3), json!(2)]);

        let max = SelectQueryRoot::new(SelectNode::MaxValue(code)).from(feed.id.table_name());
        assert_eq!(query(&table, &max), vec![vec![json!("10")]]);
    }

    #[test]
    fn test_memory_table_insert() {
        let table = MemoryTable::items(1);
        table.insert_items(2..=3);
        table.insert(vec![json!(9), json!("nine")]);
        let feed = table.full_refresh_feed();
        let all = SelectQueryRoot::new(SelectNode::Columns(feed.fields.clone()))
            .from(feed.id.table_name());
        assert_eq!(query(&table, &all).len(), 4);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let table = MemoryTable::items(3).fail_when_sql_contains("MAX");
        let feed = table.full_refresh_feed();
        let max = SelectQueryRoot::new(SelectNode::MaxValue(feed.fields[0].clone()))
            .from(feed.id.table_name());
        let query = AnsiSelectQueryGenerator.generate(&max).unwrap();
        assert!(table.execute(&query).await.is_err());
        assert_eq!(table.executed(), vec!["SELECT MAX(id) FROM public.items"]);
    }

    #[test]
    fn test_reservation_tracker() {
        let tracker = ReservationTracker::new();
        tracker.reservation_granted(1, 1);
        tracker.reservation_granted(1, 2);
        tracker.reservation_released(1, 1);
        assert_eq!(tracker.in_flight(), 1);
        assert_eq!(tracker.max_in_flight(), 2);
        assert_eq!(tracker.granted(), 2);
    }
}
