//! Execution of a single partition.
//!
//! A partition reserves memory before buffering any rows, reads its rows
//! into the reservation's buffer, emits them as Arrow batches, and finally
//! saves its checkpoint. The reservation is released on every exit path
//! because it is dropped with the buffer.
//!
//! Range partitions read in `LIMIT`-bounded chunks whose size adapts to the
//! reservation. A snapshot is read by one query and fails if its rows do
//! not fit the reservation.

use std::cmp::Ordering;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use serde_json::Value;
use tributary_core::query::{LimitNode, LimitState};
use tributary_core::reservation::Reservation;

use super::ExtractContext;
use crate::batch;
use crate::connector::{PartitionBatch, PartitionId, Record};
use crate::error::ConnectorError;
use crate::partition::{JdbcPartition, KeyOrder, PartitionKind, ReadMode};

/// Runs `partition` to completion and reports the outcome to the observer.
/// Returns the number of rows emitted.
pub(crate) async fn run_partition(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
) -> Result<u64, ConnectorError> {
    match execute(ctx, partition).await {
        Ok(rows) => {
            ctx.metrics.record_partition();
            ctx.observer.partition_checkpointed(partition, rows);
            Ok(rows)
        }
        Err(e) => {
            ctx.metrics.record_error();
            ctx.observer.partition_failed(partition, &e);
            Err(e)
        }
    }
}

async fn execute(ctx: &ExtractContext, partition: &JdbcPartition) -> Result<u64, ConnectorError> {
    let reservation = reserve(ctx, partition.id().clone()).await?;
    let rows = read(ctx, partition, reservation).await?;
    save_checkpoint(ctx, partition).await?;
    Ok(rows)
}

async fn reserve(
    ctx: &ExtractContext,
    partition: PartitionId,
) -> Result<Reservation<PartitionId>, ConnectorError> {
    let reservation = match ctx.config.partition_memory_bytes {
        Some(amount) => ctx.reservations.reserve_for_async(amount, partition).await?,
        None => {
            ctx.reservations
                .reserve_ratio_async(ctx.config.partition_memory_ratio(), partition)
                .await?
        }
    };
    Ok(reservation)
}

async fn read(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
    reservation: Reservation<PartitionId>,
) -> Result<u64, ConnectorError> {
    let feed = partition.stream().feed();
    let schema = batch::schema_for(&feed.fields);
    let mut buffer = reservation.replace(Vec::<Record>::new());

    let PartitionKind::Range {
        column,
        range,
        mode,
    } = partition.kind()
    else {
        let query = ctx
            .generator
            .generate(&partition.select_query(None, LimitNode::NoLimit))?;
        let records = ctx.querier.execute(&query).await?;
        ensure_fits(partition, &records, &buffer)?;
        buffer.payload_mut().extend(records);
        return flush(ctx, partition, &schema, &mut buffer).await;
    };
    let key_index = feed.field_index(&column.id).ok_or_else(|| {
        ConnectorError::SchemaMismatch(format!(
            "key {} is not selected in {}",
            column.id, feed.id
        ))
    })?;

    let limit = Arc::clone(partition.stream().limit());
    let mut after: Option<Value> = None;
    let mut rows = 0;
    loop {
        // Each chunk uses a fixed snapshot of the shared fetch size so a
        // short chunk reliably means the range is exhausted.
        let fetch = limit.current();
        let ast = partition.select_query(
            after.as_ref(),
            LimitNode::Limit(Arc::new(LimitState::fixed(fetch))),
        );
        let query = ctx.generator.generate(&ast)?;
        let mut records = ctx.querier.execute(&query).await?;

        let full = records.len() as u64 >= fetch;
        let last_key = records.last().and_then(|r| r.get(key_index)).cloned();
        let bytes = estimated_size(&records);
        if let (ReadMode::Ordered, true, Some(key)) = (mode, full, &last_key) {
            // The limit may have cut the rows sharing the last key.
            records.retain(|r| !same_key(range.order(), r.get(key_index), key));
            records.extend(read_key(ctx, partition, key, &buffer).await?);
        }
        buffer.payload_mut().extend(records);
        rows += flush(ctx, partition, &schema, &mut buffer).await?;

        if bytes > buffer.amount() {
            limit.down();
        } else if full {
            limit.up();
        }
        match last_key {
            Some(key) if full => after = Some(key),
            _ => break,
        }
    }
    Ok(rows)
}

/// Reads every row of `partition` whose key equals `key`.
async fn read_key(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
    key: &Value,
    buffer: &Reservation<Vec<Record>>,
) -> Result<Vec<Record>, ConnectorError> {
    let ast = partition.key_query(key).ok_or_else(|| {
        ConnectorError::Internal(format!("partition {} has no key", partition.id()))
    })?;
    let records = ctx.querier.execute(&ctx.generator.generate(&ast)?).await?;
    ensure_fits(partition, &records, buffer)?;
    Ok(records)
}

fn same_key(order: KeyOrder, value: Option<&Value>, key: &Value) -> bool {
    value.is_some_and(|v| order.compare(v, key).is_ok_and(Ordering::is_eq))
}

fn ensure_fits(
    partition: &JdbcPartition,
    records: &[Record],
    buffer: &Reservation<Vec<Record>>,
) -> Result<(), ConnectorError> {
    let needed = estimated_size(records);
    if needed > buffer.amount() {
        return Err(ConnectorError::ReservationOverflow {
            partition: partition.id().to_string(),
            needed,
            reserved: buffer.amount(),
        });
    }
    Ok(())
}

async fn flush(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
    schema: &SchemaRef,
    buffer: &mut Reservation<Vec<Record>>,
) -> Result<u64, ConnectorError> {
    if buffer.payload().is_empty() {
        return Ok(0);
    }
    let records = batch::records_to_batch(schema, buffer.payload())?;
    buffer.payload_mut().clear();

    let rows = records.num_rows() as u64;
    ctx.metrics
        .record_batch(rows, records.get_array_memory_size() as u64);
    ctx.sink
        .emit(PartitionBatch {
            stream: partition.stream_id().clone(),
            partition: partition.id().clone(),
            records,
        })
        .await?;
    Ok(rows)
}

async fn save_checkpoint(
    ctx: &ExtractContext,
    partition: &JdbcPartition,
) -> Result<(), ConnectorError> {
    let state = partition.completed_state();
    ctx.store
        .save(
            partition.stream_id(),
            &partition.checkpoint_key(),
            state.clone(),
        )
        .await?;
    ctx.sink
        .checkpoint(partition.stream_id(), partition.id(), &state)
        .await?;
    ctx.metrics.record_checkpoint();
    Ok(())
}

fn estimated_size(records: &[Record]) -> u64 {
    serde_json::to_vec(records).map_or(0, |bytes| bytes.len() as u64)
}
