//! Conversion of executed rows into Arrow record batches.
//!
//! Column types follow the stream's field types: booleans and fixed-width
//! numbers map to their Arrow equivalents, everything else is carried as
//! UTF-8 text. Every column is nullable.

use std::sync::Arc;

use arrow_array::builder::{
    BooleanBuilder, Float32Builder, Float64Builder, Int16Builder, Int32Builder, Int64Builder,
    Int8Builder, StringBuilder,
};
use arrow_array::{ArrayRef, RecordBatch, RecordBatchOptions};
use arrow_schema::{DataType, Field as ArrowField, Schema, SchemaRef};
use serde_json::Value;
use tributary_core::query::{Field, FieldType};

use crate::connector::Record;
use crate::error::SerdeError;

/// Returns the Arrow type used for a field type.
#[must_use]
pub fn arrow_type(field_type: &FieldType) -> DataType {
    match field_type {
        FieldType::Boolean => DataType::Boolean,
        FieldType::Byte => DataType::Int8,
        FieldType::Short => DataType::Int16,
        FieldType::Int => DataType::Int32,
        FieldType::BigInteger => DataType::Int64,
        FieldType::Float => DataType::Float32,
        FieldType::Double => DataType::Float64,
        _ => DataType::Utf8,
    }
}

/// Builds the Arrow schema for a list of fields.
#[must_use]
pub fn schema_for(fields: &[Field]) -> SchemaRef {
    Arc::new(Schema::new(
        fields
            .iter()
            .map(|f| ArrowField::new(&f.id, arrow_type(&f.field_type), true))
            .collect::<Vec<_>>(),
    ))
}

/// Converts rows into a record batch with `schema`.
///
/// # Errors
///
/// Returns `SerdeError::MalformedRow` if a row has the wrong number of
/// values, or `SerdeError::TypeConversion` if a value does not fit its
/// column.
pub fn records_to_batch(schema: &SchemaRef, records: &[Record]) -> Result<RecordBatch, SerdeError> {
    let width = schema.fields().len();
    if let Some(row) = records.iter().find(|r| r.len() != width) {
        return Err(SerdeError::MalformedRow {
            expected: width,
            got: row.len(),
        });
    }

    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, field)| build_column(field.data_type(), field.name(), records, i))
        .collect::<Result<Vec<_>, _>>()?;

    let options = RecordBatchOptions::new().with_row_count(Some(records.len()));
    RecordBatch::try_new_with_options(Arc::clone(schema), columns, &options)
        .map_err(|e| SerdeError::Arrow(e.to_string()))
}

fn conversion_error(field_name: &str, expected: &str, value: &Value) -> SerdeError {
    SerdeError::TypeConversion {
        field: field_name.into(),
        expected: expected.into(),
        message: format!("cannot convert {value}"),
    }
}

macro_rules! int_column {
    ($builder:ty, $native:ty, $name:literal, $field:expr, $records:expr, $index:expr) => {{
        let mut builder = <$builder>::with_capacity($records.len());
        for record in $records {
            match &record[$index] {
                Value::Null => builder.append_null(),
                value => {
                    let v = value
                        .as_i64()
                        .and_then(|i| <$native>::try_from(i).ok())
                        .ok_or_else(|| conversion_error($field, $name, value))?;
                    builder.append_value(v);
                }
            }
        }
        Ok(Arc::new(builder.finish()) as ArrayRef)
    }};
}

/// Builds a multi-row column from the `index`-th value of every record.
#[allow(clippy::cast_possible_truncation)]
fn build_column(
    data_type: &DataType,
    field_name: &str,
    records: &[Record],
    index: usize,
) -> Result<ArrayRef, SerdeError> {
    match data_type {
        DataType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(records.len());
            for record in records {
                match &record[index] {
                    Value::Bool(b) => builder.append_value(*b),
                    Value::Null => builder.append_null(),
                    other => return Err(conversion_error(field_name, "Boolean", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Int8 => int_column!(Int8Builder, i8, "Int8", field_name, records, index),
        DataType::Int16 => int_column!(Int16Builder, i16, "Int16", field_name, records, index),
        DataType::Int32 => int_column!(Int32Builder, i32, "Int32", field_name, records, index),
        DataType::Int64 => int_column!(Int64Builder, i64, "Int64", field_name, records, index),
        DataType::Float32 => {
            let mut builder = Float32Builder::with_capacity(records.len());
            for record in records {
                match &record[index] {
                    Value::Number(n) => {
                        let f = n
                            .as_f64()
                            .ok_or_else(|| conversion_error(field_name, "Float32", &record[index]))?;
                        builder.append_value(f as f32);
                    }
                    Value::Null => builder.append_null(),
                    other => return Err(conversion_error(field_name, "Float32", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        DataType::Float64 => {
            let mut builder = Float64Builder::with_capacity(records.len());
            for record in records {
                match &record[index] {
                    Value::Number(n) => {
                        let f = n
                            .as_f64()
                            .ok_or_else(|| conversion_error(field_name, "Float64", &record[index]))?;
                        builder.append_value(f);
                    }
                    Value::Null => builder.append_null(),
                    other => return Err(conversion_error(field_name, "Float64", other)),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        _ => {
            let mut builder = StringBuilder::with_capacity(records.len(), records.len() * 32);
            for record in records {
                match &record[index] {
                    Value::String(s) => builder.append_value(s),
                    Value::Null => builder.append_null(),
                    other => builder.append_value(other.to_string()),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}
