//! Arrow Conversion Utilities
//!
//! Provides conversion between our Tuple/Value types and Arrow's `RecordBatch` format.
//! This enables efficient columnar operations and Parquet persistence.

use super::{DataType, Tuple, TupleSchema, Value};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Error type for Arrow conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ArrowConvertError {
    /// Schema mismatch between tuples and expected schema
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    /// Unsupported data type
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),
    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
}

fn arrow_type_of(dt: DataType) -> Result<ArrowDataType, ArrowConvertError> {
    match dt {
        DataType::Int32 => Ok(ArrowDataType::Int32),
        DataType::Int64 => Ok(ArrowDataType::Int64),
        DataType::Float64 => Ok(ArrowDataType::Float64),
        DataType::String => Ok(ArrowDataType::Utf8),
        DataType::Bool => Ok(ArrowDataType::Boolean),
        other => Err(ArrowConvertError::UnsupportedType(format!("{other:?}"))),
    }
}

/// Convert a vector of tuples to an Arrow `RecordBatch`
///
/// # Arguments
/// * `tuples` - The tuples to convert
/// * `schema` - The schema describing the tuple structure
///
/// # Returns
/// A `RecordBatch` containing the tuple data in columnar format
pub fn tuples_to_record_batch(
    tuples: &[Tuple],
    schema: &TupleSchema,
) -> Result<RecordBatch, ArrowConvertError> {
    let fields: Vec<Field> = schema
        .field_names()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let dt = schema.field_type(i).copied().unwrap_or(DataType::Null);
            Ok(Field::new(*name, arrow_type_of(dt)?, true))
        })
        .collect::<Result<_, ArrowConvertError>>()?;
    let arrow_schema = Arc::new(Schema::new(fields));

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.arity());
    for col in 0..schema.arity() {
        let dt = schema.field_type(col).copied().unwrap_or(DataType::Null);
        let column: ArrayRef = match dt {
            DataType::Int32 => Arc::new(Int32Array::from_iter(tuples.iter().map(|t| {
                match t.get(col) {
                    Some(Value::Int32(i)) => Some(*i),
                    _ => None,
                }
            }))),
            DataType::Int64 => Arc::new(Int64Array::from_iter(tuples.iter().map(|t| {
                match t.get(col) {
                    Some(Value::Int64(i)) => Some(*i),
                    _ => None,
                }
            }))),
            DataType::Float64 => Arc::new(Float64Array::from_iter(tuples.iter().map(|t| {
                match t.get(col) {
                    Some(Value::Float64(f)) => Some(*f),
                    _ => None,
                }
            }))),
            DataType::String => Arc::new(StringArray::from_iter(tuples.iter().map(|t| {
                match t.get(col) {
                    Some(Value::String(s)) => Some(s.to_string()),
                    _ => None,
                }
            }))),
            DataType::Bool => Arc::new(BooleanArray::from_iter(tuples.iter().map(|t| {
                match t.get(col) {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                }
            }))),
            other => return Err(ArrowConvertError::UnsupportedType(format!("{other:?}"))),
        };
        columns.push(column);
    }

    RecordBatch::try_new(arrow_schema, columns).map_err(ArrowConvertError::from)
}

/// Convert an Arrow `RecordBatch` back into tuples, using the batch's own schema.
pub fn record_batch_to_tuples(batch: &RecordBatch) -> Result<Vec<Tuple>, ArrowConvertError> {
    let n = batch.num_rows();
    let mut rows: Vec<Vec<Value>> = (0..n).map(|_| Vec::with_capacity(batch.num_columns())).collect();

    for column in batch.columns() {
        match column.data_type() {
            ArrowDataType::Int32 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Int32Array>()
                    .ok_or_else(|| ArrowConvertError::SchemaMismatch("expected Int32Array".into()))?;
                for (row, v) in rows.iter_mut().zip(arr.iter()) {
                    row.push(v.map_or(Value::Null, Value::Int32));
                }
            }
            ArrowDataType::Int64 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| ArrowConvertError::SchemaMismatch("expected Int64Array".into()))?;
                for (row, v) in rows.iter_mut().zip(arr.iter()) {
                    row.push(v.map_or(Value::Null, Value::Int64));
                }
            }
            ArrowDataType::Float64 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| ArrowConvertError::SchemaMismatch("expected Float64Array".into()))?;
                for (row, v) in rows.iter_mut().zip(arr.iter()) {
                    row.push(v.map_or(Value::Null, Value::Float64));
                }
            }
            ArrowDataType::Utf8 => {
                let arr = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| ArrowConvertError::SchemaMismatch("expected StringArray".into()))?;
                for (row, v) in rows.iter_mut().zip(arr.iter()) {
                    row.push(v.map_or(Value::Null, Value::string));
                }
            }
            ArrowDataType::Boolean => {
                let arr = column
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| ArrowConvertError::SchemaMismatch("expected BooleanArray".into()))?;
                for (row, v) in rows.iter_mut().zip(arr.iter()) {
                    row.push(v.map_or(Value::Null, Value::Bool));
                }
            }
            other => return Err(ArrowConvertError::UnsupportedType(format!("{other:?}"))),
        }
    }

    Ok(rows.into_iter().map(Tuple::new).collect())
}

/// Infer a `TupleSchema` from the first tuple in a slice, defaulting empty
/// input to an empty schema.
pub fn infer_schema_from_tuples(tuples: &[Tuple]) -> TupleSchema {
    let Some(first) = tuples.first() else {
        return TupleSchema::new(Vec::new());
    };
    let fields = (0..first.arity())
        .map(|i| {
            let dt = first.get(i).map(Value::data_type).unwrap_or(DataType::Null);
            (format!("col{i}"), dt)
        })
        .collect();
    TupleSchema::new(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_int32_column() {
        let schema = TupleSchema::new(vec![("id".to_string(), DataType::Int32)]);
        let tuples = vec![Tuple::new(vec![Value::Int32(1)]), Tuple::new(vec![Value::Int32(2)])];
        let batch = tuples_to_record_batch(&tuples, &schema).unwrap();
        let back = record_batch_to_tuples(&batch).unwrap();
        assert_eq!(back, tuples);
    }
}
