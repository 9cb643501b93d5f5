//! Parquet Storage Format Implementation
//!
//! Provides efficient columnar storage for Datalog relations using Apache Parquet format.
//! Parquet offers:
//! - 10x compression vs CSV
//! - Fast columnar reads
//! - Schema awareness
//! - Industry-standard format

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;

use crate::storage::error::StorageResult;
use crate::value::arrow_convert::{record_batch_to_tuples, tuples_to_record_batch};
use crate::value::{Tuple, TupleSchema};

/// Load tuples (and the inferred schema) from a Parquet file.
pub fn load_from_parquet<P: AsRef<Path>>(path: P) -> StorageResult<(Vec<String>, Vec<Tuple>)> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let field_names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build()?;

    let mut tuples = Vec::new();
    for batch in reader {
        let batch = batch?;
        tuples.extend(record_batch_to_tuples(&batch)?);
    }
    Ok((field_names, tuples))
}

/// Write tuples to a Parquet file under the given schema, using Snappy
/// compression.
pub fn save_to_parquet<P: AsRef<Path>>(
    path: P,
    schema: &TupleSchema,
    tuples: &[Tuple],
) -> StorageResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let batch = tuples_to_record_batch(tuples, schema)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, Value};
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_parquet() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relation.parquet");

        let schema = TupleSchema::new(vec![("id".to_string(), DataType::Int32)]);
        let tuples = vec![Tuple::new(vec![Value::Int32(1)]), Tuple::new(vec![Value::Int32(2)])];

        save_to_parquet(&path, &schema, &tuples).unwrap();
        let (names, loaded) = load_from_parquet(&path).unwrap();

        assert_eq!(names, vec!["id".to_string()]);
        assert_eq!(loaded, tuples);
    }
}
