//! Wide-column binlogs (storage version 2)
//!
//! The file is a plain Parquet file. Each top-level column records the
//! logical field it stores in its `field_id` metadata, so one file can hold
//! many fields. Record readers are handed out one row group at a time.

use bytes::Bytes;
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder,
};
use parquet::arrow::ProjectionMask;
use std::collections::HashMap;

use super::{BinlogReader, RecordReader};
use crate::storage::ByteStream;
use crate::{Error, Result};

/// Field-id metadata key written by Parquet writers
pub const PARQUET_FIELD_ID_KEY: &str = "PARQUET:field_id";
/// Bare field-id metadata key
pub const FIELD_ID_KEY: &str = "field_id";

/// Reader of one wide-column binlog file
pub struct V2BinlogReader {
    data: Bytes,
    metadata: ArrowReaderMetadata,
    /// field id -> column index in the file
    file_mapping: HashMap<i64, usize>,
    /// field id -> column index in the projected output
    mapping: HashMap<i64, usize>,
    projection: Option<Vec<usize>>,
    row_group: usize,
    batch_size: usize,
}

impl V2BinlogReader {
    /// Open the file and build the field-id map from its schema
    pub fn new(stream: ByteStream, batch_size: usize) -> Result<Self> {
        let data = stream.into_bytes();
        let metadata = ArrowReaderMetadata::load(&data, ArrowReaderOptions::new())?;

        let mut file_mapping = HashMap::new();
        for (idx, field) in metadata.schema().fields().iter().enumerate() {
            let raw = field
                .metadata()
                .get(PARQUET_FIELD_ID_KEY)
                .or_else(|| field.metadata().get(FIELD_ID_KEY))
                .ok_or_else(|| {
                    Error::decode(format!(
                        "missing field-id metadata on column {} ({})",
                        idx,
                        field.name()
                    ))
                })?;
            let field_id: i64 = raw.parse().map_err(|_| {
                Error::decode(format!(
                    "missing field-id metadata on column {} ({}): {:?} is not a number",
                    idx,
                    field.name(),
                    raw
                ))
            })?;
            if file_mapping.insert(field_id, idx).is_some() {
                return Err(Error::decode(format!(
                    "field id {} appears on more than one column",
                    field_id
                )));
            }
        }

        Ok(Self {
            data,
            metadata,
            mapping: file_mapping.clone(),
            file_mapping,
            projection: None,
            row_group: 0,
            batch_size,
        })
    }

    pub fn num_row_groups(&self) -> usize {
        self.metadata.metadata().num_row_groups()
    }
}

impl BinlogReader for V2BinlogReader {
    fn mapping(&self) -> &HashMap<i64, usize> {
        &self.mapping
    }

    /// Project onto `fields`; output columns keep file order
    fn select_fields(&mut self, fields: &[i64]) {
        let mut columns: Vec<usize> = fields
            .iter()
            .filter_map(|field_id| self.file_mapping.get(field_id).copied())
            .collect();
        columns.sort_unstable();
        columns.dedup();

        self.mapping = self
            .file_mapping
            .iter()
            .filter_map(|(field_id, col)| {
                columns
                    .binary_search(col)
                    .ok()
                    .map(|projected| (*field_id, projected))
            })
            .collect();
        self.projection = Some(columns);
    }

    fn next_record_reader(&mut self) -> Result<Option<RecordReader>> {
        if self.row_group >= self.num_row_groups() {
            return Ok(None);
        }
        let mut builder =
            ParquetRecordBatchReaderBuilder::new_with_metadata(self.data.clone(), self.metadata.clone())
                .with_row_groups(vec![self.row_group])
                .with_batch_size(self.batch_size);
        if let Some(ref columns) = self.projection {
            let mask = ProjectionMask::roots(self.metadata.parquet_schema(), columns.iter().copied());
            builder = builder.with_projection(mask);
        }
        let reader = builder.build()?;
        self.row_group += 1;
        Ok(Some(Box::new(reader)))
    }
}
