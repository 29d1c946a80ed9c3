//! Legacy event-framed binlogs (storage versions 0 and 1)
//!
//! One file holds one field. Every data event embeds a self-contained
//! single-column Parquet file; each record reader handed out covers exactly
//! one event.

use arrow::array::{ArrayRef, RecordBatch};
use arrow::compute::{can_cast_types, cast_with_options, CastOptions};
use arrow::datatypes::{DataType as ArrowDataType, Field, Schema};
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::collections::HashMap;
use std::sync::Arc;

use super::column::ColumnData;
use super::event::{DescriptorEvent, EventCursor};
use super::{BinlogReader, RecordReader};
use crate::models::DataType;
use crate::storage::ByteStream;
use crate::{Error, Result};

/// Reader of one legacy binlog file
pub struct V1BinlogReader {
    cursor: EventCursor,
    descriptor: DescriptorEvent,
    mapping: HashMap<i64, usize>,
    batch_size: usize,
}

impl V1BinlogReader {
    /// Parse the magic number and descriptor; data events are read lazily
    pub fn new(stream: ByteStream, batch_size: usize) -> Result<Self> {
        let mut cursor = EventCursor::new(stream.into_bytes());
        let descriptor = cursor.read_preamble()?;
        let mapping = HashMap::from([(descriptor.field_id, 0)]);

        Ok(Self {
            cursor,
            descriptor,
            mapping,
            batch_size,
        })
    }

    pub fn descriptor(&self) -> &DescriptorEvent {
        &self.descriptor
    }

    /// Read the next event's column fully into memory
    pub fn next_column(&mut self) -> Result<Option<ColumnData>> {
        let data_type = self.descriptor.payload_data_type().ok_or_else(|| {
            Error::decode(format!(
                "unknown payload type {} in descriptor",
                self.descriptor.payload_type
            ))
        })?;
        self.next_column_as(data_type)
    }

    /// Like [`next_column`](Self::next_column) with an explicit logical type
    pub fn next_column_as(&mut self, data_type: DataType) -> Result<Option<ColumnData>> {
        let Some(reader) = self.next_payload_reader()? else {
            return Ok(None);
        };
        let mut arrays = Vec::new();
        for batch in reader {
            let batch = batch?;
            if batch.num_columns() != 1 {
                return Err(Error::decode(format!(
                    "binlog payload has {} columns, expected 1",
                    batch.num_columns()
                )));
            }
            arrays.push(batch.column(0).clone());
        }
        ColumnData::from_arrays(data_type, &arrays).map(Some)
    }

    fn next_payload_reader(&mut self) -> Result<Option<ParquetRecordBatchReader>> {
        let Some(event) = self.cursor.next_event()? else {
            return Ok(None);
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(event.payload)?
            .with_batch_size(self.batch_size)
            .build()?;
        Ok(Some(reader))
    }
}

impl BinlogReader for V1BinlogReader {
    fn mapping(&self) -> &HashMap<i64, usize> {
        &self.mapping
    }

    fn select_fields(&mut self, fields: &[i64]) {
        let field_id = self.descriptor.field_id;
        self.mapping.clear();
        if fields.contains(&field_id) {
            self.mapping.insert(field_id, 0);
        }
    }

    fn next_record_reader(&mut self) -> Result<Option<RecordReader>> {
        let Some(reader) = self.next_payload_reader()? else {
            return Ok(None);
        };
        let target = self.descriptor.payload_data_type().and_then(logical_arrow_type);
        Ok(Some(Box::new(reader.map(move |batch| {
            batch.and_then(|batch| normalize(batch, target.as_ref()))
        }))))
    }
}

/// Logical arrow type for payloads whose physical column is wider
fn logical_arrow_type(data_type: DataType) -> Option<ArrowDataType> {
    match data_type {
        DataType::Int8 => Some(ArrowDataType::Int8),
        DataType::Int16 => Some(ArrowDataType::Int16),
        _ => None,
    }
}

/// Cast physical columns to `target`; out-of-range values fail the batch
fn normalize(batch: RecordBatch, target: Option<&ArrowDataType>) -> std::result::Result<RecordBatch, ArrowError> {
    let Some(target) = target else {
        return Ok(batch);
    };
    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    let schema = batch.schema();
    let mut changed = false;
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        if column.data_type() != target && can_cast_types(column.data_type(), target) {
            fields.push(Field::new(field.name(), target.clone(), field.is_nullable()));
            columns.push(cast_with_options(column, target, &options)?);
            changed = true;
        } else {
            fields.push(field.as_ref().clone());
            columns.push(column.clone());
        }
    }
    if !changed {
        return Ok(batch);
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{encode_v1_binlog, DescriptorSpec};
    use arrow::array::{Array, Int32Array, Int64Array, Int8Array, StringArray};

    fn int64_file(events: &[Vec<i64>]) -> ByteStream {
        let arrays: Vec<ArrayRef> = events
            .iter()
            .map(|v| Arc::new(Int64Array::from(v.clone())) as ArrayRef)
            .collect();
        let spec = DescriptorSpec {
            field_id: 100,
            payload_type: DataType::Int64,
            ..Default::default()
        };
        ByteStream::new(encode_v1_binlog(&spec, &arrays).unwrap())
    }

    #[test]
    fn test_typed_column_reads() {
        let mut reader = V1BinlogReader::new(int64_file(&[vec![1, 2], vec![3]]), 1024).unwrap();
        assert_eq!(reader.descriptor().field_id, 100);

        assert_eq!(reader.next_column().unwrap(), Some(ColumnData::Int64(vec![1, 2])));
        assert_eq!(reader.next_column().unwrap(), Some(ColumnData::Int64(vec![3])));
        assert_eq!(reader.next_column().unwrap(), None);
    }

    #[test]
    fn test_record_reader_per_event() {
        let mut reader = V1BinlogReader::new(int64_file(&[vec![1, 2, 3], vec![4]]), 2).unwrap();
        assert_eq!(reader.mapping(), &HashMap::from([(100, 0)]));

        let first: Vec<RecordBatch> = reader
            .next_record_reader()
            .unwrap()
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        // batch size splits the event's rows
        assert_eq!(first.iter().map(|b| b.num_rows()).collect::<Vec<_>>(), vec![2, 1]);

        let second: Vec<RecordBatch> = reader
            .next_record_reader()
            .unwrap()
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(second[0].num_rows(), 1);
        assert!(reader.next_record_reader().unwrap().is_none());
    }

    #[test]
    fn test_select_fields_excludes_own_field() {
        let mut reader = V1BinlogReader::new(int64_file(&[vec![1]]), 1024).unwrap();
        reader.select_fields(&[101, 102]);
        assert!(reader.mapping().is_empty());
        reader.select_fields(&[100]);
        assert_eq!(reader.mapping().get(&100), Some(&0));
    }

    #[test]
    fn test_int8_payload_normalized() {
        let spec = DescriptorSpec {
            field_id: 102,
            payload_type: DataType::Int8,
            ..Default::default()
        };
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![7, -1]))];
        let stream = ByteStream::new(encode_v1_binlog(&spec, &arrays).unwrap());
        let mut reader = V1BinlogReader::new(stream, 1024).unwrap();

        let batch = reader.next_record_reader().unwrap().unwrap().next().unwrap().unwrap();
        let column = batch.column(0);
        assert_eq!(column.data_type(), &ArrowDataType::Int8);
        let values = column.as_any().downcast_ref::<Int8Array>().unwrap();
        assert_eq!(values.values().to_vec(), vec![7, -1]);
    }

    #[test]
    fn test_int16_payload_out_of_range() {
        let spec = DescriptorSpec {
            field_id: 102,
            payload_type: DataType::Int16,
            ..Default::default()
        };
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![1, 70_000]))];
        let stream = ByteStream::new(encode_v1_binlog(&spec, &arrays).unwrap());

        let mut reader = V1BinlogReader::new(stream.clone(), 1024).unwrap();
        let batch = reader.next_record_reader().unwrap().unwrap().next().unwrap();
        assert!(batch.is_err());

        let mut reader = V1BinlogReader::new(stream, 1024).unwrap();
        assert!(matches!(reader.next_column(), Err(Error::Decode(_))));
    }

    #[test]
    fn test_string_payload() {
        let spec = DescriptorSpec {
            field_id: 103,
            payload_type: DataType::VarChar,
            ..Default::default()
        };
        let arrays: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["a", "b"]))];
        let stream = ByteStream::new(encode_v1_binlog(&spec, &arrays).unwrap());
        let mut reader = V1BinlogReader::new(stream, 1024).unwrap();
        assert_eq!(
            reader.next_column().unwrap(),
            Some(ColumnData::String(vec!["a".into(), "b".into()]))
        );
    }
}
