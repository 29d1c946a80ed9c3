//! Row iteration over one segment

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::codec::CodecRegistry;
use crate::filter::EntryFilter;
use crate::models::{
    CollectionSchema, DataType, PrimaryKey, RowValues, Segment, ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID,
};
use crate::reader::SegmentRecordReader;
use crate::storage::Translator;
use crate::tasks::{Flow, ScanTask};
use crate::{Error, Result};

/// How a segment scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// Every row was visited
    Exhausted,
    /// The task asked to stop
    Stopped,
}

/// Feeds the rows of one segment through the filters into a scan task
pub struct SegmentIterator<T> {
    segment: Arc<Segment>,
    schema: Arc<CollectionSchema>,
    translator: Arc<T>,
    codecs: Arc<CodecRegistry>,
    output_fields: Vec<i64>,
    filters: Vec<Arc<dyn EntryFilter>>,
    batch_size: usize,
}

impl<T: Translator> SegmentIterator<T> {
    pub fn new(
        segment: Arc<Segment>,
        schema: Arc<CollectionSchema>,
        translator: Arc<T>,
        codecs: Arc<CodecRegistry>,
        output_fields: Vec<i64>,
    ) -> Self {
        Self {
            segment,
            schema,
            translator,
            codecs,
            output_fields,
            filters: Vec::new(),
            batch_size: 1024,
        }
    }

    /// Add a filter; filters run in the order added
    pub fn with_filter(mut self, filter: Arc<dyn EntryFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Logical type and vector dimension of an output field
    fn field_type(&self, field_id: i64) -> Result<(DataType, usize)> {
        if let Some(field) = self.schema.field(field_id) {
            return Ok((field.data_type, field.dim.unwrap_or(0)));
        }
        match field_id {
            ROW_ID_FIELD_ID | TIMESTAMP_FIELD_ID => Ok((DataType::Int64, 0)),
            other => Err(Error::decode(format!(
                "field {} is not in the schema of collection {}",
                other, self.schema.name
            ))),
        }
    }

    /// Visit every row, stopping early if the task asks to
    pub async fn range(&self, task: &dyn ScanTask, cancel: &CancellationToken) -> Result<RangeOutcome> {
        let pk_field = self
            .schema
            .primary_key()
            .ok_or_else(|| Error::decode(format!("collection {} has no primary key field", self.schema.name)))?;
        let mut pk = PrimaryKey::for_type(pk_field.data_type)?;

        // filters need every row's key and timestamp
        let mut fields = self.output_fields.clone();
        for required in [TIMESTAMP_FIELD_ID, pk_field.field_id] {
            if !fields.contains(&required) {
                fields.push(required);
            }
        }
        let typed_fields = fields
            .iter()
            .map(|field_id| self.field_type(*field_id).map(|(dt, _)| (*field_id, dt)))
            .collect::<Result<Vec<_>>>()?;

        let mut reader = SegmentRecordReader::new(
            self.segment.clone(),
            self.translator.clone(),
            fields,
            self.batch_size,
        )?;
        let mut rows = 0usize;
        while let Some(batch) = reader.next(cancel).await? {
            let batch_idx = batch.info().batch_idx;
            let columns = typed_fields
                .iter()
                .map(|(field_id, data_type)| {
                    batch
                        .column(*field_id)
                        .map(|column| (*field_id, *data_type, column))
                        .ok_or_else(|| {
                            Error::decode(format!(
                                "segment {} batch {} has no column for field {}",
                                self.segment.id, batch_idx, field_id
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            for row in 0..batch.len() {
                let mut values = RowValues::new();
                for (field_id, data_type, column) in &columns {
                    let value = self
                        .codecs
                        .deserialize(*data_type, column.as_ref(), row)
                        .ok_or_else(|| {
                            Error::decode(format!(
                                "failed to deserialize field {} at row {} of segment {} batch {}",
                                field_id, row, self.segment.id, batch_idx
                            ))
                        })?;
                    if *field_id == pk_field.field_id && !pk.set_value(&value) {
                        return Err(Error::decode(format!(
                            "primary key value {:?} at row {} does not match type {}",
                            value, row, pk_field.data_type
                        )));
                    }
                    values.insert(*field_id, value);
                }
                rows += 1;

                let ts = values
                    .get(&TIMESTAMP_FIELD_ID)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| {
                        Error::decode(format!(
                            "no timestamp at row {} of segment {} batch {}",
                            row, self.segment.id, batch_idx
                        ))
                    })?;
                if !self.filters.iter().all(|f| f.matches(&pk, ts, &values)) {
                    continue;
                }
                if task.scan(&pk, batch.info(), row, &values)? == Flow::Stop {
                    tracing::info!(segment_id = self.segment.id, rows, "segment scan stopped by task");
                    return Ok(RangeOutcome::Stopped);
                }
            }
        }

        tracing::info!(segment_id = self.segment.id, rows, "segment scan complete");
        Ok(RangeOutcome::Exhausted)
    }
}
