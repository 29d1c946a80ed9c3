//! Composite reader over all binlog files of a segment

use arrow::array::{ArrayRef, RecordBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::batch::{BatchInfo, SegmentBatchIterator};
use super::record::SegmentBatch;
use super::selector::selector_for;
use crate::binlog::{new_binlog_reader, BinlogReader, RecordReader};
use crate::models::Segment;
use crate::storage::Translator;
use crate::{Error, Result};

/// Decoder of one file of the open batch with its current row-group reader
struct OpenFile {
    entry_id: i64,
    decoder: Box<dyn BinlogReader>,
    records: Option<RecordReader>,
}

/// The batch currently being read
struct OpenBatch {
    info: BatchInfo,
    files: Vec<OpenFile>,
}

type Composed = (HashMap<i64, usize>, Vec<ArrayRef>, usize);

impl OpenBatch {
    /// Pull one record batch from every file in lockstep
    ///
    /// `None` when every file's row group is used up.
    fn compose(&mut self, output_fields: &[i64]) -> Result<Option<Composed>> {
        if self.files.is_empty() {
            return Ok(None);
        }

        let mut pulled: Vec<Option<RecordBatch>> = Vec::with_capacity(self.files.len());
        for file in &mut self.files {
            let next = match file.records.as_mut() {
                Some(records) => records.next().transpose()?,
                None => None,
            };
            pulled.push(next);
        }

        let ended = pulled.iter().filter(|b| b.is_none()).count();
        if ended == pulled.len() {
            return Ok(None);
        }
        if ended > 0 {
            return Err(self.misaligned("ran out of rows"));
        }

        let mut index = HashMap::new();
        let mut columns = Vec::with_capacity(output_fields.len());
        let mut num_rows = None;
        for (file, batch) in self.files.iter().zip(pulled.into_iter().flatten()) {
            match num_rows {
                None => num_rows = Some(batch.num_rows()),
                Some(n) if n != batch.num_rows() => {
                    return Err(Error::decode(format!(
                        "segment {} batch {}: binlog {} has {} rows, expected {}",
                        self.info.segment_id,
                        self.info.batch_idx,
                        file.entry_id,
                        batch.num_rows(),
                        n
                    )))
                }
                Some(_) => {}
            }
            for (field_id, col) in file.decoder.mapping() {
                if !output_fields.contains(field_id) || index.contains_key(field_id) {
                    continue;
                }
                let array = batch.columns().get(*col).ok_or_else(|| {
                    Error::decode(format!(
                        "binlog {} maps field {} to missing column {}",
                        file.entry_id, field_id, col
                    ))
                })?;
                index.insert(*field_id, columns.len());
                columns.push(array.clone());
            }
        }
        Ok(Some((index, columns, num_rows.unwrap_or(0))))
    }

    /// Move every file to its next row group; false once all are used up
    fn advance_row_group(&mut self) -> Result<bool> {
        let mut next = Vec::with_capacity(self.files.len());
        for file in &mut self.files {
            next.push(file.decoder.next_record_reader()?);
        }
        let ended = next.iter().filter(|r| r.is_none()).count();
        if ended == next.len() {
            return Ok(false);
        }
        if ended > 0 {
            return Err(self.misaligned("ran out of row groups"));
        }
        for (file, records) in self.files.iter_mut().zip(next) {
            file.records = records;
        }
        Ok(true)
    }

    fn misaligned(&self, what: &str) -> Error {
        Error::decode(format!(
            "misaligned binlogs in segment {} batch {}: some files {} before others",
            self.info.segment_id, self.info.batch_idx, what
        ))
    }
}

/// Reads a segment as a sequence of column batches keyed by field id
///
/// Files of a batch are decoded together; the next batch is opened only
/// after every file of the current one is used up, and opening it drops the
/// previous decoders along with their streams.
pub struct SegmentRecordReader<T> {
    batches: SegmentBatchIterator<T>,
    storage_version: i64,
    output_fields: Vec<i64>,
    batch_size: usize,
    current: Option<OpenBatch>,
    done: bool,
}

impl<T: Translator> SegmentRecordReader<T> {
    pub fn new(
        segment: Arc<Segment>,
        translator: Arc<T>,
        output_fields: Vec<i64>,
        batch_size: usize,
    ) -> Result<Self> {
        let storage_version = segment.storage_version;
        let selector = selector_for(storage_version, &output_fields)?;
        Ok(Self {
            batches: SegmentBatchIterator::new(segment, selector, translator),
            storage_version,
            output_fields,
            batch_size,
            current: None,
            done: false,
        })
    }

    pub fn output_fields(&self) -> &[i64] {
        &self.output_fields
    }

    /// Next batch of rows; `None` once the segment is fully read
    pub async fn next(&mut self, cancel: &CancellationToken) -> Result<Option<SegmentBatch<'_>>> {
        let (index, columns, num_rows) = loop {
            if cancel.is_cancelled() {
                self.close();
                return Err(Error::Cancelled);
            }
            if self.done {
                return Ok(None);
            }
            let Some(open) = self.current.as_mut() else {
                match self.batches.next_batch(cancel).await? {
                    Some(info) => self.current = Some(self.open_batch(info)?),
                    None => self.done = true,
                }
                continue;
            };
            if let Some(composed) = open.compose(&self.output_fields)? {
                break composed;
            }
            if !open.advance_row_group()? {
                tracing::debug!(
                    segment_id = open.info.segment_id,
                    batch_idx = open.info.batch_idx,
                    "binlog batch exhausted"
                );
                self.current = None;
            }
        };

        let Some(open) = self.current.as_ref() else {
            return Err(Error::decode("record reader has no open batch"));
        };
        Ok(Some(SegmentBatch::new(index, columns, num_rows, &open.info)))
    }

    fn open_batch(&self, mut info: BatchInfo) -> Result<OpenBatch> {
        let streams = std::mem::take(&mut info.output);
        let mut files = Vec::with_capacity(streams.len());
        for (entry_id, stream) in streams {
            let mut decoder = new_binlog_reader(self.storage_version, stream, self.batch_size)?;
            if !self
                .output_fields
                .iter()
                .any(|f| decoder.mapping().contains_key(f))
            {
                tracing::debug!(
                    segment_id = info.segment_id,
                    entry_id,
                    path = ?info.target_binlogs.get(&entry_id),
                    "binlog holds no output field, skipped"
                );
                continue;
            }
            decoder.select_fields(&self.output_fields);
            let records = decoder.next_record_reader()?;
            files.push(OpenFile {
                entry_id,
                decoder,
                records,
            });
        }
        Ok(OpenBatch { info, files })
    }

    /// Drop open decoders and readers; further reads return `None`
    pub fn close(&mut self) {
        self.current = None;
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;
    use crate::storage::StorageClient;
    use crate::testutil::SegmentBuilder;
    use arrow::array::{Array, Int64Array, StringArray};

    fn ints(values: &[i64]) -> ArrayRef {
        Arc::new(Int64Array::from(values.to_vec()))
    }

    fn int_column(batch: &SegmentBatch<'_>, field_id: i64) -> Vec<i64> {
        batch
            .column(field_id)
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .values()
            .to_vec()
    }

    async fn legacy_segment(client: &StorageClient) -> Arc<Segment> {
        let segment = SegmentBuilder::new(1, 10, 1)
            .v1_field(1, DataType::Int64, vec![ints(&[11, 12]), ints(&[13, 14])])
            .unwrap()
            .v1_field(100, DataType::Int64, vec![ints(&[1, 2]), ints(&[3, 4])])
            .unwrap()
            .v1_field(101, DataType::Int64, vec![ints(&[5, 6]), ints(&[7, 8])])
            .unwrap()
            .write(client)
            .await
            .unwrap();
        Arc::new(segment)
    }

    #[tokio::test]
    async fn test_one_sequence_per_legacy_batch() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = legacy_segment(&client).await;
        let mut reader = SegmentRecordReader::new(segment, client, vec![1, 100], 1024).unwrap();
        let cancel = CancellationToken::new();

        let mut seen = Vec::new();
        while let Some(batch) = reader.next(&cancel).await.unwrap() {
            assert!(batch.column(101).is_none());
            seen.push((batch.info().batch_idx, int_column(&batch, 100), int_column(&batch, 1)));
        }
        assert_eq!(
            seen,
            vec![
                (0, vec![1, 2], vec![11, 12]),
                (1, vec![3, 4], vec![13, 14]),
            ]
        );
        assert!(reader.next(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_small_arrow_batches_stay_within_file_batch() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = legacy_segment(&client).await;
        let mut reader = SegmentRecordReader::new(segment, client, vec![100, 101], 1).unwrap();
        let cancel = CancellationToken::new();

        let mut batch_indices = Vec::new();
        let mut pks = Vec::new();
        while let Some(batch) = reader.next(&cancel).await.unwrap() {
            assert_eq!(batch.len(), 1);
            batch_indices.push(batch.info().batch_idx);
            pks.extend(int_column(&batch, 100));
        }
        assert_eq!(batch_indices, vec![0, 0, 1, 1]);
        assert_eq!(pks, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_wide_column_row_groups() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = SegmentBuilder::new(1, 20, 2)
            .v2_group(
                0,
                vec![],
                vec![vec![
                    (0, ints(&[0, 1, 2, 3])),
                    (1, ints(&[10, 11, 12, 13])),
                    (100, ints(&[1, 2, 3, 4])),
                    (101, Arc::new(StringArray::from(vec!["a", "b", "c", "d"])) as ArrayRef),
                ]],
                2,
            )
            .unwrap()
            .write(&client)
            .await
            .unwrap();

        let mut reader =
            SegmentRecordReader::new(Arc::new(segment), client, vec![1, 100], 1024).unwrap();
        let cancel = CancellationToken::new();
        let mut pks = Vec::new();
        while let Some(batch) = reader.next(&cancel).await.unwrap() {
            assert_eq!(batch.len(), 2);
            let mut fields: Vec<i64> = batch.field_ids().collect();
            fields.sort_unstable();
            assert_eq!(fields, vec![1, 100]);
            pks.push(int_column(&batch, 100));
        }
        assert_eq!(pks, vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn test_files_without_output_fields_are_skipped() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = SegmentBuilder::new(1, 21, 2)
            .v2_group(0, vec![], vec![vec![(0, ints(&[7, 8]))]], 1024)
            .unwrap()
            .v2_group(1, vec![], vec![vec![(1, ints(&[10, 11])), (100, ints(&[1, 2]))]], 1024)
            .unwrap()
            .write(&client)
            .await
            .unwrap();

        let mut reader =
            SegmentRecordReader::new(Arc::new(segment), client, vec![1, 100], 1024).unwrap();
        let batch = reader.next(&CancellationToken::new()).await.unwrap().unwrap();
        assert!(batch.column(0).is_none());
        assert_eq!(int_column(&batch, 100), vec![1, 2]);
        assert_eq!(batch.info().target_binlogs.len(), 2);
    }

    #[tokio::test]
    async fn test_row_count_mismatch_is_decode_error() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = SegmentBuilder::new(1, 30, 1)
            .v1_field(1, DataType::Int64, vec![ints(&[11, 12])])
            .unwrap()
            .v1_field(100, DataType::Int64, vec![ints(&[1, 2, 3])])
            .unwrap()
            .write(&client)
            .await
            .unwrap();

        let mut reader =
            SegmentRecordReader::new(Arc::new(segment), client, vec![1, 100], 1024).unwrap();
        let err = reader.next(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test]
    async fn test_close_and_cancel() {
        let client = Arc::new(StorageClient::memory().unwrap());
        let segment = legacy_segment(&client).await;
        let cancel = CancellationToken::new();

        let mut reader =
            SegmentRecordReader::new(segment.clone(), client.clone(), vec![100], 1024).unwrap();
        assert!(reader.next(&cancel).await.unwrap().is_some());
        reader.close();
        reader.close();
        assert!(reader.next(&cancel).await.unwrap().is_none());

        let mut reader = SegmentRecordReader::new(segment, client, vec![100], 1024).unwrap();
        cancel.cancel();
        assert!(matches!(reader.next(&cancel).await, Err(Error::Cancelled)));
    }
}
