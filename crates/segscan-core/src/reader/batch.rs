//! Batch-by-batch opening of a segment's files

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::selector::BinlogSelector;
use crate::models::Segment;
use crate::storage::{ByteStream, Translator};
use crate::{Error, Result};

/// Files of one batch
#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub segment_id: i64,
    pub batch_idx: usize,
    /// Entry id -> opened stream; drained by the record reader, whose
    /// decoders then own the streams
    pub output: BTreeMap<i64, ByteStream>,
    /// Entry id -> recorded path
    pub target_binlogs: BTreeMap<i64, String>,
}

impl BatchInfo {
    /// Path of the file holding `field_id`, or of the batch's first file when
    /// the field lives in a column group
    pub fn binlog_path(&self, field_id: i64) -> Option<&str> {
        self.target_binlogs
            .get(&field_id)
            .or_else(|| self.target_binlogs.values().next())
            .map(String::as_str)
    }
}

/// Walks batch indices, opening the selected files of each
pub struct SegmentBatchIterator<T> {
    segment: Arc<Segment>,
    selector: Box<dyn BinlogSelector>,
    translator: Arc<T>,
    current_batch: usize,
}

impl<T: Translator> SegmentBatchIterator<T> {
    pub fn new(segment: Arc<Segment>, selector: Box<dyn BinlogSelector>, translator: Arc<T>) -> Self {
        Self {
            segment,
            selector,
            translator,
            current_batch: 0,
        }
    }

    /// Open the next batch; `None` after the last one
    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> Result<Option<BatchInfo>> {
        let Some(targets) = self
            .selector
            .select_binlogs(&self.segment.binlogs, self.current_batch)
        else {
            return Ok(None);
        };

        let mut output = BTreeMap::new();
        for (entry_id, path) in &targets {
            let stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                stream = self.translator.open(path) => stream?,
            };
            output.insert(*entry_id, stream);
        }
        tracing::debug!(
            segment_id = self.segment.id,
            batch_idx = self.current_batch,
            files = output.len(),
            "opened binlog batch"
        );

        let info = BatchInfo {
            segment_id: self.segment.id,
            batch_idx: self.current_batch,
            output,
            target_binlogs: targets,
        };
        self.current_batch += 1;
        Ok(Some(info))
    }
}
