//! Composite record batches

use arrow::array::ArrayRef;
use std::collections::HashMap;

use super::batch::BatchInfo;

/// Columns of one step of a segment read, addressed by field id
///
/// Borrows the reader that produced it, so it cannot outlive the next call
/// to [`SegmentRecordReader::next`](super::SegmentRecordReader::next).
/// Dropping it releases this step's references to the column buffers.
#[derive(Debug)]
pub struct SegmentBatch<'a> {
    index: HashMap<i64, usize>,
    columns: Vec<ArrayRef>,
    num_rows: usize,
    info: &'a BatchInfo,
}

impl<'a> SegmentBatch<'a> {
    pub(crate) fn new(
        index: HashMap<i64, usize>,
        columns: Vec<ArrayRef>,
        num_rows: usize,
        info: &'a BatchInfo,
    ) -> Self {
        Self {
            index,
            columns,
            num_rows,
            info,
        }
    }

    pub fn column(&self, field_id: i64) -> Option<&ArrayRef> {
        self.index.get(&field_id).and_then(|idx| self.columns.get(*idx))
    }

    pub fn field_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.index.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    pub fn info(&self) -> &'a BatchInfo {
        self.info
    }
}
