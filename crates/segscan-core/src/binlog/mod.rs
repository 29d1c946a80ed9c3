//! Binlog decoders
//!
//! Two incompatible on-disk layouts exist:
//! - storage versions 0/1: event-framed files, one field per file ([`v1`])
//! - storage version 2: bare Parquet, many fields per file ([`v2`])
//!
//! Both are exposed through [`BinlogReader`], chosen by [`new_binlog_reader`].

pub mod column;
pub mod event;
pub mod v1;
pub mod v2;

use arrow::array::RecordBatch;
use arrow::error::ArrowError;
use std::collections::HashMap;

pub use column::ColumnData;
pub use v1::V1BinlogReader;
pub use v2::V2BinlogReader;

use crate::storage::ByteStream;
use crate::{Error, Result};

/// Arrow batches of one row group (v2) or one event (v1)
pub type RecordReader = Box<dyn Iterator<Item = std::result::Result<RecordBatch, ArrowError>> + Send>;

/// Decoder of a single binlog file
///
/// The decoder owns the file's byte stream; dropping it releases the stream.
pub trait BinlogReader: Send {
    /// Field id -> column index in the record batches this reader produces
    fn mapping(&self) -> &HashMap<i64, usize>;

    /// Restrict output to `fields`; unknown ids are ignored
    fn select_fields(&mut self, fields: &[i64]);

    /// Reader over the next row group; `None` once the file is exhausted
    fn next_record_reader(&mut self) -> Result<Option<RecordReader>>;
}

/// Physical layout of a segment's binlogs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVersion {
    /// Event-framed files (tags 0 and 1)
    Legacy,
    /// Wide-column Parquet files (tag 2)
    WideColumn,
}

impl TryFrom<i64> for StorageVersion {
    type Error = Error;

    fn try_from(tag: i64) -> Result<Self> {
        match tag {
            0 | 1 => Ok(StorageVersion::Legacy),
            2 => Ok(StorageVersion::WideColumn),
            other => Err(Error::decode(format!("unsupported storage version {}", other))),
        }
    }
}

/// Open the decoder matching a segment's storage-version tag
pub fn new_binlog_reader(
    storage_version: i64,
    stream: ByteStream,
    batch_size: usize,
) -> Result<Box<dyn BinlogReader>> {
    match StorageVersion::try_from(storage_version)? {
        StorageVersion::Legacy => Ok(Box::new(V1BinlogReader::new(stream, batch_size)?)),
        StorageVersion::WideColumn => Ok(Box::new(V2BinlogReader::new(stream, batch_size)?)),
    }
}
