//! Segment reading
//!
//! ```text
//! selector -> batch iterator -> per-file decoders -> SegmentBatch
//! ```

pub mod batch;
pub mod record;
pub mod segment;
pub mod selector;

pub use batch::{BatchInfo, SegmentBatchIterator};
pub use record::SegmentBatch;
pub use segment::SegmentRecordReader;
pub use selector::{selector_for, AllSelector, BinlogSelector, FieldIdSelector, WideColumnSelector};
