//! segscan core - segment binlog and deltalog reading engine
//!
//! This crate reads the files a vector database writes for each segment of
//! a collection and runs diagnostic scans over the rows they hold:
//! - Event-framed (v1) binlogs and wide-column Parquet (v2) binlogs
//! - Deltalogs of `(primary key, timestamp)` delete records
//! - Batch-aligned composite record reading across per-field files
//! - Tombstone and predicate filtering
//! - Count, dedup and locate tasks run concurrently over a collection
//!
//! # Architecture
//!
//! Reading is layered, each layer owning the one below:
//! - [`storage::Translator`]: opens a recorded path as bytes
//! - [`binlog`]: turns one file into Arrow record batches
//! - [`reader`]: groups files into batches and zips them into rows
//! - [`iterator::SegmentIterator`]: decodes rows and applies filters
//! - [`scan::CollectionScanner`]: fans segments out to workers

pub mod binlog;
pub mod codec;
pub mod config;
pub mod deltalog;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod models;
pub mod reader;
pub mod scan;
pub mod storage;
pub mod tasks;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use config::ScanConfig;
pub use error::{Error, Result};
pub use iterator::{RangeOutcome, SegmentIterator};
pub use scan::CollectionScanner;
pub use tasks::{Flow, ScanAction, ScanTask};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
