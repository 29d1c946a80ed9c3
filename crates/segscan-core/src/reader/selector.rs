//! Binlog file selection per batch
//!
//! A segment records, for every field (legacy) or column group (wide
//! column), an ordered list of files; entry `i` of every list belongs to
//! batch `i`. A selector picks which of those lists must be opened for a
//! given set of output fields.

use std::collections::{BTreeMap, HashSet};

use crate::binlog::StorageVersion;
use crate::models::{FieldBinlog, START_USER_FIELD_ID};
use crate::Result;

/// Picks the files of one batch
pub trait BinlogSelector: Send + Sync {
    /// Whether the file list of `binlog` is needed at all
    fn includes(&self, binlog: &FieldBinlog) -> bool;

    /// Entry id -> path of every needed file at `batch_idx`
    ///
    /// `None` once any needed list has no entry at `batch_idx`, or when no
    /// list is needed.
    fn select_binlogs(&self, binlogs: &[FieldBinlog], batch_idx: usize) -> Option<BTreeMap<i64, String>> {
        let mut selected = BTreeMap::new();
        for binlog in binlogs.iter().filter(|b| self.includes(b)) {
            let entry = binlog.binlogs.get(batch_idx)?;
            selected.insert(binlog.field_id, entry.log_path.clone());
        }
        if selected.is_empty() {
            return None;
        }
        Some(selected)
    }
}

/// Legacy layout: one file per field, matched by field id
pub struct FieldIdSelector {
    fields: HashSet<i64>,
}

impl FieldIdSelector {
    pub fn new(fields: &[i64]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
        }
    }
}

impl BinlogSelector for FieldIdSelector {
    fn includes(&self, binlog: &FieldBinlog) -> bool {
        self.fields.contains(&binlog.field_id)
    }
}

/// Every recorded list
pub struct AllSelector;

impl BinlogSelector for AllSelector {
    fn includes(&self, _binlog: &FieldBinlog) -> bool {
        true
    }
}

/// Wide-column layout: one file may hold many fields
///
/// A group listing its child fields is needed iff one of them is selected.
/// Without that list the group id is all there is to go on: system groups
/// (ids below 100) are always opened, user groups only when their id is
/// selected. Files opened this way are narrowed again by the field ids found
/// in their own column metadata.
pub struct WideColumnSelector {
    fields: HashSet<i64>,
}

impl WideColumnSelector {
    pub fn new(fields: &[i64]) -> Self {
        Self {
            fields: fields.iter().copied().collect(),
        }
    }
}

impl BinlogSelector for WideColumnSelector {
    fn includes(&self, binlog: &FieldBinlog) -> bool {
        if !binlog.child_fields.is_empty() {
            return binlog.child_fields.iter().any(|f| self.fields.contains(f));
        }
        binlog.field_id < START_USER_FIELD_ID || self.fields.contains(&binlog.field_id)
    }
}

/// The selector matching a segment's storage version
pub fn selector_for(storage_version: i64, fields: &[i64]) -> Result<Box<dyn BinlogSelector>> {
    Ok(match StorageVersion::try_from(storage_version)? {
        StorageVersion::Legacy => Box::new(FieldIdSelector::new(fields)),
        StorageVersion::WideColumn => Box::new(WideColumnSelector::new(fields)),
    })
}
