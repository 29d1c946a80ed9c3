//! Scan tasks: terminal consumers of filtered rows
//!
//! One task instance may be shared by several concurrent segment scans, so
//! all task state is atomic or lives in concurrent maps.

mod count;
mod dedup;
mod locate;

pub use count::CountTask;
pub use dedup::DedupTask;
pub use locate::LocateTask;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{CollectionSchema, PrimaryKey, RowValues};
use crate::reader::BatchInfo;
use crate::{Error, Result};

/// What a task wants after consuming a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Enough rows seen; the scan ends normally
    Stop,
}

/// Consumer of matching rows
pub trait ScanTask: Send + Sync {
    /// Consume one row at `offset` within its record batch
    fn scan(&self, pk: &PrimaryKey, info: &BatchInfo, offset: usize, values: &RowValues) -> Result<Flow>;

    fn counter(&self) -> i64;

    /// Human-readable report
    fn summary(&self) -> String;
}

/// Task kinds selectable by name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanAction {
    #[default]
    Count,
    Dedup,
    Locate,
}

impl FromStr for ScanAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(ScanAction::Count),
            "dedup" => Ok(ScanAction::Dedup),
            "locate" => Ok(ScanAction::Locate),
            other => Err(Error::InvalidConfig(format!("unknown scan action {:?}", other))),
        }
    }
}

impl fmt::Display for ScanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanAction::Count => write!(f, "count"),
            ScanAction::Dedup => write!(f, "dedup"),
            ScanAction::Locate => write!(f, "locate"),
        }
    }
}

/// Task for `action` over a collection; `limit` caps printed rows of a
/// locate scan (0 = no cap)
pub fn build_task(action: ScanAction, schema: &CollectionSchema, limit: i64) -> Result<Arc<dyn ScanTask>> {
    let pk_field = schema
        .primary_key()
        .ok_or_else(|| Error::decode(format!("collection {} has no primary key field", schema.name)))?;
    Ok(match action {
        ScanAction::Count => Arc::new(CountTask::new()),
        ScanAction::Dedup => Arc::new(DedupTask::new(pk_field.clone())),
        ScanAction::Locate => Arc::new(LocateTask::new(limit, pk_field.clone()).with_field_names(schema)),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{DataType, FieldSchema};
    use std::collections::BTreeMap;

    pub(crate) fn batch_info(segment_id: i64, batch_idx: usize) -> BatchInfo {
        BatchInfo {
            segment_id,
            batch_idx,
            output: BTreeMap::new(),
            target_binlogs: BTreeMap::from([(100, format!("insert_log/1/{}/100/{}", segment_id, batch_idx))]),
        }
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("count".parse::<ScanAction>().unwrap(), ScanAction::Count);
        assert_eq!("Dedup".parse::<ScanAction>().unwrap(), ScanAction::Dedup);
        assert_eq!(ScanAction::Locate.to_string(), "locate");
        assert!(matches!("scan".parse::<ScanAction>(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_build_task() {
        let schema = CollectionSchema {
            name: "docs".into(),
            fields: vec![FieldSchema::new(100, "id", DataType::Int64).primary_key()],
        };
        let task = build_task(ScanAction::Count, &schema, 0).unwrap();
        let info = batch_info(1, 0);
        for i in 0..3 {
            let flow = task.scan(&PrimaryKey::Int64(i), &info, 0, &RowValues::new()).unwrap();
            assert_eq!(flow, Flow::Continue);
        }
        assert_eq!(task.counter(), 3);

        let no_pk = CollectionSchema {
            name: "docs".into(),
            fields: vec![FieldSchema::new(101, "age", DataType::Int64)],
        };
        assert!(matches!(build_task(ScanAction::Locate, &no_pk, 0), Err(Error::Decode(_))));
    }
}
