use dashmap::{DashMap, DashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{Flow, ScanTask};
use crate::models::{FieldSchema, PrimaryKey, RowValues};
use crate::reader::BatchInfo;
use crate::Result;

/// Entries listed by the summary
const SUMMARY_TOP: usize = 10;

/// Finds primary keys that occur more than once
///
/// The counter holds the number of repeat sightings over all keys.
pub struct DedupTask {
    counter: AtomicI64,
    pk_field: FieldSchema,
    seen: DashSet<PrimaryKey>,
    /// pk -> repeat sightings
    duplicates: DashMap<PrimaryKey, i64>,
}

impl DedupTask {
    pub fn new(pk_field: FieldSchema) -> Self {
        Self {
            counter: AtomicI64::new(0),
            pk_field,
            seen: DashSet::new(),
            duplicates: DashMap::new(),
        }
    }

    /// Repeat sightings of `pk`
    pub fn duplicates(&self, pk: &PrimaryKey) -> i64 {
        self.duplicates.get(pk).map_or(0, |n| *n)
    }

    /// Keys with the most repeats, most first
    pub fn top(&self, n: usize) -> Vec<(PrimaryKey, i64)> {
        let mut entries: Vec<(PrimaryKey, i64)> = self
            .duplicates
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }
}

impl ScanTask for DedupTask {
    fn scan(&self, pk: &PrimaryKey, _info: &BatchInfo, _offset: usize, _values: &RowValues) -> Result<Flow> {
        if !self.seen.insert(pk.clone()) {
            self.counter.fetch_add(1, Ordering::Relaxed);
            *self.duplicates.entry(pk.clone()).or_insert(0) += 1;
        }
        Ok(Flow::Continue)
    }

    fn counter(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    fn summary(&self) -> String {
        let mut out = format!("{} duplicated entries found", self.counter());
        for (pk, repeats) in self.top(SUMMARY_TOP) {
            let _ = write!(
                out,
                "\nPK[{}] {} appears {} times",
                self.pk_field.name,
                pk,
                repeats + 1
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DataType;
    use crate::tasks::tests::batch_info;

    #[test]
    fn test_repeat_sightings() {
        let task = DedupTask::new(FieldSchema::new(100, "id", DataType::Int64).primary_key());
        let info = batch_info(1, 0);
        for v in [1, 2, 2, 3, 2] {
            task.scan(&PrimaryKey::Int64(v), &info, 0, &RowValues::new()).unwrap();
        }
        assert_eq!(task.counter(), 3);
        assert_eq!(task.duplicates(&PrimaryKey::Int64(2)), 2);
        assert_eq!(task.duplicates(&PrimaryKey::Int64(1)), 0);
        assert_eq!(task.top(5), vec![(PrimaryKey::Int64(2), 2)]);

        let summary = task.summary();
        assert!(summary.starts_with("3 duplicated entries found"));
        assert!(summary.contains("PK[id] 2 appears 3 times"));
    }

    #[test]
    fn test_shared_across_threads() {
        let task = DedupTask::new(FieldSchema::new(100, "id", DataType::VarChar).primary_key());
        let info = batch_info(1, 0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                let (task, info) = (&task, &info);
                s.spawn(move || {
                    for i in 0..50 {
                        let pk = PrimaryKey::VarChar(format!("k{}", i));
                        task.scan(&pk, info, 0, &RowValues::new()).unwrap();
                    }
                });
            }
        });
        // each key seen four times: three repeats
        assert_eq!(task.counter(), 150);
        assert_eq!(task.duplicates(&PrimaryKey::VarChar("k7".into())), 3);
    }
}
