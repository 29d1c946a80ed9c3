use std::sync::atomic::{AtomicI64, Ordering};

use super::{Flow, ScanTask};
use crate::models::{PrimaryKey, RowValues};
use crate::reader::BatchInfo;
use crate::Result;

/// Counts matching rows
#[derive(Debug, Default)]
pub struct CountTask {
    counter: AtomicI64,
}

impl CountTask {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScanTask for CountTask {
    fn scan(&self, _pk: &PrimaryKey, _info: &BatchInfo, _offset: usize, _values: &RowValues) -> Result<Flow> {
        self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(Flow::Continue)
    }

    fn counter(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    fn summary(&self) -> String {
        format!("Total {} entries found", self.counter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::tests::batch_info;

    #[test]
    fn test_count_from_threads() {
        let task = CountTask::new();
        let info = batch_info(1, 0);
        std::thread::scope(|s| {
            for t in 0..4 {
                let (task, info) = (&task, &info);
                s.spawn(move || {
                    for i in 0..100 {
                        task.scan(&PrimaryKey::Int64(t * 100 + i), info, 0, &RowValues::new())
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(task.counter(), 400);
        assert_eq!(task.summary(), "Total 400 entries found");
    }
}
