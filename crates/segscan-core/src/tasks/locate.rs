use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{Flow, ScanTask};
use crate::models::{CollectionSchema, FieldSchema, PrimaryKey, RowValues, ROW_ID_FIELD_ID, TIMESTAMP_FIELD_ID};
use crate::reader::BatchInfo;
use crate::Result;

/// Prints matching rows with the files they came from
///
/// Stops the scan once `limit` rows are printed; a limit of 0 prints all.
pub struct LocateTask {
    counter: AtomicI64,
    limit: i64,
    pk_field: FieldSchema,
    names: HashMap<i64, String>,
    out: Mutex<Box<dyn Write + Send>>,
}

impl LocateTask {
    pub fn new(limit: i64, pk_field: FieldSchema) -> Self {
        Self::with_writer(limit, pk_field, Box::new(std::io::stdout()))
    }

    pub fn with_writer(limit: i64, pk_field: FieldSchema, out: Box<dyn Write + Send>) -> Self {
        Self {
            counter: AtomicI64::new(0),
            limit,
            pk_field,
            names: HashMap::new(),
            out: Mutex::new(out),
        }
    }

    /// Label printed fields with their names in `schema`
    pub fn with_field_names(mut self, schema: &CollectionSchema) -> Self {
        self.names = HashMap::from([
            (ROW_ID_FIELD_ID, "RowID".to_string()),
            (TIMESTAMP_FIELD_ID, "Timestamp".to_string()),
        ]);
        self.names
            .extend(schema.fields.iter().map(|f| (f.field_id, f.name.clone())));
        self
    }
}

impl ScanTask for LocateTask {
    fn scan(&self, pk: &PrimaryKey, info: &BatchInfo, offset: usize, values: &RowValues) -> Result<Flow> {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if self.limit > 0 && idx > self.limit {
            return Ok(Flow::Stop);
        }

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        let ts = values
            .get(&TIMESTAMP_FIELD_ID)
            .map_or_else(|| "-".to_string(), ToString::to_string);
        writeln!(
            out,
            "entry found, segment {} offset {}, pk: {}, ts: {}",
            info.segment_id, offset, pk, ts
        )?;
        for (field_id, value) in values {
            match self.names.get(field_id) {
                Some(name) => writeln!(out, "field {} ({}): {}", field_id, name, value)?,
                None => writeln!(out, "field {}: {}", field_id, value)?,
            }
        }
        writeln!(
            out,
            "binlog batch {}, pk binlog {}",
            info.batch_idx,
            info.binlog_path(self.pk_field.field_id).unwrap_or("-")
        )?;
        out.flush()?;
        Ok(Flow::Continue)
    }

    fn counter(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    fn summary(&self) -> String {
        let located = if self.limit > 0 {
            self.counter().min(self.limit)
        } else {
            self.counter()
        };
        format!("{} entries located", located)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataType, Value};
    use crate::tasks::tests::batch_info;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_stops_at_limit() {
        let buf = SharedBuf::default();
        let pk_field = FieldSchema::new(100, "id", DataType::Int64).primary_key();
        let task = LocateTask::with_writer(2, pk_field, Box::new(buf.clone()));
        let info = batch_info(9, 1);

        let mut flows = Vec::new();
        for i in 0..3 {
            let values = RowValues::from([(1, Value::Int64(1000 + i)), (100, Value::Int64(i))]);
            flows.push(task.scan(&PrimaryKey::Int64(i), &info, i as usize, &values).unwrap());
        }
        assert_eq!(flows, vec![Flow::Continue, Flow::Continue, Flow::Stop]);

        let text = buf.text();
        assert_eq!(text.matches("entry found").count(), 2);
        assert!(text.contains("entry found, segment 9 offset 1, pk: 1, ts: 1001"));
        assert!(text.contains("field 100: 0"));
        assert!(text.contains("binlog batch 1, pk binlog insert_log/1/9/100/1"));
        assert_eq!(task.summary(), "2 entries located");
    }

    #[test]
    fn test_field_names() {
        let buf = SharedBuf::default();
        let schema = CollectionSchema {
            name: "docs".into(),
            fields: vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "age", DataType::Int64),
            ],
        };
        let task = LocateTask::with_writer(0, schema.fields[0].clone(), Box::new(buf.clone()))
            .with_field_names(&schema);
        let values = RowValues::from([
            (1, Value::Int64(1007)),
            (100, Value::Int64(7)),
            (101, Value::Int64(30)),
            (102, Value::Int64(0)),
        ]);
        task.scan(&PrimaryKey::Int64(7), &batch_info(9, 0), 3, &values).unwrap();

        let text = buf.text();
        assert!(text.contains("field 1 (Timestamp): 1007"));
        assert!(text.contains("field 100 (id): 7"));
        assert!(text.contains("field 101 (age): 30"));
        // not in the schema
        assert!(text.contains("field 102: 0"));
    }

    #[test]
    fn test_no_limit() {
        let buf = SharedBuf::default();
        let pk_field = FieldSchema::new(100, "id", DataType::Int64).primary_key();
        let task = LocateTask::with_writer(0, pk_field, Box::new(buf.clone()));
        let info = batch_info(9, 0);
        for i in 0..5 {
            let flow = task.scan(&PrimaryKey::Int64(i), &info, 0, &RowValues::new()).unwrap();
            assert_eq!(flow, Flow::Continue);
        }
        assert_eq!(buf.text().matches("ts: -").count(), 5);
    }
}
