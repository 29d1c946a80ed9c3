//! Fixture encoders for tests and benchmarks
//!
//! Produces files in the layouts the decoders read: event-framed binlogs and
//! deltalogs, and wide-column Parquet binlogs. Compiled for tests and behind
//! the `test-utils` feature.

use arrow::array::{ArrayRef, RecordBatch, StringArray};
use arrow::datatypes::{Field, Schema};
use bytes::BufMut;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::collections::HashMap;
use std::sync::Arc;

use crate::binlog::event::{
    EventType, DESCRIPTOR_FIX_PART_SIZE, EVENT_FIX_PART_SIZE, EVENT_HEADER_SIZE, EVENT_TYPE_COUNT,
    MAGIC_NUMBER, ORIGINAL_SIZE_KEY,
};
use crate::binlog::v2::PARQUET_FIELD_ID_KEY;
use crate::codec::CodecRegistry;
use crate::filter::{CompiledExpr, ExprEngine};
use crate::models::{Binlog, DataType, FieldBinlog, PrimaryKey, Segment, Value};
use crate::storage::StorageClient;
use crate::{Error, Result};

type ExprFn = Arc<dyn Fn(&HashMap<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// Expression engine backed by closures registered per expression text
#[derive(Clone, Default)]
pub struct ClosureEngine {
    exprs: HashMap<String, ExprFn>,
}

impl ClosureEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        expr: &str,
        f: impl Fn(&HashMap<String, Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.exprs.insert(expr.to_string(), Arc::new(f));
        self
    }
}

struct ClosureExpr(ExprFn);

impl CompiledExpr for ClosureExpr {
    fn run(&self, env: &HashMap<String, Value>) -> anyhow::Result<Value> {
        (self.0)(env)
    }
}

impl ExprEngine for ClosureEngine {
    fn compile(&self, expr: &str) -> anyhow::Result<Box<dyn CompiledExpr>> {
        let f = self
            .exprs
            .get(expr)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown expression {:?}", expr))?;
        Ok(Box::new(ClosureExpr(f)))
    }
}

/// Descriptor fields of a fixture file
#[derive(Debug, Clone)]
pub struct DescriptorSpec {
    pub collection_id: i64,
    pub partition_id: i64,
    pub segment_id: i64,
    pub field_id: i64,
    pub payload_type: DataType,
    pub original_size: u64,
}

impl Default for DescriptorSpec {
    fn default() -> Self {
        Self {
            collection_id: 1,
            partition_id: 2,
            segment_id: 3,
            field_id: 100,
            payload_type: DataType::Int64,
            original_size: 0,
        }
    }
}

/// Frame raw payloads as data events behind a descriptor event
pub fn encode_event_file(spec: &DescriptorSpec, event_type: EventType, payloads: &[&[u8]]) -> Vec<u8> {
    let extras = serde_json::json!({ ORIGINAL_SIZE_KEY: spec.original_size.to_string() });
    let extras = extras.to_string().into_bytes();
    let descriptor_len = EVENT_HEADER_SIZE + DESCRIPTOR_FIX_PART_SIZE + EVENT_TYPE_COUNT + 4 + extras.len();

    let mut buf = Vec::new();
    buf.put_i32_le(MAGIC_NUMBER);

    put_header(&mut buf, EventType::Descriptor, descriptor_len);
    buf.put_i64_le(spec.collection_id);
    buf.put_i64_le(spec.partition_id);
    buf.put_i64_le(spec.segment_id);
    buf.put_i64_le(spec.field_id);
    buf.put_u64_le(1);
    buf.put_u64_le(u64::MAX);
    buf.put_i32_le(spec.payload_type.code() as i32);
    for code in 0..EVENT_TYPE_COUNT {
        let size = if code == EventType::Descriptor as usize {
            DESCRIPTOR_FIX_PART_SIZE
        } else {
            EVENT_FIX_PART_SIZE
        };
        buf.put_u8(size as u8);
    }
    buf.put_i32_le(extras.len() as i32);
    buf.put_slice(&extras);

    for (idx, payload) in payloads.iter().enumerate() {
        let event_len = EVENT_HEADER_SIZE + EVENT_FIX_PART_SIZE + payload.len();
        put_header(&mut buf, event_type, event_len);
        buf.put_u64_le(idx as u64 + 1);
        buf.put_u64_le(idx as u64 + 2);
        buf.put_slice(payload);
    }
    buf
}

/// Event header; `next_position` points past the event
fn put_header(buf: &mut Vec<u8>, event_type: EventType, event_len: usize) {
    let next = (buf.len() + event_len) as i32;
    buf.put_u64_le(0);
    buf.put_i8(event_type as i8);
    buf.put_i32_le(event_len as i32);
    buf.put_i32_le(next);
}

/// Encode a batch as an in-memory Parquet file
pub fn write_parquet(batch: &RecordBatch, max_row_group_size: Option<usize>) -> Result<Vec<u8>> {
    let mut props = WriterProperties::builder();
    if let Some(size) = max_row_group_size {
        props = props.set_max_row_group_size(size);
    }
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props.build()))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buf)
}

fn single_column_parquet(array: &ArrayRef) -> Result<Vec<u8>> {
    let schema = Arc::new(Schema::new(vec![Field::new("val", array.data_type().clone(), true)]));
    let batch = RecordBatch::try_new(schema, vec![array.clone()])?;
    write_parquet(&batch, None)
}

/// Legacy binlog with one insert event per array
pub fn encode_v1_binlog(spec: &DescriptorSpec, arrays: &[ArrayRef]) -> Result<Vec<u8>> {
    let payloads = arrays
        .iter()
        .map(single_column_parquet)
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
    Ok(encode_event_file(spec, EventType::Insert, &refs))
}

/// Wide-column binlog; each column tagged with its field id
pub fn encode_v2_binlog(columns: &[(i64, ArrayRef)], row_group_size: usize) -> Result<Vec<u8>> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(field_id, array)| {
            Field::new(format!("f{}", field_id), array.data_type().clone(), true).with_metadata(
                HashMap::from([(PARQUET_FIELD_ID_KEY.to_string(), field_id.to_string())]),
            )
        })
        .collect();
    let batch = RecordBatch::try_new(
        Arc::new(Schema::new(fields)),
        columns.iter().map(|(_, array)| array.clone()).collect(),
    )?;
    write_parquet(&batch, Some(row_group_size))
}

/// JSON line of one delete record
pub fn delete_entry(pk: &PrimaryKey, ts: u64) -> String {
    let pk_value = match pk {
        PrimaryKey::Int64(v) => serde_json::json!(v),
        PrimaryKey::VarChar(v) => serde_json::json!(v),
    };
    serde_json::json!({ "pk": pk_value, "ts": ts, "pkType": pk.data_type().code() }).to_string()
}

/// Deltalog with one delete event per chunk of entries
pub fn encode_deltalog(events: &[Vec<(PrimaryKey, u64)>]) -> Result<Vec<u8>> {
    let payloads = events
        .iter()
        .map(|entries| {
            let lines: Vec<String> = entries.iter().map(|(pk, ts)| delete_entry(pk, *ts)).collect();
            let array: ArrayRef = Arc::new(StringArray::from(lines));
            single_column_parquet(&array)
        })
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
    let spec = DescriptorSpec {
        field_id: 0,
        payload_type: DataType::String,
        ..Default::default()
    };
    Ok(encode_event_file(&spec, EventType::Delete, &refs))
}

/// Build an array of `data_type` through the codec
pub fn build_array(
    codecs: &CodecRegistry,
    data_type: DataType,
    dim: usize,
    values: &[Value],
) -> Result<ArrayRef> {
    let mut builder = codecs
        .builder(data_type, dim, values.len())
        .ok_or_else(|| Error::decode(format!("no codec for {}", data_type)))?;
    for value in values {
        if !codecs.serialize(data_type, builder.as_mut(), value) {
            return Err(Error::decode(format!("cannot store {:?} as {}", value, data_type)));
        }
    }
    Ok(builder.finish())
}

/// Assembles a segment's files and metadata, then uploads them
pub struct SegmentBuilder {
    segment: Segment,
    files: Vec<(String, Vec<u8>)>,
}

impl SegmentBuilder {
    pub fn new(collection_id: i64, segment_id: i64, storage_version: i64) -> Self {
        Self {
            segment: Segment::new(segment_id, collection_id, storage_version),
            files: Vec::new(),
        }
    }

    fn prefix(&self, kind: &str) -> String {
        format!("{}/{}/{}", kind, self.segment.collection_id, self.segment.id)
    }

    /// Legacy field: one binlog file per batch, one event per file
    pub fn v1_field(mut self, field_id: i64, data_type: DataType, batches: Vec<ArrayRef>) -> Result<Self> {
        let spec = DescriptorSpec {
            collection_id: self.segment.collection_id,
            segment_id: self.segment.id,
            field_id,
            payload_type: data_type,
            ..Default::default()
        };
        let mut binlogs = Vec::new();
        for (idx, array) in batches.iter().enumerate() {
            let path = format!("{}/{}/{}", self.prefix("insert_log"), field_id, idx);
            self.files.push((path.clone(), encode_v1_binlog(&spec, std::slice::from_ref(array))?));
            binlogs.push(Binlog {
                log_path: path,
                entries_num: array.len() as i64,
                timestamp_from: 0,
                timestamp_to: 0,
            });
        }
        self.segment.num_rows = self.segment.num_rows.max(batches.iter().map(|a| a.len() as i64).sum());
        self.segment.binlogs.push(FieldBinlog {
            field_id,
            child_fields: Vec::new(),
            binlogs,
        });
        Ok(self)
    }

    /// Wide-column group: one Parquet file per batch
    pub fn v2_group(
        mut self,
        group_id: i64,
        child_fields: Vec<i64>,
        batches: Vec<Vec<(i64, ArrayRef)>>,
        row_group_size: usize,
    ) -> Result<Self> {
        let mut binlogs = Vec::new();
        for (idx, columns) in batches.iter().enumerate() {
            let path = format!("{}/{}/{}", self.prefix("insert_log"), group_id, idx);
            self.files.push((path.clone(), encode_v2_binlog(columns, row_group_size)?));
            binlogs.push(Binlog::new(path));
        }
        self.segment.binlogs.push(FieldBinlog {
            field_id: group_id,
            child_fields,
            binlogs,
        });
        Ok(self)
    }

    /// One deltalog file
    pub fn deltalog(mut self, entries: Vec<(PrimaryKey, u64)>) -> Result<Self> {
        let idx = self.segment.deltalogs.first().map_or(0, |fb| fb.binlogs.len());
        let path = format!("{}/{}", self.prefix("delta_log"), idx);
        self.files.push((path.clone(), encode_deltalog(&[entries])?));
        match self.segment.deltalogs.first_mut() {
            Some(fb) => fb.binlogs.push(Binlog::new(path)),
            None => self.segment.deltalogs.push(FieldBinlog {
                field_id: 0,
                child_fields: Vec::new(),
                binlogs: vec![Binlog::new(path)],
            }),
        }
        Ok(self)
    }

    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }

    /// Upload all files and return the segment metadata
    pub async fn write(self, client: &StorageClient) -> Result<Segment> {
        for (path, data) in self.files {
            client.write(&path, data).await?;
        }
        Ok(self.segment)
    }
}
