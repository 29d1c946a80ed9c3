//! Deltalog decoding
//!
//! Deltalogs share the legacy event framing. Each delete event embeds a
//! single string column whose cells are JSON delete records:
//!
//! ```text
//! {"pk": 42, "ts": 449934523446280193, "pkType": 5}
//! {"pk": "user-7", "ts": 449934523446280193, "pkType": 21}
//! ```

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use crate::binlog::column::ColumnData;
use crate::binlog::event::{DescriptorEvent, EventCursor};
use crate::models::{DataType, PrimaryKey};
use crate::storage::ByteStream;
use crate::{Error, Result};

/// Primary keys of one delta, stored column-wise
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryKeys {
    Int64(Vec<i64>),
    VarChar(Vec<String>),
}

impl PrimaryKeys {
    fn with_capacity(data_type: DataType, capacity: usize) -> Result<Self> {
        match data_type {
            DataType::Int64 => Ok(PrimaryKeys::Int64(Vec::with_capacity(capacity))),
            DataType::VarChar | DataType::String => {
                Ok(PrimaryKeys::VarChar(Vec::with_capacity(capacity)))
            }
            other => Err(Error::decode(format!("unsupported primary key type {}", other))),
        }
    }

    fn get(&self, idx: usize) -> Option<PrimaryKey> {
        match self {
            PrimaryKeys::Int64(v) => v.get(idx).map(|pk| PrimaryKey::Int64(*pk)),
            PrimaryKeys::VarChar(v) => v.get(idx).map(|pk| PrimaryKey::VarChar(pk.clone())),
        }
    }
}

/// Delete records: parallel primary keys and timestamps
///
/// Append-only. Merging concatenates, so iteration order is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaData {
    pks: PrimaryKeys,
    tss: Vec<u64>,
    data_type: DataType,
    row_count: usize,
}

impl DeltaData {
    pub fn new(data_type: DataType, capacity: usize) -> Result<Self> {
        Ok(Self {
            pks: PrimaryKeys::with_capacity(data_type, capacity)?,
            tss: Vec::with_capacity(capacity),
            data_type,
            row_count: 0,
        })
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Append one record; the key must match the delta's key type
    pub fn append(&mut self, pk: PrimaryKey, ts: u64) -> Result<()> {
        match (&mut self.pks, pk) {
            (PrimaryKeys::Int64(pks), PrimaryKey::Int64(pk)) => pks.push(pk),
            (PrimaryKeys::VarChar(pks), PrimaryKey::VarChar(pk)) => pks.push(pk),
            (_, pk) => {
                return Err(Error::decode(format!(
                    "{} primary key {} in {} delta",
                    pk.data_type(),
                    pk,
                    self.data_type
                )))
            }
        }
        self.tss.push(ts);
        self.row_count += 1;
        Ok(())
    }

    pub fn get(&self, idx: usize) -> Option<(PrimaryKey, u64)> {
        Some((self.pks.get(idx)?, *self.tss.get(idx)?))
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrimaryKey, u64)> + '_ {
        (0..self.row_count).filter_map(move |idx| self.get(idx))
    }

    /// Visit records in order until `f` returns false
    pub fn range(&self, mut f: impl FnMut(&PrimaryKey, u64) -> bool) {
        for (pk, ts) in self.iter() {
            if !f(&pk, ts) {
                return;
            }
        }
    }

    /// Append all of `other`'s records after this delta's own
    pub fn merge(&mut self, other: DeltaData) -> Result<()> {
        match (&mut self.pks, other.pks) {
            (PrimaryKeys::Int64(pks), PrimaryKeys::Int64(add)) => pks.extend(add),
            (PrimaryKeys::VarChar(pks), PrimaryKeys::VarChar(add)) => pks.extend(add),
            _ => {
                return Err(Error::decode(format!(
                    "cannot merge {} delta into {} delta",
                    other.data_type, self.data_type
                )))
            }
        }
        self.tss.extend(other.tss);
        self.row_count += other.row_count;
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawDeleteLog {
    pk: serde_json::Value,
    ts: u64,
    #[serde(rename = "pkType")]
    pk_type: i64,
}

/// One parsed delete record
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteLog {
    pub pk: PrimaryKey,
    pub ts: u64,
}

impl DeleteLog {
    /// Parse one JSON entry; `pkType` decides how `pk` is read
    pub fn parse(entry: &str) -> Result<Self> {
        let raw: RawDeleteLog = serde_json::from_str(entry)?;
        let data_type = DataType::from_code(raw.pk_type)
            .ok_or_else(|| Error::decode(format!("unsupported primary key type code {}", raw.pk_type)))?;
        let pk = match PrimaryKey::for_type(data_type)? {
            PrimaryKey::Int64(_) => raw.pk.as_i64().map(PrimaryKey::Int64),
            PrimaryKey::VarChar(_) => raw.pk.as_str().map(|s| PrimaryKey::VarChar(s.to_string())),
        }
        .ok_or_else(|| {
            Error::decode(format!("delete entry pk {} is not a {} value", raw.pk, data_type))
        })?;
        Ok(Self { pk, ts: raw.ts })
    }
}

/// Reader of one deltalog file
pub struct DeltalogReader {
    cursor: EventCursor,
    descriptor: DescriptorEvent,
}

impl DeltalogReader {
    pub fn new(stream: ByteStream) -> Result<Self> {
        let mut cursor = EventCursor::new(stream.into_bytes());
        let descriptor = cursor.read_preamble()?;
        Ok(Self { cursor, descriptor })
    }

    pub fn descriptor(&self) -> &DescriptorEvent {
        &self.descriptor
    }

    /// Delete records of the next event, keyed as `pk_type`
    pub fn next_delta_data(&mut self, pk_type: DataType) -> Result<Option<DeltaData>> {
        let Some(event) = self.cursor.next_event()? else {
            return Ok(None);
        };
        let reader = ParquetRecordBatchReaderBuilder::try_new(event.payload)?.build()?;
        let mut arrays = Vec::new();
        for batch in reader {
            arrays.push(batch?.column(0).clone());
        }
        let ColumnData::String(entries) = ColumnData::from_arrays(DataType::String, &arrays)? else {
            return Err(Error::decode("deltalog payload is not a string column"));
        };

        let mut delta = DeltaData::new(pk_type, entries.len())?;
        for entry in &entries {
            let log = DeleteLog::parse(entry)?;
            delta.append(log.pk, log.ts)?;
        }
        Ok(Some(delta))
    }

    /// All events of the file merged in order
    pub fn read_all(mut self, pk_type: DataType) -> Result<DeltaData> {
        let mut all = DeltaData::new(pk_type, 0)?;
        while let Some(delta) = self.next_delta_data(pk_type)? {
            all.merge(delta)?;
        }
        Ok(all)
    }
}
