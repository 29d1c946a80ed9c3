//! Segment metadata and row value types
//!
//! Everything in here is supplied by the metadata service (or a manifest in
//! object storage) and is read-only to the reader chain.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Reserved field id of the row id system column
pub const ROW_ID_FIELD_ID: i64 = 0;
/// Reserved field id of the timestamp system column
pub const TIMESTAMP_FIELD_ID: i64 = 1;
/// First field id handed out to user-defined fields
pub const START_USER_FIELD_ID: i64 = 100;

/// Logical field types, numbered the way the database encodes them on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    VarChar,
    Array,
    #[serde(rename = "JSON")]
    Json,
    BinaryVector,
    FloatVector,
    Float16Vector,
    BFloat16Vector,
    SparseFloatVector,
}

impl DataType {
    /// Decode a numeric type code
    pub fn from_code(code: i64) -> Option<Self> {
        let dt = match code {
            1 => DataType::Bool,
            2 => DataType::Int8,
            3 => DataType::Int16,
            4 => DataType::Int32,
            5 => DataType::Int64,
            10 => DataType::Float,
            11 => DataType::Double,
            20 => DataType::String,
            21 => DataType::VarChar,
            22 => DataType::Array,
            23 => DataType::Json,
            100 => DataType::BinaryVector,
            101 => DataType::FloatVector,
            102 => DataType::Float16Vector,
            103 => DataType::BFloat16Vector,
            104 => DataType::SparseFloatVector,
            _ => return None,
        };
        Some(dt)
    }

    /// Numeric type code
    pub fn code(self) -> i64 {
        match self {
            DataType::Bool => 1,
            DataType::Int8 => 2,
            DataType::Int16 => 3,
            DataType::Int32 => 4,
            DataType::Int64 => 5,
            DataType::Float => 10,
            DataType::Double => 11,
            DataType::String => 20,
            DataType::VarChar => 21,
            DataType::Array => 22,
            DataType::Json => 23,
            DataType::BinaryVector => 100,
            DataType::FloatVector => 101,
            DataType::Float16Vector => 102,
            DataType::BFloat16Vector => 103,
            DataType::SparseFloatVector => 104,
        }
    }

    pub fn is_vector(self) -> bool {
        matches!(
            self,
            DataType::BinaryVector
                | DataType::FloatVector
                | DataType::Float16Vector
                | DataType::BFloat16Vector
                | DataType::SparseFloatVector
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Dynamic cell value shared by filters and scan tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    FloatVector(Vec<f32>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::FloatVector(v) => write!(f, "{:?}", v),
        }
    }
}

/// Deserialized row, keyed by field id
pub type RowValues = BTreeMap<i64, Value>;

/// Primary key of a row or delete record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PrimaryKey {
    Int64(i64),
    VarChar(String),
}

impl PrimaryKey {
    /// Zero value for a primary-key field of the given type
    pub fn for_type(data_type: DataType) -> Result<Self> {
        match data_type {
            DataType::Int64 => Ok(PrimaryKey::Int64(0)),
            DataType::VarChar | DataType::String => Ok(PrimaryKey::VarChar(String::new())),
            other => Err(Error::decode(format!("unsupported primary key type {}", other))),
        }
    }

    /// Overwrite the current value, keeping the variant. Returns false on a type mismatch.
    pub fn set_value(&mut self, value: &Value) -> bool {
        match (self, value) {
            (PrimaryKey::Int64(pk), Value::Int64(v)) => {
                *pk = *v;
                true
            }
            (PrimaryKey::VarChar(pk), Value::String(v)) => {
                pk.clone_from(v);
                true
            }
            _ => false,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            PrimaryKey::Int64(_) => DataType::Int64,
            PrimaryKey::VarChar(_) => DataType::VarChar,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PrimaryKey::Int64(v) => Value::Int64(*v),
            PrimaryKey::VarChar(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryKey::Int64(v) => write!(f, "{}", v),
            PrimaryKey::VarChar(v) => write!(f, "{}", v),
        }
    }
}

/// Schema of one logical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: i64,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub is_primary_key: bool,
    /// Vector dimension, required for vector types
    #[serde(default)]
    pub dim: Option<usize>,
}

impl FieldSchema {
    pub fn new(field_id: i64, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            field_id,
            name: name.into(),
            data_type,
            is_primary_key: false,
            dim: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }
}

/// Collection schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    pub fn primary_key(&self) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.is_primary_key)
    }

    pub fn field(&self, field_id: i64) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One binlog file reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binlog {
    pub log_path: String,
    #[serde(default)]
    pub entries_num: i64,
    #[serde(default)]
    pub timestamp_from: u64,
    #[serde(default)]
    pub timestamp_to: u64,
}

impl Binlog {
    pub fn new(log_path: impl Into<String>) -> Self {
        Self {
            log_path: log_path.into(),
            entries_num: 0,
            timestamp_from: 0,
            timestamp_to: 0,
        }
    }
}

/// Ordered binlog files of one field (or column group); one entry per batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinlog {
    /// Field id for legacy storage, column group id for wide-column storage
    pub field_id: i64,
    /// Logical fields stored in a column group, when recorded
    #[serde(default)]
    pub child_fields: Vec<i64>,
    pub binlogs: Vec<Binlog>,
}

impl FieldBinlog {
    pub fn new(field_id: i64, paths: &[&str]) -> Self {
        Self {
            field_id,
            child_fields: Vec::new(),
            binlogs: paths.iter().map(|p| Binlog::new(*p)).collect(),
        }
    }

    pub fn with_child_fields(mut self, child_fields: Vec<i64>) -> Self {
        self.child_fields = child_fields;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentLevel {
    #[default]
    Legacy,
    L0,
    L1,
    L2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Growing,
    Sealed,
    #[default]
    Flushed,
    Flushing,
    Dropped,
    Importing,
}

/// Segment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub collection_id: i64,
    #[serde(default)]
    pub partition_id: i64,
    #[serde(default)]
    pub level: SegmentLevel,
    #[serde(default)]
    pub state: SegmentState,
    /// 0/1 = event-framed legacy files, 2 = wide-column Parquet files
    #[serde(default)]
    pub storage_version: i64,
    #[serde(default)]
    pub num_rows: i64,
    #[serde(default)]
    pub binlogs: Vec<FieldBinlog>,
    #[serde(default)]
    pub deltalogs: Vec<FieldBinlog>,
}

impl Segment {
    pub fn new(id: i64, collection_id: i64, storage_version: i64) -> Self {
        Self {
            id,
            collection_id,
            partition_id: 0,
            level: SegmentLevel::default(),
            state: SegmentState::default(),
            storage_version,
            num_rows: 0,
            binlogs: Vec::new(),
            deltalogs: Vec::new(),
        }
    }

    pub fn delta_paths(&self) -> impl Iterator<Item = &str> {
        self.deltalogs
            .iter()
            .flat_map(|fb| fb.binlogs.iter().map(|b| b.log_path.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_codes() {
        for dt in [
            DataType::Bool,
            DataType::Int64,
            DataType::VarChar,
            DataType::Json,
            DataType::FloatVector,
            DataType::SparseFloatVector,
        ] {
            assert_eq!(DataType::from_code(dt.code()), Some(dt));
        }
        assert_eq!(DataType::from_code(5), Some(DataType::Int64));
        assert_eq!(DataType::from_code(21), Some(DataType::VarChar));
        assert_eq!(DataType::from_code(999), None);
    }

    #[test]
    fn test_primary_key_set_value() {
        let mut pk = PrimaryKey::for_type(DataType::Int64).unwrap();
        assert!(pk.set_value(&Value::Int64(42)));
        assert_eq!(pk, PrimaryKey::Int64(42));
        assert!(!pk.set_value(&Value::String("x".into())));
        assert_eq!(pk, PrimaryKey::Int64(42));

        let mut pk = PrimaryKey::for_type(DataType::VarChar).unwrap();
        assert!(pk.set_value(&Value::String("abc".into())));
        assert_eq!(pk.to_string(), "abc");
    }

    #[test]
    fn test_unsupported_primary_key_type() {
        let err = PrimaryKey::for_type(DataType::Float).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_schema_lookup_and_serde() {
        let schema = CollectionSchema {
            name: "docs".to_string(),
            fields: vec![
                FieldSchema::new(100, "id", DataType::Int64).primary_key(),
                FieldSchema::new(101, "vec", DataType::FloatVector).with_dim(4),
            ],
        };
        assert_eq!(schema.primary_key().map(|f| f.field_id), Some(100));
        assert_eq!(schema.field_by_name("vec").and_then(|f| f.dim), Some(4));

        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("\"FloatVector\""));
        let back: CollectionSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_segment_defaults_from_json() {
        let segment: Segment = serde_json::from_str(
            r#"{"id": 7, "collection_id": 1, "deltalogs": [{"field_id": 0, "binlogs": [{"log_path": "d/1"}]}]}"#,
        )
        .unwrap();
        assert_eq!(segment.storage_version, 0);
        assert_eq!(segment.level, SegmentLevel::Legacy);
        assert_eq!(segment.state, SegmentState::Flushed);
        assert_eq!(segment.delta_paths().collect::<Vec<_>>(), vec!["d/1"]);
    }
}
