//! Typed value codec
//!
//! Maps every logical [`DataType`] to its Arrow storage type and converts
//! single cells between Arrow arrays and dynamic [`Value`]s. The registry is
//! built explicitly and shared by reference; there is no process-global table.
//!
//! Null handling is uniform: a null cell always deserializes to
//! `Some(Value::Null)` and `Value::Null` always serializes to a null slot,
//! whatever the column's declared nullability. `None`/`false` is reserved for
//! genuine type mismatches.

use arrow::array::{
    make_builder, Array, ArrayBuilder, BinaryArray, BinaryBuilder, BooleanArray, BooleanBuilder,
    FixedSizeBinaryArray, FixedSizeBinaryBuilder, Float32Array, Float32Builder, Float64Array,
    Float64Builder, Int16Array, Int16Builder, Int32Array, Int32Builder, Int64Array, Int64Builder,
    Int8Array, Int8Builder, StringArray, StringBuilder,
};
use arrow::datatypes::DataType as ArrowDataType;
use std::collections::HashMap;

use crate::models::{DataType, Value};

/// Conversion entry for one logical type
#[derive(Clone, Copy)]
pub struct Codec {
    /// Arrow storage type; vector types size their fixed width from `dim`
    /// and yield `None` when that width does not fit an Arrow type
    pub arrow_type: fn(dim: usize) -> Option<ArrowDataType>,
    /// Read cell `idx`; `None` on type mismatch
    pub deserialize: fn(array: &dyn Array, idx: usize) -> Option<Value>,
    /// Append a value; `false` on type mismatch
    pub serialize: fn(builder: &mut dyn ArrayBuilder, value: &Value) -> bool,
}

/// Registry of codecs keyed by logical type
pub struct CodecRegistry {
    codecs: HashMap<DataType, Codec>,
}

impl CodecRegistry {
    /// Build the registry with an entry for every supported type
    pub fn new() -> Self {
        let mut codecs = HashMap::new();

        codecs.insert(
            DataType::Bool,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Boolean),
                deserialize: |a, i| read_cell::<BooleanArray>(a, i, |arr| Value::Bool(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<BooleanBuilder>(b, v, |builder, v| match v {
                        Value::Bool(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Int8,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Int8),
                deserialize: |a, i| read_cell::<Int8Array>(a, i, |arr| Value::Int8(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<Int8Builder>(b, v, |builder, v| match v {
                        Value::Int8(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Int16,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Int16),
                deserialize: |a, i| read_cell::<Int16Array>(a, i, |arr| Value::Int16(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<Int16Builder>(b, v, |builder, v| match v {
                        Value::Int16(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Int32,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Int32),
                deserialize: |a, i| read_cell::<Int32Array>(a, i, |arr| Value::Int32(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<Int32Builder>(b, v, |builder, v| match v {
                        Value::Int32(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Int64,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Int64),
                deserialize: |a, i| read_cell::<Int64Array>(a, i, |arr| Value::Int64(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<Int64Builder>(b, v, |builder, v| match v {
                        Value::Int64(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Float,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Float32),
                deserialize: |a, i| read_cell::<Float32Array>(a, i, |arr| Value::Float(arr.value(i))),
                serialize: |b, v| {
                    write_cell::<Float32Builder>(b, v, |builder, v| match v {
                        Value::Float(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );
        codecs.insert(
            DataType::Double,
            Codec {
                arrow_type: |_| Some(ArrowDataType::Float64),
                deserialize: |a, i| {
                    read_cell::<Float64Array>(a, i, |arr| Value::Double(arr.value(i)))
                },
                serialize: |b, v| {
                    write_cell::<Float64Builder>(b, v, |builder, v| match v {
                        Value::Double(v) => {
                            builder.append_value(*v);
                            true
                        }
                        _ => false,
                    })
                },
            },
        );

        let string_codec = Codec {
            arrow_type: |_| Some(ArrowDataType::Utf8),
            deserialize: |a, i| {
                read_cell::<StringArray>(a, i, |arr| Value::String(arr.value(i).to_string()))
            },
            serialize: |b, v| {
                write_cell::<StringBuilder>(b, v, |builder, v| match v {
                    Value::String(v) => {
                        builder.append_value(v);
                        true
                    }
                    _ => false,
                })
            },
        };
        codecs.insert(DataType::String, string_codec);
        codecs.insert(DataType::VarChar, string_codec);

        // Array cells are kept as their serialized bytes; nothing here needs
        // the decoded element list.
        let bytes_codec = Codec {
            arrow_type: |_| Some(ArrowDataType::Binary),
            deserialize: |a, i| {
                read_cell::<BinaryArray>(a, i, |arr| Value::Bytes(arr.value(i).to_vec()))
            },
            serialize: |b, v| {
                write_cell::<BinaryBuilder>(b, v, |builder, v| match v {
                    Value::Bytes(v) => {
                        builder.append_value(v);
                        true
                    }
                    _ => false,
                })
            },
        };
        codecs.insert(DataType::Array, bytes_codec);
        codecs.insert(DataType::Json, bytes_codec);
        codecs.insert(DataType::SparseFloatVector, bytes_codec);

        codecs.insert(
            DataType::BinaryVector,
            Codec {
                arrow_type: |dim| fixed_width(dim.checked_add(7).map(|bits| bits / 8)),
                deserialize: fixed_size_bytes,
                serialize: append_fixed_size_bytes,
            },
        );
        codecs.insert(
            DataType::Float16Vector,
            Codec {
                arrow_type: |dim| fixed_width(dim.checked_mul(2)),
                deserialize: fixed_size_bytes,
                serialize: append_fixed_size_bytes,
            },
        );
        codecs.insert(
            DataType::BFloat16Vector,
            Codec {
                arrow_type: |dim| fixed_width(dim.checked_mul(2)),
                deserialize: fixed_size_bytes,
                serialize: append_fixed_size_bytes,
            },
        );
        codecs.insert(
            DataType::FloatVector,
            Codec {
                arrow_type: |dim| fixed_width(dim.checked_mul(4)),
                deserialize: |a, i| {
                    read_cell::<FixedSizeBinaryArray>(a, i, |arr| {
                        Value::FloatVector(decode_f32s(arr.value(i)))
                    })
                },
                serialize: |b, v| {
                    write_cell::<FixedSizeBinaryBuilder>(b, v, |builder, v| match v {
                        Value::FloatVector(v) => {
                            let bytes: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
                            builder.append_value(bytes).is_ok()
                        }
                        _ => false,
                    })
                },
            },
        );

        Self { codecs }
    }

    pub fn get(&self, data_type: DataType) -> Option<&Codec> {
        self.codecs.get(&data_type)
    }

    /// Arrow storage type of a logical type; `None` for an unknown type or
    /// a vector too wide to store
    pub fn arrow_type(&self, data_type: DataType, dim: usize) -> Option<ArrowDataType> {
        self.get(data_type).and_then(|codec| (codec.arrow_type)(dim))
    }

    /// Read one cell; `None` if the type is unknown or the array does not match it
    pub fn deserialize(&self, data_type: DataType, array: &dyn Array, idx: usize) -> Option<Value> {
        self.get(data_type)
            .and_then(|codec| (codec.deserialize)(array, idx))
    }

    /// Append one value; `false` if the type is unknown or the value does not match it
    pub fn serialize(&self, data_type: DataType, builder: &mut dyn ArrayBuilder, value: &Value) -> bool {
        self.get(data_type)
            .map(|codec| (codec.serialize)(builder, value))
            .unwrap_or(false)
    }

    /// A fresh builder for the storage type of `data_type`
    pub fn builder(
        &self,
        data_type: DataType,
        dim: usize,
        capacity: usize,
    ) -> Option<Box<dyn ArrayBuilder>> {
        self.arrow_type(data_type, dim)
            .map(|arrow_type| make_builder(&arrow_type, capacity))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn fixed_width(bytes: Option<usize>) -> Option<ArrowDataType> {
    bytes
        .and_then(|n| i32::try_from(n).ok())
        .map(ArrowDataType::FixedSizeBinary)
}

/// Decode little-endian packed f32 values
pub(crate) fn decode_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn read_cell<'a, A: Array + 'static>(
    array: &'a dyn Array,
    idx: usize,
    read: impl FnOnce(&'a A) -> Value,
) -> Option<Value> {
    if idx >= array.len() {
        return None;
    }
    if array.is_null(idx) {
        return Some(Value::Null);
    }
    array.as_any().downcast_ref::<A>().map(read)
}

fn write_cell<B: ArrayBuilder + AppendNull>(
    builder: &mut dyn ArrayBuilder,
    value: &Value,
    append: impl FnOnce(&mut B, &Value) -> bool,
) -> bool {
    let Some(builder) = builder.as_any_mut().downcast_mut::<B>() else {
        return false;
    };
    if value.is_null() {
        builder.push_null();
        return true;
    }
    append(builder, value)
}

fn fixed_size_bytes(array: &dyn Array, idx: usize) -> Option<Value> {
    read_cell::<FixedSizeBinaryArray>(array, idx, |arr| Value::Bytes(arr.value(idx).to_vec()))
}

fn append_fixed_size_bytes(builder: &mut dyn ArrayBuilder, value: &Value) -> bool {
    write_cell::<FixedSizeBinaryBuilder>(builder, value, |builder, v| match v {
        Value::Bytes(v) => builder.append_value(v).is_ok(),
        _ => false,
    })
}

trait AppendNull {
    fn push_null(&mut self);
}

macro_rules! impl_append_null {
    ($($builder:ty),* $(,)?) => {
        $(impl AppendNull for $builder {
            fn push_null(&mut self) {
                self.append_null();
            }
        })*
    };
}

impl_append_null!(
    BooleanBuilder,
    Int8Builder,
    Int16Builder,
    Int32Builder,
    Int64Builder,
    Float32Builder,
    Float64Builder,
    StringBuilder,
    BinaryBuilder,
    FixedSizeBinaryBuilder,
);

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::ArrayRef;
    use std::sync::Arc;

    #[test]
    fn test_null_cell_deserializes_to_null() {
        let registry = CodecRegistry::new();
        let array: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None, Some(3)]));

        assert_eq!(
            registry.deserialize(DataType::Int64, array.as_ref(), 0),
            Some(Value::Int64(1))
        );
        assert_eq!(
            registry.deserialize(DataType::Int64, array.as_ref(), 1),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_null_cell_ignores_type_mismatch() {
        let registry = CodecRegistry::new();
        let array: ArrayRef = Arc::new(Int32Array::from(vec![None, Some(2)]));

        // wrong column type, but the null check comes first
        assert_eq!(
            registry.deserialize(DataType::VarChar, array.as_ref(), 0),
            Some(Value::Null)
        );
        assert_eq!(registry.deserialize(DataType::VarChar, array.as_ref(), 1), None);
    }

    #[test]
    fn test_out_of_range_is_mismatch() {
        let registry = CodecRegistry::new();
        let array: ArrayRef = Arc::new(BooleanArray::from(vec![true]));
        assert_eq!(registry.deserialize(DataType::Bool, array.as_ref(), 5), None);
    }

    #[test]
    fn test_float_vector_through_builder() {
        let registry = CodecRegistry::new();
        let mut builder = registry.builder(DataType::FloatVector, 3, 2).unwrap();

        assert!(registry.serialize(
            DataType::FloatVector,
            builder.as_mut(),
            &Value::FloatVector(vec![1.0, -2.5, 3.25])
        ));
        assert!(registry.serialize(DataType::FloatVector, builder.as_mut(), &Value::Null));
        // wrong dimension is rejected by the fixed-width builder
        assert!(!registry.serialize(
            DataType::FloatVector,
            builder.as_mut(),
            &Value::FloatVector(vec![1.0])
        ));

        let array = builder.finish();
        assert_eq!(array.data_type(), &ArrowDataType::FixedSizeBinary(12));
        assert_eq!(array.len(), 2);
        assert_eq!(
            registry.deserialize(DataType::FloatVector, array.as_ref(), 0),
            Some(Value::FloatVector(vec![1.0, -2.5, 3.25]))
        );
        assert_eq!(
            registry.deserialize(DataType::FloatVector, array.as_ref(), 1),
            Some(Value::Null)
        );
    }

    #[test]
    fn test_serialize_type_mismatch() {
        let registry = CodecRegistry::new();
        let mut builder = registry.builder(DataType::Int64, 0, 1).unwrap();
        assert!(!registry.serialize(DataType::Int64, builder.as_mut(), &Value::Int32(1)));
        // builder of another type
        assert!(!registry.serialize(DataType::VarChar, builder.as_mut(), &Value::String("a".into())));
        assert_eq!(builder.len(), 0);
    }

    #[test]
    fn test_vector_widths() {
        let registry = CodecRegistry::new();
        assert_eq!(
            registry.arrow_type(DataType::BinaryVector, 9),
            Some(ArrowDataType::FixedSizeBinary(2))
        );
        assert_eq!(
            registry.arrow_type(DataType::Float16Vector, 8),
            Some(ArrowDataType::FixedSizeBinary(16))
        );
        assert_eq!(
            registry.arrow_type(DataType::BFloat16Vector, 8),
            Some(ArrowDataType::FixedSizeBinary(16))
        );
        assert_eq!(
            registry.arrow_type(DataType::FloatVector, 8),
            Some(ArrowDataType::FixedSizeBinary(32))
        );
        assert_eq!(registry.arrow_type(DataType::Json, 0), Some(ArrowDataType::Binary));
    }

    #[test]
    fn test_oversized_vector_dim() {
        let registry = CodecRegistry::new();
        let dim = i32::MAX as usize;
        assert_eq!(registry.arrow_type(DataType::FloatVector, dim), None);
        assert_eq!(registry.arrow_type(DataType::Float16Vector, dim), None);
        assert_eq!(registry.arrow_type(DataType::BinaryVector, usize::MAX), None);
        assert!(registry.builder(DataType::FloatVector, dim, 1).is_none());
        // the widest binary vector that still fits
        assert_eq!(
            registry.arrow_type(DataType::BinaryVector, dim),
            Some(ArrowDataType::FixedSizeBinary(i32::MAX / 8 + 1))
        );
    }

    #[test]
    fn test_string_and_json_cells() {
        let registry = CodecRegistry::new();
        let strings: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        assert_eq!(
            registry.deserialize(DataType::VarChar, strings.as_ref(), 0),
            Some(Value::String("a".into()))
        );

        let mut builder = registry.builder(DataType::Json, 0, 1).unwrap();
        assert!(registry.serialize(
            DataType::Json,
            builder.as_mut(),
            &Value::Bytes(br#"{"a":1}"#.to_vec())
        ));
        let json = builder.finish();
        assert_eq!(
            registry.deserialize(DataType::Json, json.as_ref(), 0),
            Some(Value::Bytes(br#"{"a":1}"#.to_vec()))
        );
    }
}
