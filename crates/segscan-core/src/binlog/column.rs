//! Whole-column reads of legacy binlog events

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, FixedSizeBinaryArray, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, StringArray,
};

use crate::codec::decode_f32s;
use crate::models::DataType;
use crate::{Error, Result};

/// Non-null values of one event column, typed by its logical type
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
    /// Array, JSON and sparse vector cells as stored
    Bytes(Vec<Vec<u8>>),
    /// Binary, float16 and bfloat16 vectors as fixed-width byte rows
    FixedBytes(Vec<Vec<u8>>),
    FloatVector(Vec<Vec<f32>>),
}

impl ColumnData {
    /// Collect the arrays of one column into typed values
    ///
    /// Int8/Int16 columns may be stored physically as Int32; they are
    /// narrowed here.
    pub fn from_arrays(data_type: DataType, arrays: &[ArrayRef]) -> Result<Self> {
        let column = match data_type {
            DataType::Bool => ColumnData::Bool(collect::<BooleanArray, _>(arrays, data_type, |a, i| {
                a.value(i)
            })?),
            DataType::Int8 => ColumnData::Int8(narrow(arrays, data_type)?),
            DataType::Int16 => ColumnData::Int16(narrow(arrays, data_type)?),
            DataType::Int32 => {
                ColumnData::Int32(collect::<Int32Array, _>(arrays, data_type, |a, i| a.value(i))?)
            }
            DataType::Int64 => {
                ColumnData::Int64(collect::<Int64Array, _>(arrays, data_type, |a, i| a.value(i))?)
            }
            DataType::Float => {
                ColumnData::Float(collect::<Float32Array, _>(arrays, data_type, |a, i| a.value(i))?)
            }
            DataType::Double => {
                ColumnData::Double(collect::<Float64Array, _>(arrays, data_type, |a, i| a.value(i))?)
            }
            DataType::String | DataType::VarChar => ColumnData::String(strings(arrays, data_type)?),
            DataType::Array | DataType::Json | DataType::SparseFloatVector => ColumnData::Bytes(
                collect::<BinaryArray, _>(arrays, data_type, |a, i| a.value(i).to_vec())?,
            ),
            DataType::BinaryVector | DataType::Float16Vector | DataType::BFloat16Vector => {
                ColumnData::FixedBytes(collect::<FixedSizeBinaryArray, _>(
                    arrays,
                    data_type,
                    |a, i| a.value(i).to_vec(),
                )?)
            }
            DataType::FloatVector => ColumnData::FloatVector(collect::<FixedSizeBinaryArray, _>(
                arrays,
                data_type,
                |a, i| decode_f32s(a.value(i)),
            )?),
        };
        Ok(column)
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Double(v) => v.len(),
            ColumnData::String(v) => v.len(),
            ColumnData::Bytes(v) | ColumnData::FixedBytes(v) => v.len(),
            ColumnData::FloatVector(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collect<A: Array + 'static, T>(
    arrays: &[ArrayRef],
    data_type: DataType,
    value: impl Fn(&A, usize) -> T,
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(arrays.iter().map(|a| a.len()).sum());
    for array in arrays {
        let typed = array.as_any().downcast_ref::<A>().ok_or_else(|| mismatch(array, data_type))?;
        out.extend((0..typed.len()).filter(|i| typed.is_valid(*i)).map(|i| value(typed, i)));
    }
    Ok(out)
}

/// Small integers, possibly written through an Int32 physical column
///
/// Values outside the logical type's range are a decode error.
fn narrow<T>(arrays: &[ArrayRef], data_type: DataType) -> Result<Vec<T>>
where
    T: TryFrom<i64>,
{
    let mut out = Vec::new();
    for array in arrays {
        let values: Vec<i64> = if let Some(typed) = array.as_any().downcast_ref::<Int32Array>() {
            (0..typed.len()).filter(|i| typed.is_valid(*i)).map(|i| i64::from(typed.value(i))).collect()
        } else if let Some(typed) = array.as_any().downcast_ref::<Int8Array>() {
            (0..typed.len()).filter(|i| typed.is_valid(*i)).map(|i| i64::from(typed.value(i))).collect()
        } else if let Some(typed) = array.as_any().downcast_ref::<Int16Array>() {
            (0..typed.len()).filter(|i| typed.is_valid(*i)).map(|i| i64::from(typed.value(i))).collect()
        } else {
            return Err(mismatch(array, data_type));
        };
        for v in values {
            out.push(T::try_from(v).map_err(|_| {
                Error::decode(format!("value {} out of range for {}", v, data_type))
            })?);
        }
    }
    Ok(out)
}

fn strings(arrays: &[ArrayRef], data_type: DataType) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for array in arrays {
        if let Some(typed) = array.as_any().downcast_ref::<StringArray>() {
            out.extend(typed.iter().flatten().map(str::to_string));
        } else if let Some(typed) = array.as_any().downcast_ref::<BinaryArray>() {
            for bytes in typed.iter().flatten() {
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| Error::decode(format!("invalid utf-8 in {} column: {}", data_type, e)))?;
                out.push(s.to_string());
            }
        } else {
            return Err(mismatch(array, data_type));
        }
    }
    Ok(out)
}

fn mismatch(array: &ArrayRef, data_type: DataType) -> Error {
    Error::decode(format!(
        "column of arrow type {} cannot hold {} values",
        array.data_type(),
        data_type
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_int8_narrowed_from_int32() {
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(Int32Array::from(vec![1, -2])),
            Arc::new(Int32Array::from(vec![Some(3), None])),
        ];
        let column = ColumnData::from_arrays(DataType::Int8, &arrays).unwrap();
        assert_eq!(column, ColumnData::Int8(vec![1, -2, 3]));
    }

    #[test]
    fn test_out_of_range_int32_is_rejected() {
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![1, 300]))];
        let err = ColumnData::from_arrays(DataType::Int8, &arrays).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        assert!(err.to_string().contains("value 300 out of range"));

        let arrays: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![40_000]))];
        assert!(ColumnData::from_arrays(DataType::Int16, &arrays).is_err());
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int32Array::from(vec![-32_768]))];
        assert_eq!(
            ColumnData::from_arrays(DataType::Int16, &arrays).unwrap(),
            ColumnData::Int16(vec![-32_768])
        );
    }

    #[test]
    fn test_float_vectors() {
        let rows: Vec<Vec<u8>> = vec![
            [1.0f32, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect(),
            [3.0f32, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect(),
        ];
        let array = FixedSizeBinaryArray::try_from_iter(rows.into_iter()).unwrap();
        let column = ColumnData::from_arrays(DataType::FloatVector, &[Arc::new(array) as ArrayRef]).unwrap();
        assert_eq!(column, ColumnData::FloatVector(vec![vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert_eq!(column.len(), 2);
    }

    #[test]
    fn test_strings_from_binary() {
        let array = BinaryArray::from(vec![b"a".as_slice(), b"bc".as_slice()]);
        let column = ColumnData::from_arrays(DataType::String, &[Arc::new(array) as ArrayRef]).unwrap();
        assert_eq!(column, ColumnData::String(vec!["a".into(), "bc".into()]));
    }

    #[test]
    fn test_type_mismatch() {
        let arrays: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![1]))];
        let err = ColumnData::from_arrays(DataType::Bool, &arrays).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
