//! Typed single values used as expression literals and partition bindings.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Date64Array, Float32Array,
    Float64Array, Int8Array, Int16Array, Int32Array, Int64Array, LargeStringArray, StringArray,
    UInt8Array, UInt16Array, UInt32Array, UInt64Array, new_null_array,
};
use arrow::compute::{CastOptions, cast, cast_with_options};
use arrow::datatypes::{
    DECIMAL128_MAX_PRECISION, DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int8Type,
    Int16Type, Int32Type, Int64Type, UInt8Type, UInt16Type, UInt32Type, UInt64Type,
};
use arrow::temporal_conversions::{date32_to_datetime, date64_to_datetime};
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, DatasetResult};

const MILLISECONDS_IN_DAY: i64 = 86_400_000;

/// A single, possibly null, value of a known data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Scalar {
    /// Untyped null.
    Null,
    Boolean {
        value: Option<bool>,
    },
    Int8 {
        value: Option<i8>,
    },
    Int16 {
        value: Option<i16>,
    },
    Int32 {
        value: Option<i32>,
    },
    Int64 {
        value: Option<i64>,
    },
    UInt8 {
        value: Option<u8>,
    },
    UInt16 {
        value: Option<u16>,
    },
    UInt32 {
        value: Option<u32>,
    },
    UInt64 {
        value: Option<u64>,
    },
    Float32 {
        value: Option<f32>,
    },
    Float64 {
        value: Option<f64>,
    },
    Utf8 {
        value: Option<String>,
    },
    LargeUtf8 {
        value: Option<String>,
    },
    Binary {
        value: Option<Vec<u8>>,
    },
    Date32 {
        days: Option<i32>,
    },
    Date64 {
        milliseconds: Option<i64>,
    },
}

impl Scalar {
    /// A null of the given type.
    pub fn new_null(data_type: &DataType) -> DatasetResult<Self> {
        let scalar = match data_type {
            DataType::Null => Scalar::Null,
            DataType::Boolean => Scalar::Boolean { value: None },
            DataType::Int8 => Scalar::Int8 { value: None },
            DataType::Int16 => Scalar::Int16 { value: None },
            DataType::Int32 => Scalar::Int32 { value: None },
            DataType::Int64 => Scalar::Int64 { value: None },
            DataType::UInt8 => Scalar::UInt8 { value: None },
            DataType::UInt16 => Scalar::UInt16 { value: None },
            DataType::UInt32 => Scalar::UInt32 { value: None },
            DataType::UInt64 => Scalar::UInt64 { value: None },
            DataType::Float32 => Scalar::Float32 { value: None },
            DataType::Float64 => Scalar::Float64 { value: None },
            DataType::Utf8 => Scalar::Utf8 { value: None },
            DataType::LargeUtf8 => Scalar::LargeUtf8 { value: None },
            DataType::Binary => Scalar::Binary { value: None },
            DataType::Date32 => Scalar::Date32 { days: None },
            DataType::Date64 => Scalar::Date64 { milliseconds: None },
            DataType::Dictionary(_, value_type) => return Self::new_null(value_type),
            other => {
                return Err(DatasetError::TypeMismatch(format!(
                    "scalar values of type {} are not supported",
                    other
                )));
            }
        };
        Ok(scalar)
    }

    /// The Arrow type of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Boolean { .. } => DataType::Boolean,
            Scalar::Int8 { .. } => DataType::Int8,
            Scalar::Int16 { .. } => DataType::Int16,
            Scalar::Int32 { .. } => DataType::Int32,
            Scalar::Int64 { .. } => DataType::Int64,
            Scalar::UInt8 { .. } => DataType::UInt8,
            Scalar::UInt16 { .. } => DataType::UInt16,
            Scalar::UInt32 { .. } => DataType::UInt32,
            Scalar::UInt64 { .. } => DataType::UInt64,
            Scalar::Float32 { .. } => DataType::Float32,
            Scalar::Float64 { .. } => DataType::Float64,
            Scalar::Utf8 { .. } => DataType::Utf8,
            Scalar::LargeUtf8 { .. } => DataType::LargeUtf8,
            Scalar::Binary { .. } => DataType::Binary,
            Scalar::Date32 { .. } => DataType::Date32,
            Scalar::Date64 { .. } => DataType::Date64,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Scalar::Null => true,
            Scalar::Boolean { value } => value.is_none(),
            Scalar::Int8 { value } => value.is_none(),
            Scalar::Int16 { value } => value.is_none(),
            Scalar::Int32 { value } => value.is_none(),
            Scalar::Int64 { value } => value.is_none(),
            Scalar::UInt8 { value } => value.is_none(),
            Scalar::UInt16 { value } => value.is_none(),
            Scalar::UInt32 { value } => value.is_none(),
            Scalar::UInt64 { value } => value.is_none(),
            Scalar::Float32 { value } => value.is_none(),
            Scalar::Float64 { value } => value.is_none(),
            Scalar::Utf8 { value } | Scalar::LargeUtf8 { value } => value.is_none(),
            Scalar::Binary { value } => value.is_none(),
            Scalar::Date32 { days } => days.is_none(),
            Scalar::Date64 { milliseconds } => milliseconds.is_none(),
        }
    }

    /// Parse text into a value of the given type using Arrow's strict casts.
    pub fn parse(data_type: &DataType, text: &str) -> DatasetResult<Self> {
        let strings = StringArray::from(vec![text]);
        let options = CastOptions {
            safe: false,
            ..Default::default()
        };
        let parsed = cast_with_options(&strings, data_type, &options).map_err(|e| {
            DatasetError::ParseError(format!(
                "cannot parse '{}' as {}: {}",
                text, data_type, e
            ))
        })?;
        Self::try_from_array(parsed.as_ref(), 0)
    }

    /// Convert this value to another type. Lossy or impossible casts fail.
    pub fn cast_to(&self, data_type: &DataType) -> DatasetResult<Self> {
        if &self.data_type() == data_type {
            return Ok(self.clone());
        }
        let options = CastOptions {
            safe: false,
            ..Default::default()
        };
        let array = self.to_array(1);
        let casted = cast_with_options(&array, data_type, &options).map_err(|e| {
            DatasetError::TypeMismatch(format!("cannot cast {} to {}: {}", self, data_type, e))
        })?;
        Self::try_from_array(casted.as_ref(), 0)
    }

    /// An array repeating this value `num_rows` times.
    pub fn to_array(&self, num_rows: usize) -> ArrayRef {
        match self {
            Scalar::Null => new_null_array(&DataType::Null, num_rows),
            Scalar::Boolean { value } => Arc::new(BooleanArray::from(vec![*value; num_rows])),
            Scalar::Int8 { value } => Arc::new(Int8Array::from(vec![*value; num_rows])),
            Scalar::Int16 { value } => Arc::new(Int16Array::from(vec![*value; num_rows])),
            Scalar::Int32 { value } => Arc::new(Int32Array::from(vec![*value; num_rows])),
            Scalar::Int64 { value } => Arc::new(Int64Array::from(vec![*value; num_rows])),
            Scalar::UInt8 { value } => Arc::new(UInt8Array::from(vec![*value; num_rows])),
            Scalar::UInt16 { value } => Arc::new(UInt16Array::from(vec![*value; num_rows])),
            Scalar::UInt32 { value } => Arc::new(UInt32Array::from(vec![*value; num_rows])),
            Scalar::UInt64 { value } => Arc::new(UInt64Array::from(vec![*value; num_rows])),
            Scalar::Float32 { value } => Arc::new(Float32Array::from(vec![*value; num_rows])),
            Scalar::Float64 { value } => Arc::new(Float64Array::from(vec![*value; num_rows])),
            Scalar::Utf8 { value } => {
                Arc::new(StringArray::from(vec![value.as_deref(); num_rows]))
            }
            Scalar::LargeUtf8 { value } => {
                Arc::new(LargeStringArray::from(vec![value.as_deref(); num_rows]))
            }
            Scalar::Binary { value } => {
                Arc::new(BinaryArray::from(vec![value.as_deref(); num_rows]))
            }
            Scalar::Date32 { days } => Arc::new(Date32Array::from(vec![*days; num_rows])),
            Scalar::Date64 { milliseconds } => {
                Arc::new(Date64Array::from(vec![*milliseconds; num_rows]))
            }
        }
    }

    /// Extract the value at `index` of an array.
    pub fn try_from_array(array: &dyn Array, index: usize) -> DatasetResult<Self> {
        if index >= array.len() {
            return Err(DatasetError::Internal(format!(
                "index {} out of bounds for array of length {}",
                index,
                array.len()
            )));
        }
        if let DataType::Dictionary(_, value_type) = array.data_type() {
            let values = cast(array, value_type)?;
            return Self::try_from_array(values.as_ref(), index);
        }
        if array.is_null(index) {
            return Self::new_null(array.data_type());
        }
        let scalar = match array.data_type() {
            DataType::Null => Scalar::Null,
            DataType::Boolean => Scalar::Boolean {
                value: Some(array.as_boolean().value(index)),
            },
            DataType::Int8 => Scalar::Int8 {
                value: Some(array.as_primitive::<Int8Type>().value(index)),
            },
            DataType::Int16 => Scalar::Int16 {
                value: Some(array.as_primitive::<Int16Type>().value(index)),
            },
            DataType::Int32 => Scalar::Int32 {
                value: Some(array.as_primitive::<Int32Type>().value(index)),
            },
            DataType::Int64 => Scalar::Int64 {
                value: Some(array.as_primitive::<Int64Type>().value(index)),
            },
            DataType::UInt8 => Scalar::UInt8 {
                value: Some(array.as_primitive::<UInt8Type>().value(index)),
            },
            DataType::UInt16 => Scalar::UInt16 {
                value: Some(array.as_primitive::<UInt16Type>().value(index)),
            },
            DataType::UInt32 => Scalar::UInt32 {
                value: Some(array.as_primitive::<UInt32Type>().value(index)),
            },
            DataType::UInt64 => Scalar::UInt64 {
                value: Some(array.as_primitive::<UInt64Type>().value(index)),
            },
            DataType::Float32 => Scalar::Float32 {
                value: Some(array.as_primitive::<Float32Type>().value(index)),
            },
            DataType::Float64 => Scalar::Float64 {
                value: Some(array.as_primitive::<Float64Type>().value(index)),
            },
            DataType::Utf8 => Scalar::Utf8 {
                value: Some(array.as_string::<i32>().value(index).to_string()),
            },
            DataType::LargeUtf8 => Scalar::LargeUtf8 {
                value: Some(array.as_string::<i64>().value(index).to_string()),
            },
            DataType::Binary => Scalar::Binary {
                value: Some(array.as_binary::<i32>().value(index).to_vec()),
            },
            DataType::Date32 => Scalar::Date32 {
                days: Some(array.as_primitive::<Date32Type>().value(index)),
            },
            DataType::Date64 => Scalar::Date64 {
                milliseconds: Some(array.as_primitive::<Date64Type>().value(index)),
            },
            other => {
                return Err(DatasetError::TypeMismatch(format!(
                    "scalar values of type {} are not supported",
                    other
                )));
            }
        };
        Ok(scalar)
    }

    /// Compare two values.
    ///
    /// Returns `Ok(None)` when either side is null and a
    /// TypeMismatch when the two types have no common comparable type.
    pub fn try_cmp(&self, other: &Scalar) -> DatasetResult<Option<Ordering>> {
        let left_type = self.data_type();
        let right_type = other.data_type();
        if comparison_coercion(&left_type, &right_type).is_none() {
            return Err(DatasetError::TypeMismatch(format!(
                "cannot compare {} with {}",
                left_type, right_type
            )));
        }
        if self.is_null() || other.is_null() {
            return Ok(None);
        }
        if let (Some(l), Some(r)) = (self.as_i128(), other.as_i128()) {
            return Ok(Some(l.cmp(&r)));
        }
        if let (Some(l), Some(r)) = (self.as_f64(), other.as_f64()) {
            // Total order, as in the arrow comparison kernels: NaN sorts
            // above every number.
            return Ok(Some(l.total_cmp(&r)));
        }
        if let (Some(l), Some(r)) = (self.as_str(), other.as_str()) {
            return Ok(Some(l.cmp(r)));
        }
        if let (Some(l), Some(r)) = (self.as_date_millis(), other.as_date_millis()) {
            return Ok(Some(l.cmp(&r)));
        }
        match (self, other) {
            (Scalar::Boolean { value: Some(l) }, Scalar::Boolean { value: Some(r) }) => {
                Ok(Some(l.cmp(r)))
            }
            (Scalar::Binary { value: Some(l) }, Scalar::Binary { value: Some(r) }) => {
                Ok(Some(l.cmp(r)))
            }
            _ => Err(DatasetError::TypeMismatch(format!(
                "cannot compare {} with {}",
                left_type, right_type
            ))),
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Scalar::Int8 { value } => value.map(i128::from),
            Scalar::Int16 { value } => value.map(i128::from),
            Scalar::Int32 { value } => value.map(i128::from),
            Scalar::Int64 { value } => value.map(i128::from),
            Scalar::UInt8 { value } => value.map(i128::from),
            Scalar::UInt16 { value } => value.map(i128::from),
            Scalar::UInt32 { value } => value.map(i128::from),
            Scalar::UInt64 { value } => value.map(i128::from),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float32 { value } => value.map(f64::from),
            Scalar::Float64 { value } => *value,
            _ => self.as_i128().map(|v| v as f64),
        }
    }

    /// The string content of a `Utf8` or `LargeUtf8` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Utf8 { value } | Scalar::LargeUtf8 { value } => value.as_deref(),
            _ => None,
        }
    }

    fn as_date_millis(&self) -> Option<i64> {
        match self {
            Scalar::Date32 { days } => days.map(|d| i64::from(d) * MILLISECONDS_IN_DAY),
            Scalar::Date64 { milliseconds } => *milliseconds,
            _ => None,
        }
    }
}

/// The type both sides of a comparison are converted to, if any.
pub fn comparison_coercion(left: &DataType, right: &DataType) -> Option<DataType> {
    let left = value_type(left);
    let right = value_type(right);
    if left == right {
        return Some(left.clone());
    }
    match (left, right) {
        (DataType::Null, other) | (other, DataType::Null) => Some(other.clone()),
        (l, r) if l.is_numeric() && r.is_numeric() => {
            if l.is_floating() || r.is_floating() {
                Some(DataType::Float64)
            } else if l.is_unsigned_integer() && r.is_unsigned_integer() {
                Some(DataType::UInt64)
            } else if matches!(l, DataType::UInt64) || matches!(r, DataType::UInt64) {
                // Neither Int64 nor UInt64 holds both ranges.
                Some(DataType::Decimal128(DECIMAL128_MAX_PRECISION, 0))
            } else {
                Some(DataType::Int64)
            }
        }
        (DataType::Utf8 | DataType::LargeUtf8, DataType::Utf8 | DataType::LargeUtf8) => {
            Some(DataType::LargeUtf8)
        }
        (DataType::Date32 | DataType::Date64, DataType::Date32 | DataType::Date64) => {
            Some(DataType::Date64)
        }
        _ => None,
    }
}

/// Strip a dictionary encoding down to its value type.
pub fn value_type(data_type: &DataType) -> &DataType {
    match data_type {
        DataType::Dictionary(_, value) => value_type(value),
        other => other,
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_opt<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &Option<T>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{}", v),
                None => write!(f, "null"),
            }
        }
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Boolean { value } => write_opt(f, value),
            Scalar::Int8 { value } => write_opt(f, value),
            Scalar::Int16 { value } => write_opt(f, value),
            Scalar::Int32 { value } => write_opt(f, value),
            Scalar::Int64 { value } => write_opt(f, value),
            Scalar::UInt8 { value } => write_opt(f, value),
            Scalar::UInt16 { value } => write_opt(f, value),
            Scalar::UInt32 { value } => write_opt(f, value),
            Scalar::UInt64 { value } => write_opt(f, value),
            Scalar::Float32 { value } => write_opt(f, value),
            Scalar::Float64 { value } => write_opt(f, value),
            Scalar::Utf8 { value } | Scalar::LargeUtf8 { value } => write_opt(f, value),
            Scalar::Binary { value } => match value {
                Some(bytes) => {
                    for b in bytes {
                        write!(f, "{:02x}", b)?;
                    }
                    Ok(())
                }
                None => write!(f, "null"),
            },
            Scalar::Date32 { days } => {
                let date = days.and_then(date32_to_datetime).map(|dt| dt.date());
                write_opt(f, &date)
            }
            Scalar::Date64 { milliseconds } => {
                let date = milliseconds.and_then(date64_to_datetime).map(|dt| dt.date());
                write_opt(f, &date)
            }
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean { value: Some(value) }
    }
}

impl From<i8> for Scalar {
    fn from(value: i8) -> Self {
        Scalar::Int8 { value: Some(value) }
    }
}

impl From<i16> for Scalar {
    fn from(value: i16) -> Self {
        Scalar::Int16 { value: Some(value) }
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int32 { value: Some(value) }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int64 { value: Some(value) }
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::UInt32 { value: Some(value) }
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        Scalar::UInt64 { value: Some(value) }
    }
}

impl From<f32> for Scalar {
    fn from(value: f32) -> Self {
        Scalar::Float32 { value: Some(value) }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float64 { value: Some(value) }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Utf8 {
            value: Some(value.to_string()),
        }
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Utf8 { value: Some(value) }
    }
}
