//! Lightweight scalar values carried by constants, parameters and shaped rows.
//!
//! Providers hand rows over as JSON documents (or ordinal value lists); the
//! conversions here are the only place JSON and `Scalar` meet.

use std::cmp::Ordering;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::DataType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(#[serde(serialize_with = "write_f32", deserialize_with = "read_f32")] f32),
    F64(#[serde(serialize_with = "write_f64", deserialize_with = "read_f64")] f64),
    Str(String),
    Bin(Vec<u8>),
}

/// JSON has no NaN or infinities; they are written as these strings so
/// shape hashes keep them apart from `null` and from each other.
fn non_finite_label(v: f64) -> Option<&'static str> {
    if v.is_nan() {
        Some("NaN")
    } else if v == f64::INFINITY {
        Some("Infinity")
    } else if v == f64::NEG_INFINITY {
        Some("-Infinity")
    } else {
        None
    }
}

fn write_f64<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    match non_finite_label(*v) {
        Some(label) => s.serialize_str(label),
        None => s.serialize_f64(*v),
    }
}

fn write_f32<S: Serializer>(v: &f32, s: S) -> Result<S::Ok, S::Error> {
    match non_finite_label(*v as f64) {
        Some(label) => s.serialize_str(label),
        None => s.serialize_f32(*v),
    }
}

fn read_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Label(String),
    }
    match Repr::deserialize(d)? {
        Repr::Number(v) => Ok(v),
        Repr::Label(label) => match label.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(D::Error::custom(format!("'{}' is not a float", other))),
        },
    }
}

fn read_f32<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    read_f64(d).map(|v| v as f32)
}

impl Scalar {
    /// Runtime type of the value; `None` for `Null`, which carries no type of its own.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Scalar::Null => None,
            Scalar::Bool(_) => Some(DataType::Boolean),
            Scalar::I32(_) => Some(DataType::Int32),
            Scalar::I64(_) => Some(DataType::Int64),
            Scalar::F32(_) => Some(DataType::Float32),
            Scalar::F64(_) => Some(DataType::Float64),
            Scalar::Str(_) => Some(DataType::Utf8),
            Scalar::Bin(_) => Some(DataType::Binary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view used by comparisons across integer/float widths.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I32(v) => Some(*v as f64),
            Scalar::I64(v) => Some(*v as f64),
            Scalar::F32(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::I32(v) => Value::from(*v),
            Scalar::I64(v) => Value::from(*v),
            Scalar::F32(v) => serde_json::Number::from_f64(*v as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::F64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Bin(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
        }
    }

    /// Read a JSON node as the declared type. Values that do not fit the
    /// declared type come back as `None` so callers can report them.
    pub fn from_json_as(value: &serde_json::Value, data_type: &DataType) -> Option<Scalar> {
        use serde_json::Value;
        if value.is_null() {
            return Some(Scalar::Null);
        }
        match data_type {
            DataType::Boolean => value.as_bool().map(Scalar::Bool),
            DataType::Int32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Scalar::I32),
            DataType::Int64 | DataType::Date64 => value.as_i64().map(Scalar::I64),
            DataType::Float32 => value.as_f64().map(|v| Scalar::F32(v as f32)),
            DataType::Float64 | DataType::Decimal128 => value.as_f64().map(Scalar::F64),
            DataType::Utf8 => value.as_str().map(|s| Scalar::Str(s.to_string())),
            DataType::Binary => match value {
                Value::Array(items) => items
                    .iter()
                    .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .map(Scalar::Bin),
                _ => None,
            },
            DataType::Object => Some(Scalar::from_json(value)),
        }
    }

    /// Read a JSON node without a declared type. Objects and arrays have no
    /// scalar form and are rendered as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Scalar {
        use serde_json::Value;
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    match i32::try_from(i) {
                        Ok(small) => Scalar::I32(small),
                        Err(_) => Scalar::I64(i),
                    }
                } else {
                    Scalar::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        }
    }

    /// Text form used for document ids and partition key values.
    pub fn to_key_string(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::I32(v) => v.to_string(),
            Scalar::I64(v) => v.to_string(),
            Scalar::F32(v) => v.to_string(),
            Scalar::F64(v) => v.to_string(),
            Scalar::Str(s) => s.clone(),
            Scalar::Bin(b) => b.iter().map(|x| format!("{:02x}", x)).collect(),
        }
    }
}

/// Key values of one entity instance, totally ordered so they can index
/// identity maps (floats compare by the NaN-last rule below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyValues(pub Vec<Scalar>);

impl PartialEq for KeyValues {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValues {}

impl PartialOrd for KeyValues {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KeyValues {
    fn cmp(&self, other: &Self) -> Ordering {
        scalar_tuple_cmp(&self.0, &other.0)
    }
}

/// Compare two scalar tuples lexicographically for sorting.
pub fn scalar_tuple_cmp(a: &[Scalar], b: &[Scalar]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match scalar_cmp(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Compare two scalars for sorting.
///
/// Nulls are sorted first, numbers compare by value across widths, then
/// values of unrelated types fall back to variant order.
pub fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;

    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (I32(x), I32(y)) => x.cmp(y),
        (I64(x), I64(y)) => x.cmp(y),
        (Str(x), Str(y)) => x.cmp(y),
        (Bin(x), Bin(y)) => x.cmp(y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => float_cmp(x, y),
            _ => scalar_type_order(a).cmp(&scalar_type_order(b)),
        },
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    if x.is_nan() && y.is_nan() {
        Ordering::Equal
    } else if x.is_nan() {
        Ordering::Greater
    } else if y.is_nan() {
        Ordering::Less
    } else {
        x.partial_cmp(&y).unwrap_or(Ordering::Equal)
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I32(_) | I64(_) | F32(_) | F64(_) => 2,
        Str(_) => 3,
        Bin(_) => 4,
    }
}
