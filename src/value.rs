use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime};
use rust_decimal::{Decimal, prelude::FromPrimitive, prelude::ToPrimitive};
use uuid::Uuid;

use crate::schema::Schema;

/// A runtime value flowing through query evaluation.
///
/// The scalar set mirrors the semantic type model: distinct integer widths,
/// two float widths plus high-precision decimals, and the OData literal
/// types (guid, datetime, datetimeoffset, time, binary). Rows are `Record`
/// values checked against a schema; collection-typed members are
/// `Sequence` values.
///
/// `Null` stands in for the absent value of any type; the evaluator
/// null-propagates arithmetic and treats relational comparisons with null
/// as false.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    String(String),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Guid(Uuid),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Duration(Duration),
    Binary(Vec<u8>),
    Record(Record),
    Sequence(Vec<Value>),
}

/// A row: field values in schema order. Field storage is shared so cloning
/// a row while filtering and sorting stays cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub schema: Arc<Schema>,
    pub fields: Arc<Vec<Value>>,
}

impl Record {
    pub fn new(schema: Arc<Schema>, fields: Vec<Value>) -> Record {
        Record {
            schema,
            fields: Arc::new(fields),
        }
    }

    pub fn field(&self, index: usize) -> &Value {
        &self.fields[index]
    }
}

impl Value {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Int8(_) => "sbyte",
            Value::Int16(_) => "short",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::UInt8(_) => "byte",
            Value::UInt16(_) => "ushort",
            Value::UInt32(_) => "uint",
            Value::UInt64(_) => "ulong",
            Value::Float32(_) => "float",
            Value::Float64(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Guid(_) => "guid",
            Value::DateTime(_) => "datetime",
            Value::DateTimeOffset(_) => "datetimeoffset",
            Value::Duration(_) => "time",
            Value::Binary(_) => "binary",
            Value::Record(_) => "record",
            Value::Sequence(_) => "sequence",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Signed integral view, when the value is a signed integer or an
    /// unsigned one that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(n) => Some(i64::from(*n)),
            Value::Int16(n) => Some(i64::from(*n)),
            Value::Int32(n) => Some(i64::from(*n)),
            Value::Int64(n) => Some(*n),
            Value::UInt8(n) => Some(i64::from(*n)),
            Value::UInt16(n) => Some(i64::from(*n)),
            Value::UInt32(n) => Some(i64::from(*n)),
            Value::UInt64(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(n) => Some(f64::from(*n)),
            Value::Float64(n) => Some(*n),
            Value::Decimal(d) => d.to_f64(),
            Value::UInt64(n) => Some(*n as f64),
            other => other.as_i64().map(|n| n as f64),
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Float32(n) => Decimal::from_f32(*n),
            Value::Float64(n) => Decimal::from_f64(*n),
            Value::UInt64(n) => Some(Decimal::from(*n)),
            other => other.as_i64().map(Decimal::from),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used by the `&` concatenation operator, which boxes
    /// non-string operands into their display representation.
    pub fn concat_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s.clone(),
            Value::Int8(n) => n.to_string(),
            Value::Int16(n) => n.to_string(),
            Value::Int32(n) => n.to_string(),
            Value::Int64(n) => n.to_string(),
            Value::UInt8(n) => n.to_string(),
            Value::UInt16(n) => n.to_string(),
            Value::UInt32(n) => n.to_string(),
            Value::UInt64(n) => n.to_string(),
            Value::Float32(n) => n.to_string(),
            Value::Float64(n) => n.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Guid(g) => g.to_string(),
            Value::DateTime(d) => d.to_string(),
            Value::DateTimeOffset(d) => d.to_rfc3339(),
            Value::Duration(d) => format_duration(*d),
            Value::Binary(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
            other => format!("{:?}", other),
        }
    }

    /// Total order used by sorting and the relational operators. `Null`
    /// sorts before everything else; values of the same scalar type compare
    /// naturally. Operand promotion guarantees both sides share a type by
    /// the time this runs, so mismatched variants fall back through the
    /// widest numeric view.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Int8(a), Value::Int8(b)) => a.cmp(b),
            (Value::Int16(a), Value::Int16(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::UInt8(a), Value::UInt8(b)) => a.cmp(b),
            (Value::UInt16(a), Value::UInt16(b)) => a.cmp(b),
            (Value::UInt32(a), Value::UInt32(b)) => a.cmp(b),
            (Value::UInt64(a), Value::UInt64(b)) => a.cmp(b),
            (Value::Float32(a), Value::Float32(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Float64(a), Value::Float64(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            (Value::Guid(a), Value::Guid(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::DateTimeOffset(a), Value::DateTimeOffset(b)) => a.cmp(b),
            (Value::Duration(a), Value::Duration(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        }
    }
}

fn format_duration(d: Duration) -> String {
    let total = d.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    format!(
        "{}{:02}:{:02}:{:02}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[test]
fn test_null_sorts_first() {
    assert_eq!(Value::Null.compare(&Value::Int32(0)), Ordering::Less);
    assert_eq!(Value::Int32(0).compare(&Value::Null), Ordering::Greater);
    assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
}

#[test]
fn test_concat_text_boxes_scalars() {
    assert_eq!(Value::Int32(7).concat_text(), "7");
    assert_eq!(Value::Bool(true).concat_text(), "true");
    assert_eq!(Value::Null.concat_text(), "");
}
