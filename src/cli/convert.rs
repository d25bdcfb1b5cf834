//! Convert evaluated row values back to JSON for output.

use crate::value::Value;

/// Renders a result row set as a JSON array.
pub fn rows_to_json(rows: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(rows.iter().map(value_to_json).collect())
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::{json, Value as Json};
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::String(s) => json!(s),
        Value::Int8(n) => json!(n),
        Value::Int16(n) => json!(n),
        Value::Int32(n) => json!(n),
        Value::Int64(n) => json!(n),
        Value::UInt8(n) => json!(n),
        Value::UInt16(n) => json!(n),
        Value::UInt32(n) => json!(n),
        Value::UInt64(n) => json!(n),
        Value::Float32(n) => json!(n),
        Value::Float64(n) => json!(n),
        // Types JSON has no spelling for render as their text form.
        Value::Decimal(_)
        | Value::Guid(_)
        | Value::DateTime(_)
        | Value::DateTimeOffset(_)
        | Value::Duration(_)
        | Value::Binary(_) => json!(value.concat_text()),
        Value::Sequence(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Record(rec) => {
            let mut map = serde_json::Map::new();
            for (field, value) in rec.schema.fields().iter().zip(rec.fields.iter()) {
                map.insert(field.name.clone(), value_to_json(value));
            }
            Json::Object(map)
        }
    }
}
