//! Closed schema descriptions for queryable element types.
//!
//! The parser never reflects over host types at runtime: each element type
//! is described once by a [`Schema`] (field names and semantic types), and
//! identifier resolution is a single case-insensitive lookup against it.
//! Enumerations are described the same way by [`EnumDef`].

use std::sync::Arc;

use crate::ast::types::{Ty, TyKind};
use crate::value::{Record, Value};

/// A named field of a record schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: Ty,
}

impl Field {
    pub fn new(name: &str, ty: Ty) -> Field {
        Field {
            name: name.to_string(),
            ty,
        }
    }
}

/// The element-type descriptor for a queryable source: an ordered list of
/// typed fields. Field lookup is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: &str, fields: Vec<Field>) -> Arc<Schema> {
        Arc::new(Schema {
            name: name.to_string(),
            fields,
        })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Case-insensitive field lookup, returning the field's position and
    /// descriptor.
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name.eq_ignore_ascii_case(name))
    }

    /// The row type described by this schema.
    pub fn ty(self: &Arc<Self>) -> Ty {
        Ty::new(TyKind::Record(self.clone()))
    }
}

/// A named enumeration over an underlying integral kind.
///
/// String literals promote to enum constants by member name, integer
/// literals by member value; comparisons convert enum operands to the
/// underlying kind before promotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    pub name: String,
    pub underlying: TyKind,
    members: Vec<(String, i64)>,
}

impl EnumDef {
    pub fn new(name: &str, members: Vec<(&str, i64)>) -> Arc<EnumDef> {
        Arc::new(EnumDef {
            name: name.to_string(),
            underlying: TyKind::Int32,
            members: members
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        })
    }

    /// Case-insensitive member lookup by name.
    pub fn member(&self, name: &str) -> Option<i64> {
        self.members
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    pub fn members(&self) -> &[(String, i64)] {
        &self.members
    }
}

/// Errors raised while inferring a schema from JSON rows or converting rows
/// against one.
#[derive(Debug, Clone)]
pub enum SchemaError {
    /// The row set was not an array of objects.
    ExpectedObjects,
    /// A field held irreconcilable value kinds across rows.
    IncompatibleField(String),
    /// A row value did not match the schema's type for the field.
    TypeMismatch { field: String, found: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::ExpectedObjects => {
                write!(f, "expected a JSON array of objects")
            }
            SchemaError::IncompatibleField(name) => {
                write!(f, "field '{}' holds incompatible value kinds", name)
            }
            SchemaError::TypeMismatch { field, found } => {
                write!(f, "field '{}' does not accept a {} value", field, found)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Infers a [`Schema`] from a JSON array of objects: the union of keys in
/// first-appearance order, each typed by the values observed for it. A key
/// that is missing or null in some rows becomes nullable (value kinds) or
/// stays reference-typed (strings, arrays).
pub fn infer_schema(name: &str, rows: &[serde_json::Value]) -> Result<Arc<Schema>, SchemaError> {
    let mut names: Vec<String> = Vec::new();
    let mut tys: Vec<Option<Ty>> = Vec::new();
    let mut seen: Vec<usize> = Vec::new();

    for row in rows {
        let obj = row.as_object().ok_or(SchemaError::ExpectedObjects)?;
        for (key, value) in obj {
            let slot = match names.iter().position(|n| n == key) {
                Some(i) => i,
                None => {
                    names.push(key.clone());
                    tys.push(None);
                    seen.push(0);
                    names.len() - 1
                }
            };
            if value.is_null() {
                continue;
            }
            seen[slot] += 1;
            if let Some(t) = infer_value_ty(value, key)? {
                tys[slot] = Some(match tys[slot].take() {
                    None => t,
                    Some(prev) => merge_tys(&prev, &t)
                        .ok_or_else(|| SchemaError::IncompatibleField(key.clone()))?,
                });
            }
        }
    }

    let mut fields = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        // A key that only ever held null defaults to string.
        let mut ty = tys[i].clone().unwrap_or(Ty::new(TyKind::String));
        if seen[i] < rows.len() && !ty.is_reference() {
            ty = ty.as_nullable();
        }
        fields.push(Field::new(name, ty));
    }
    Ok(Schema::new(name, fields))
}

fn infer_value_ty(value: &serde_json::Value, key: &str) -> Result<Option<Ty>, SchemaError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Bool(_) => Ok(Some(Ty::new(TyKind::Bool))),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i64::from(i32::MIN) && i <= i64::from(i32::MAX) {
                    Ok(Some(Ty::new(TyKind::Int32)))
                } else {
                    Ok(Some(Ty::new(TyKind::Int64)))
                }
            } else {
                Ok(Some(Ty::new(TyKind::Float64)))
            }
        }
        serde_json::Value::String(_) => Ok(Some(Ty::new(TyKind::String))),
        serde_json::Value::Array(items) => {
            let mut elem: Option<Ty> = None;
            for item in items {
                if let Some(t) = infer_value_ty(item, key)? {
                    elem = Some(match elem {
                        None => t,
                        Some(prev) => merge_tys(&prev, &t)
                            .ok_or_else(|| SchemaError::IncompatibleField(key.to_string()))?,
                    });
                }
            }
            let elem = elem.unwrap_or(Ty::new(TyKind::String));
            Ok(Some(Ty::new(TyKind::Sequence(Box::new(elem)))))
        }
        serde_json::Value::Object(_) => {
            let nested = infer_schema(key, std::slice::from_ref(value))?;
            Ok(Some(nested.ty()))
        }
    }
}

fn merge_tys(a: &Ty, b: &Ty) -> Option<Ty> {
    use TyKind::*;
    if a == b {
        return Some(a.clone());
    }
    let nullable = a.nullable || b.nullable;
    let kind = match (&a.kind, &b.kind) {
        (Int32, Int64) | (Int64, Int32) => Int64,
        (Int32, Float64) | (Float64, Int32) => Float64,
        (Int64, Float64) | (Float64, Int64) => Float64,
        (Record(x), Record(y)) => {
            // Nested objects must agree field-for-field.
            if x == y {
                Record(x.clone())
            } else {
                return None;
            }
        }
        _ => return None,
    };
    let mut ty = Ty::new(kind);
    if nullable {
        ty = ty.as_nullable();
    }
    Some(ty)
}

/// Converts a JSON array of objects into [`Value::Record`] rows for the
/// given schema. Missing keys and JSON nulls become [`Value::Null`].
pub fn rows_from_json(
    schema: &Arc<Schema>,
    rows: &[serde_json::Value],
) -> Result<Vec<Value>, SchemaError> {
    rows.iter()
        .map(|row| {
            let obj = row.as_object().ok_or(SchemaError::ExpectedObjects)?;
            let fields = schema
                .fields()
                .iter()
                .map(|f| match obj.get(&f.name) {
                    None | Some(serde_json::Value::Null) => Ok(Value::Null),
                    Some(v) => json_to_value(v, &f.ty, &f.name),
                })
                .collect::<Result<Vec<Value>, SchemaError>>()?;
            Ok(Value::Record(Record::new(schema.clone(), fields)))
        })
        .collect()
}

fn json_to_value(v: &serde_json::Value, ty: &Ty, field: &str) -> Result<Value, SchemaError> {
    let mismatch = || SchemaError::TypeMismatch {
        field: field.to_string(),
        found: json_kind(v).to_string(),
    };
    match (&ty.kind, v) {
        (TyKind::Bool, serde_json::Value::Bool(b)) => Ok(Value::Bool(*b)),
        (TyKind::String, serde_json::Value::String(s)) => Ok(Value::String(s.clone())),
        (TyKind::Int32, serde_json::Value::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int32)
            .ok_or_else(mismatch),
        (TyKind::Int64, serde_json::Value::Number(n)) => {
            n.as_i64().map(Value::Int64).ok_or_else(mismatch)
        }
        (TyKind::Float64, serde_json::Value::Number(n)) => {
            n.as_f64().map(Value::Float64).ok_or_else(mismatch)
        }
        (TyKind::Sequence(elem), serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                if item.is_null() {
                    Ok(Value::Null)
                } else {
                    json_to_value(item, elem, field)
                }
            })
            .collect::<Result<Vec<Value>, SchemaError>>()
            .map(Value::Sequence),
        (TyKind::Record(nested), serde_json::Value::Object(_)) => {
            let mut rows = rows_from_json(nested, std::slice::from_ref(v))?;
            Ok(rows.remove(0))
        }
        _ => Err(mismatch()),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_scalar_fields() {
        let rows: Vec<serde_json::Value> = vec![
            serde_json::json!({"Id": 1, "Name": "Joe", "Active": true}),
            serde_json::json!({"Id": 2, "Name": "Ann", "Active": false}),
        ];
        let schema = infer_schema("Customer", &rows).unwrap();
        assert_eq!(schema.field("id").unwrap().1.ty, Ty::new(TyKind::Int32));
        assert_eq!(schema.field("Name").unwrap().1.ty, Ty::new(TyKind::String));
        assert_eq!(schema.field("Active").unwrap().1.ty, Ty::new(TyKind::Bool));
    }

    #[test]
    fn missing_key_becomes_nullable() {
        let rows: Vec<serde_json::Value> = vec![
            serde_json::json!({"Id": 1, "Age": 40}),
            serde_json::json!({"Id": 2}),
        ];
        let schema = infer_schema("Customer", &rows).unwrap();
        let age = &schema.field("Age").unwrap().1.ty;
        assert!(age.nullable);
        assert_eq!(age.kind, TyKind::Int32);
    }

    #[test]
    fn rows_convert_with_nulls() {
        let rows: Vec<serde_json::Value> = vec![
            serde_json::json!({"Id": 1, "Age": 40}),
            serde_json::json!({"Id": 2}),
        ];
        let schema = infer_schema("Customer", &rows).unwrap();
        let values = rows_from_json(&schema, &rows).unwrap();
        match &values[1] {
            Value::Record(rec) => {
                let (idx, _) = schema.field("Age").unwrap();
                assert!(rec.field(idx).is_null());
            }
            other => panic!("expected record, got {:?}", other),
        }
    }
}
