use std::fmt;
use std::sync::Arc;

use crate::schema::{EnumDef, Schema};

/// The kind of a semantic type, before nullability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TyKind {
    /// The type of the bare `null` literal before promotion assigns it one.
    Null,
    Bool,
    String,
    Guid,
    DateTime,
    DateTimeOffset,
    /// The `time'...'` duration type.
    Duration,
    /// The `binary'...'` byte-string type.
    Binary,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Decimal,
    /// A named enumeration over an underlying integral kind.
    Enum(Arc<EnumDef>),
    /// A row type described by a schema.
    Record(Arc<Schema>),
    /// A collection-typed member; aggregates operate on these.
    Sequence(Box<Ty>),
}

/// A semantic type: a kind plus nullability.
///
/// Reference-like kinds (`String`, `Binary`, `Record`, `Sequence`, `Null`)
/// never carry the nullable flag; they admit null values inherently and the
/// evaluator propagates nulls through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ty {
    pub kind: TyKind,
    pub nullable: bool,
}

/// Numeric classification used by the overload tie-break: when only one
/// operand must widen, signed wins over unsigned and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Floating,
    Signed,
    Unsigned,
}

impl Ty {
    pub fn new(kind: TyKind) -> Ty {
        Ty {
            kind,
            nullable: false,
        }
    }

    pub fn nullable(kind: TyKind) -> Ty {
        let nullable = !kind.is_reference();
        Ty { kind, nullable }
    }

    pub fn as_nullable(&self) -> Ty {
        Ty::nullable(self.kind.clone())
    }

    pub fn as_non_nullable(&self) -> Ty {
        Ty::new(self.kind.clone())
    }

    pub fn is_null_literal(&self) -> bool {
        self.kind == TyKind::Null
    }

    pub fn is_bool(&self) -> bool {
        self.kind == TyKind::Bool
    }

    pub fn is_string(&self) -> bool {
        self.kind == TyKind::String
    }

    pub fn is_enum(&self) -> bool {
        matches!(self.kind, TyKind::Enum(_))
    }

    pub fn is_reference(&self) -> bool {
        self.kind.is_reference()
    }

    pub fn numeric_kind(&self) -> Option<NumericKind> {
        self.kind.numeric_kind()
    }

    /// For an enum type, the underlying integral type; nullability carries
    /// over. Any other type is returned unchanged.
    pub fn enum_underlying(&self) -> Ty {
        match &self.kind {
            TyKind::Enum(def) => Ty {
                kind: def.underlying.clone(),
                nullable: self.nullable,
            },
            _ => self.clone(),
        }
    }

    /// Human-readable name used in error messages; nullable types carry a
    /// trailing `?` like the source syntax they come from.
    pub fn name(&self) -> String {
        let base = self.kind.name();
        if self.nullable {
            format!("{}?", base)
        } else {
            base
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TyKind {
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TyKind::Null
                | TyKind::String
                | TyKind::Binary
                | TyKind::Record(_)
                | TyKind::Sequence(_)
        )
    }

    pub fn numeric_kind(&self) -> Option<NumericKind> {
        match self {
            TyKind::Float32 | TyKind::Float64 | TyKind::Decimal => Some(NumericKind::Floating),
            TyKind::Int8 | TyKind::Int16 | TyKind::Int32 | TyKind::Int64 => {
                Some(NumericKind::Signed)
            }
            TyKind::UInt8 | TyKind::UInt16 | TyKind::UInt32 | TyKind::UInt64 => {
                Some(NumericKind::Unsigned)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TyKind::Null => "null".to_string(),
            TyKind::Bool => "bool".to_string(),
            TyKind::String => "string".to_string(),
            TyKind::Guid => "guid".to_string(),
            TyKind::DateTime => "datetime".to_string(),
            TyKind::DateTimeOffset => "datetimeoffset".to_string(),
            TyKind::Duration => "time".to_string(),
            TyKind::Binary => "binary".to_string(),
            TyKind::Int8 => "sbyte".to_string(),
            TyKind::Int16 => "short".to_string(),
            TyKind::Int32 => "int".to_string(),
            TyKind::Int64 => "long".to_string(),
            TyKind::UInt8 => "byte".to_string(),
            TyKind::UInt16 => "ushort".to_string(),
            TyKind::UInt32 => "uint".to_string(),
            TyKind::UInt64 => "ulong".to_string(),
            TyKind::Float32 => "float".to_string(),
            TyKind::Float64 => "double".to_string(),
            TyKind::Decimal => "decimal".to_string(),
            TyKind::Enum(def) => def.name.clone(),
            TyKind::Record(schema) => schema.name.clone(),
            TyKind::Sequence(elem) => format!("sequence<{}>", elem.name()),
        }
    }
}

/// Whether `from` widens to `to` without loss, per the fixed numeric
/// conversion ladder. Identical kinds are trivially compatible; enums and
/// reference kinds never widen.
pub fn widens_to(from: &TyKind, to: &TyKind) -> bool {
    use TyKind::*;
    if from == to {
        return true;
    }
    match from {
        Int8 => matches!(to, Int16 | Int32 | Int64 | Float32 | Float64 | Decimal),
        UInt8 => matches!(
            to,
            Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 | Float32 | Float64 | Decimal
        ),
        Int16 => matches!(to, Int32 | Int64 | Float32 | Float64 | Decimal),
        UInt16 => matches!(
            to,
            Int32 | UInt32 | Int64 | UInt64 | Float32 | Float64 | Decimal
        ),
        Int32 => matches!(to, Int64 | Float32 | Float64 | Decimal),
        UInt32 => matches!(to, Int64 | UInt64 | Float32 | Float64 | Decimal),
        Int64 => matches!(to, Float32 | Float64 | Decimal),
        UInt64 => matches!(to, Float32 | Float64 | Decimal),
        Float32 => matches!(to, Float64),
        _ => false,
    }
}

/// The applicability test used everywhere promotion is considered: exact
/// equality, a widening numeric conversion, or nullable wrapping of either.
/// Reference kinds are only compatible with themselves, and a nullable
/// source never unwraps into a non-nullable target.
pub fn is_compatible_with(source: &Ty, target: &Ty) -> bool {
    if source == target {
        return true;
    }
    if target.is_reference() {
        return source.kind == target.kind;
    }
    if source.nullable && !target.nullable {
        return false;
    }
    if source.is_enum() || target.is_enum() {
        return source.kind == target.kind;
    }
    widens_to(&source.kind, &target.kind)
}
