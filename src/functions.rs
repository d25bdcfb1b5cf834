//! The closed mapped-function table.
//!
//! OData function names (`startswith`, `year`, `round`, ...) resolve to
//! tagged built-in operations instead of reflected members: each entry
//! names its receiver type, whether it is property- or method-shaped, and
//! the overloads a method-shaped entry accepts. `substringof` additionally
//! remaps its arguments, since `substringof(a, b)` asks whether `b`
//! contains `a`.

use crate::ast::types::{Ty, TyKind};
use crate::ast::Expr;
use crate::signatures::{p, resolve_overloads, Match, Prim, SigParam, Signature};

/// Tagged built-in operations the evaluator implements directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    // String methods
    StartsWith,
    EndsWith,
    Contains,
    IndexOf,
    Replace,
    Substring,
    Trim,
    ToUpper,
    ToLower,
    Concat,
    // String property
    Length,
    // Date parts
    Day,
    Month,
    Year,
    Hour,
    Minute,
    Second,
    // Math
    Round,
    Floor,
    Ceiling,
    // Synthesized by the parser, not in the name table: ordinal compare
    // backing relational string operators, and the `&` concatenation that
    // boxes arbitrary operands to text.
    Compare,
    ConcatValues,
}

/// The receiver type a mapped function operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnTarget {
    String,
    DateTime,
    /// Static math functions; no receiver.
    Math,
}

impl FnTarget {
    pub fn matches(&self, ty: &Ty) -> bool {
        match self {
            FnTarget::String => ty.kind == TyKind::String,
            FnTarget::DateTime => ty.kind == TyKind::DateTime,
            FnTarget::Math => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FnTarget::String => "string",
            FnTarget::DateTime => "datetime",
            FnTarget::Math => "math",
        }
    }
}

/// One overload of a method-shaped mapped function. `params` excludes the
/// receiver for instance methods.
#[derive(Debug)]
pub struct MethodSig {
    pub function: BuiltinFn,
    pub params: Signature,
    pub ret: Prim,
}

const fn m(function: BuiltinFn, params: Signature, ret: Prim) -> MethodSig {
    MethodSig {
        function,
        params,
        ret,
    }
}

/// How a mapped name resolves.
#[derive(Debug)]
pub enum MappedKind {
    /// Property-shaped: one argument (the receiver), fixed result type.
    Property(BuiltinFn, Prim),
    /// Method-shaped: receiver is the first argument, the rest resolve
    /// against the overload list.
    Method(&'static [MethodSig]),
    /// Static method: every argument resolves against the overload list.
    Static(&'static [MethodSig]),
}

/// A single entry of the mapped-function table.
#[derive(Debug)]
pub struct MappedFunction {
    pub name: &'static str,
    pub target: FnTarget,
    pub kind: MappedKind,
    /// `substringof(a, b)` becomes `b contains a`.
    pub swap_args: bool,
}

static EMPTY: &[SigParam] = &[];
static ONE_STRING: &[SigParam] = &[p(Prim::String)];
static TWO_STRINGS: &[SigParam] = &[p(Prim::String), p(Prim::String)];
static ONE_INT: &[SigParam] = &[p(Prim::Int32)];
static TWO_INTS: &[SigParam] = &[p(Prim::Int32), p(Prim::Int32)];
static ONE_DOUBLE: &[SigParam] = &[p(Prim::Float64)];
static ONE_DECIMAL: &[SigParam] = &[p(Prim::Decimal)];

static STARTSWITH: &[MethodSig] = &[m(BuiltinFn::StartsWith, ONE_STRING, Prim::Bool)];
static ENDSWITH: &[MethodSig] = &[m(BuiltinFn::EndsWith, ONE_STRING, Prim::Bool)];
static CONTAINS: &[MethodSig] = &[m(BuiltinFn::Contains, ONE_STRING, Prim::Bool)];
static INDEXOF: &[MethodSig] = &[m(BuiltinFn::IndexOf, ONE_STRING, Prim::Int32)];
static REPLACE: &[MethodSig] = &[m(BuiltinFn::Replace, TWO_STRINGS, Prim::String)];
static SUBSTRING: &[MethodSig] = &[
    m(BuiltinFn::Substring, ONE_INT, Prim::String),
    m(BuiltinFn::Substring, TWO_INTS, Prim::String),
];
static TRIM: &[MethodSig] = &[m(BuiltinFn::Trim, EMPTY, Prim::String)];
static TOUPPER: &[MethodSig] = &[m(BuiltinFn::ToUpper, EMPTY, Prim::String)];
static TOLOWER: &[MethodSig] = &[m(BuiltinFn::ToLower, EMPTY, Prim::String)];
static CONCAT: &[MethodSig] = &[m(BuiltinFn::Concat, TWO_STRINGS, Prim::String)];
static ROUND: &[MethodSig] = &[
    m(BuiltinFn::Round, ONE_DOUBLE, Prim::Float64),
    m(BuiltinFn::Round, ONE_DECIMAL, Prim::Decimal),
];
static FLOOR: &[MethodSig] = &[
    m(BuiltinFn::Floor, ONE_DOUBLE, Prim::Float64),
    m(BuiltinFn::Floor, ONE_DECIMAL, Prim::Decimal),
];
static CEILING: &[MethodSig] = &[
    m(BuiltinFn::Ceiling, ONE_DOUBLE, Prim::Float64),
    m(BuiltinFn::Ceiling, ONE_DECIMAL, Prim::Decimal),
];

static MAPPED: &[MappedFunction] = &[
    MappedFunction {
        name: "startswith",
        target: FnTarget::String,
        kind: MappedKind::Method(STARTSWITH),
        swap_args: false,
    },
    MappedFunction {
        name: "endswith",
        target: FnTarget::String,
        kind: MappedKind::Method(ENDSWITH),
        swap_args: false,
    },
    MappedFunction {
        name: "substringof",
        target: FnTarget::String,
        kind: MappedKind::Method(CONTAINS),
        swap_args: true,
    },
    MappedFunction {
        name: "indexof",
        target: FnTarget::String,
        kind: MappedKind::Method(INDEXOF),
        swap_args: false,
    },
    MappedFunction {
        name: "replace",
        target: FnTarget::String,
        kind: MappedKind::Method(REPLACE),
        swap_args: false,
    },
    MappedFunction {
        name: "substring",
        target: FnTarget::String,
        kind: MappedKind::Method(SUBSTRING),
        swap_args: false,
    },
    MappedFunction {
        name: "trim",
        target: FnTarget::String,
        kind: MappedKind::Method(TRIM),
        swap_args: false,
    },
    MappedFunction {
        name: "toupper",
        target: FnTarget::String,
        kind: MappedKind::Method(TOUPPER),
        swap_args: false,
    },
    MappedFunction {
        name: "tolower",
        target: FnTarget::String,
        kind: MappedKind::Method(TOLOWER),
        swap_args: false,
    },
    MappedFunction {
        name: "concat",
        target: FnTarget::String,
        kind: MappedKind::Static(CONCAT),
        swap_args: false,
    },
    MappedFunction {
        name: "length",
        target: FnTarget::String,
        kind: MappedKind::Property(BuiltinFn::Length, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "day",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Day, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "month",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Month, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "year",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Year, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "hour",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Hour, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "minute",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Minute, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "second",
        target: FnTarget::DateTime,
        kind: MappedKind::Property(BuiltinFn::Second, Prim::Int32),
        swap_args: false,
    },
    MappedFunction {
        name: "round",
        target: FnTarget::Math,
        kind: MappedKind::Static(ROUND),
        swap_args: false,
    },
    MappedFunction {
        name: "floor",
        target: FnTarget::Math,
        kind: MappedKind::Static(FLOOR),
        swap_args: false,
    },
    MappedFunction {
        name: "ceiling",
        target: FnTarget::Math,
        kind: MappedKind::Static(CEILING),
        swap_args: false,
    },
];

/// Looks a function name up in the closed table. Names are the lowercase
/// OData spellings and match case-sensitively.
pub fn map_function(name: &str) -> Option<&'static MappedFunction> {
    MAPPED.iter().find(|f| f.name == name)
}

/// Outcome of resolving a method-shaped mapped function's arguments.
pub enum MethodMatch {
    None,
    Unique {
        sig: &'static MethodSig,
        args: Vec<Expr>,
    },
    Ambiguous,
}

/// Resolves the (receiver-less) argument list against an overload set.
pub fn resolve_method(overloads: &'static [MethodSig], args: &[Expr]) -> MethodMatch {
    let candidates: Vec<Signature> = overloads.iter().map(|m| m.params).collect();
    match resolve_overloads(&candidates, args) {
        Match::None => MethodMatch::None,
        Match::Unique { index, args } => MethodMatch::Unique {
            sig: &overloads[index],
            args,
        },
        Match::Ambiguous => MethodMatch::Ambiguous,
    }
}

use crate::ast::operators::AggregateOp;
use crate::signatures::pn;

/// Selector types `sum` and `average` accept; narrower integers widen in.
static NUMERIC_SELECTORS: &[Signature] = &[
    &[p(Prim::Int32)],
    &[pn(Prim::Int32)],
    &[p(Prim::Int64)],
    &[pn(Prim::Int64)],
    &[p(Prim::Float32)],
    &[pn(Prim::Float32)],
    &[p(Prim::Float64)],
    &[pn(Prim::Float64)],
    &[p(Prim::Decimal)],
    &[pn(Prim::Decimal)],
];

static BOOL_PREDICATE: &[Signature] = &[&[p(Prim::Bool)], &[pn(Prim::Bool)]];

/// Outcome of resolving an aggregate call against the fixed sequence
/// operator signatures.
pub enum AggregateMatch {
    /// The name is not a sequence operator.
    Unknown,
    /// The name is known but no overload accepts the arguments.
    NoApplicable,
    Ambiguous,
    Unique {
        op: AggregateOp,
        /// The selector/predicate body, promoted to the winning overload.
        arg: Option<Expr>,
        ret: Ty,
    },
}

/// Resolves an aggregate by name (case-insensitive) and argument list.
/// `element` is the sequence's element type, needed for `where`'s result.
pub fn resolve_aggregate(name: &str, args: &[Expr], element: &Ty) -> AggregateMatch {
    let one_bool = |op: AggregateOp, ret: Ty, args: &[Expr]| -> AggregateMatch {
        if args.len() != 1 {
            return AggregateMatch::NoApplicable;
        }
        match resolve_overloads(BOOL_PREDICATE, args) {
            Match::Unique { mut args, .. } => AggregateMatch::Unique {
                op,
                arg: args.pop(),
                ret,
            },
            Match::Ambiguous => AggregateMatch::Ambiguous,
            Match::None => AggregateMatch::NoApplicable,
        }
    };

    let int32 = Ty::new(TyKind::Int32);
    let boolean = Ty::new(TyKind::Bool);
    match name.to_ascii_lowercase().as_str() {
        "count" => match args.len() {
            0 => AggregateMatch::Unique {
                op: AggregateOp::Count,
                arg: None,
                ret: int32,
            },
            1 => one_bool(AggregateOp::Count, int32, args),
            _ => AggregateMatch::NoApplicable,
        },
        "any" => match args.len() {
            0 => AggregateMatch::Unique {
                op: AggregateOp::Any,
                arg: None,
                ret: boolean,
            },
            1 => one_bool(AggregateOp::Any, boolean, args),
            _ => AggregateMatch::NoApplicable,
        },
        "all" => one_bool(AggregateOp::All, boolean, args),
        "where" => one_bool(
            AggregateOp::Where,
            Ty::new(TyKind::Sequence(Box::new(element.clone()))),
            args,
        ),
        "sum" | "average" => {
            if args.len() != 1 {
                return AggregateMatch::NoApplicable;
            }
            let op = if name.eq_ignore_ascii_case("sum") {
                AggregateOp::Sum
            } else {
                AggregateOp::Average
            };
            match resolve_overloads(NUMERIC_SELECTORS, args) {
                Match::Unique { mut args, .. } => {
                    let arg = args.pop();
                    let selected = arg.as_ref().map(|a| a.ty().clone());
                    let ret = match (&op, selected) {
                        (AggregateOp::Average, Some(ty)) => average_ret(&ty),
                        (_, Some(ty)) => ty,
                        (_, None) => int32,
                    };
                    AggregateMatch::Unique { op, arg, ret }
                }
                Match::Ambiguous => AggregateMatch::Ambiguous,
                Match::None => AggregateMatch::NoApplicable,
            }
        }
        "min" | "max" => {
            if args.len() != 1 {
                return AggregateMatch::NoApplicable;
            }
            let op = if name.eq_ignore_ascii_case("min") {
                AggregateOp::Min
            } else {
                AggregateOp::Max
            };
            AggregateMatch::Unique {
                op,
                arg: Some(args[0].clone()),
                ret: args[0].ty().clone(),
            }
        }
        _ => AggregateMatch::Unknown,
    }
}

/// `average` over integers yields a double; float-kind selectors keep
/// their own width. Nullability carries through.
fn average_ret(selector: &Ty) -> Ty {
    let kind = match selector.kind {
        TyKind::Float32 => TyKind::Float32,
        TyKind::Decimal => TyKind::Decimal,
        _ => TyKind::Float64,
    };
    Ty {
        kind,
        nullable: selector.nullable,
    }
}
