//! Operator signature tables and the overload-resolution engine.
//!
//! Each operator family owns a fixed set of signatures over the primitive
//! types it accepts. Resolution promotes the operands against every
//! signature of the family, keeps the applicable ones, and picks the single
//! best by a dominance test over the conversion ranking; surviving ties are
//! an error, never an arbitrary choice.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::ast::types::{is_compatible_with, NumericKind, Ty, TyKind};
use crate::ast::Expr;
use crate::value::Value;

/// The primitive types signatures are written in. Narrower integers widen
/// into these before any operator applies, so the tables never mention
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    Bool,
    String,
    Guid,
    DateTime,
    DateTimeOffset,
    Duration,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Decimal,
}

impl Prim {
    pub fn ty_kind(self) -> TyKind {
        match self {
            Prim::Bool => TyKind::Bool,
            Prim::String => TyKind::String,
            Prim::Guid => TyKind::Guid,
            Prim::DateTime => TyKind::DateTime,
            Prim::DateTimeOffset => TyKind::DateTimeOffset,
            Prim::Duration => TyKind::Duration,
            Prim::Int32 => TyKind::Int32,
            Prim::UInt32 => TyKind::UInt32,
            Prim::Int64 => TyKind::Int64,
            Prim::UInt64 => TyKind::UInt64,
            Prim::Float32 => TyKind::Float32,
            Prim::Float64 => TyKind::Float64,
            Prim::Decimal => TyKind::Decimal,
        }
    }
}

/// One parameter of a signature.
#[derive(Debug, Clone, Copy)]
pub struct SigParam {
    pub prim: Prim,
    pub nullable: bool,
}

impl SigParam {
    pub fn ty(&self) -> Ty {
        let kind = self.prim.ty_kind();
        if self.nullable {
            Ty::nullable(kind)
        } else {
            Ty::new(kind)
        }
    }
}

/// A signature is its parameter list; unary families use one parameter,
/// binary families two.
pub type Signature = &'static [SigParam];

pub(crate) const fn p(prim: Prim) -> SigParam {
    SigParam {
        prim,
        nullable: false,
    }
}

pub(crate) const fn pn(prim: Prim) -> SigParam {
    SigParam {
        prim,
        nullable: true,
    }
}

use Prim::*;

/// `mul`/`div`/`mod` and the numeric core every other family extends.
pub static ARITHMETIC: &[Signature] = &[
    &[p(Int32), p(Int32)],
    &[pn(Int32), pn(Int32)],
    &[p(UInt32), p(UInt32)],
    &[pn(UInt32), pn(UInt32)],
    &[p(Int64), p(Int64)],
    &[pn(Int64), pn(Int64)],
    &[p(UInt64), p(UInt64)],
    &[pn(UInt64), pn(UInt64)],
    &[p(Float32), p(Float32)],
    &[pn(Float32), pn(Float32)],
    &[p(Float64), p(Float64)],
    &[pn(Float64), pn(Float64)],
    &[p(Decimal), p(Decimal)],
    &[pn(Decimal), pn(Decimal)],
];

/// What `add` accepts beyond arithmetic: date/time displacement.
pub static ADD_EXTRA: &[Signature] = &[
    &[p(DateTime), p(Duration)],
    &[pn(DateTime), pn(Duration)],
    &[p(DateTimeOffset), p(Duration)],
    &[pn(DateTimeOffset), pn(Duration)],
    &[p(Duration), p(Duration)],
    &[pn(Duration), pn(Duration)],
];

/// What `sub` accepts beyond `add`: differences of instants.
pub static SUBTRACT_EXTRA: &[Signature] = &[
    &[p(DateTime), p(DateTime)],
    &[pn(DateTime), pn(DateTime)],
    &[p(DateTimeOffset), p(DateTimeOffset)],
    &[pn(DateTimeOffset), pn(DateTimeOffset)],
];

/// What the relational operators accept beyond arithmetic.
pub static RELATIONAL_EXTRA: &[Signature] = &[
    &[p(String), p(String)],
    &[p(DateTime), p(DateTime)],
    &[pn(DateTime), pn(DateTime)],
    &[p(DateTimeOffset), p(DateTimeOffset)],
    &[pn(DateTimeOffset), pn(DateTimeOffset)],
    &[p(Duration), p(Duration)],
    &[pn(Duration), pn(Duration)],
];

/// What equality accepts beyond the relational set.
pub static EQUALITY_EXTRA: &[Signature] = &[
    &[p(Bool), p(Bool)],
    &[pn(Bool), pn(Bool)],
    &[p(Guid), p(Guid)],
    &[pn(Guid), pn(Guid)],
];

pub static LOGICAL: &[Signature] = &[&[p(Bool), p(Bool)], &[pn(Bool), pn(Bool)]];

pub static NEGATION: &[Signature] = &[
    &[p(Int32)],
    &[pn(Int32)],
    &[p(Int64)],
    &[pn(Int64)],
    &[p(Float32)],
    &[pn(Float32)],
    &[p(Float64)],
    &[pn(Float64)],
    &[p(Decimal)],
    &[pn(Decimal)],
];

pub static NOT: &[Signature] = &[&[p(Bool)], &[pn(Bool)]];

/// Composed operator families; wider families extend narrower ones.
pub static ADD: &[&[Signature]] = &[ARITHMETIC, ADD_EXTRA];
pub static SUBTRACT: &[&[Signature]] = &[ARITHMETIC, ADD_EXTRA, SUBTRACT_EXTRA];
pub static MULTIPLICATIVE: &[&[Signature]] = &[ARITHMETIC];
pub static RELATIONAL: &[&[Signature]] = &[ARITHMETIC, RELATIONAL_EXTRA];
pub static EQUALITY: &[&[Signature]] = &[ARITHMETIC, RELATIONAL_EXTRA, EQUALITY_EXTRA];

/// Outcome of resolving operands against a signature family.
#[derive(Debug)]
pub enum Resolution {
    /// No signature is applicable.
    None,
    /// Exactly one best signature; the operands, promoted to it.
    Unique(Vec<Expr>),
    /// More than one undominated signature survives.
    Ambiguous,
}

/// Outcome of resolving arguments against an explicit candidate list,
/// reporting which candidate won.
#[derive(Debug)]
pub enum Match {
    None,
    Unique { index: usize, args: Vec<Expr> },
    Ambiguous,
}

/// Finds the single best applicable signature for the operands, promoting
/// them to its parameter types.
pub fn find_best(tables: &[&[Signature]], args: &[Expr]) -> Resolution {
    let candidates: Vec<Signature> = tables.iter().flat_map(|t| t.iter().copied()).collect();
    match resolve_overloads(&candidates, args) {
        Match::None => Resolution::None,
        Match::Unique { args, .. } => Resolution::Unique(args),
        Match::Ambiguous => Resolution::Ambiguous,
    }
}

/// The core overload resolver: keeps the applicable candidates, then keeps
/// only candidates not dominated by another, and succeeds exactly when one
/// survives.
pub fn resolve_overloads(candidates: &[Signature], args: &[Expr]) -> Match {
    let mut applicable: Vec<(usize, Vec<Expr>)> = Vec::new();
    for (index, sig) in candidates.iter().enumerate() {
        if sig.len() != args.len() {
            continue;
        }
        let mut promoted = Vec::with_capacity(args.len());
        let mut ok = true;
        for (arg, param) in args.iter().zip(sig.iter()) {
            match promote_expression(arg, &param.ty(), false) {
                Some(expr) => promoted.push(expr),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            applicable.push((index, promoted));
        }
    }

    if applicable.is_empty() {
        return Match::None;
    }
    if applicable.len() == 1 {
        let (index, args) = applicable.swap_remove(0);
        return Match::Unique { index, args };
    }
    let survivors: Vec<usize> = (0..applicable.len())
        .filter(|&i| {
            (0..applicable.len()).all(|j| {
                i == j
                    || is_better_than(
                        args,
                        candidates[applicable[i].0],
                        candidates[applicable[j].0],
                    )
            })
        })
        .collect();
    if survivors.len() == 1 {
        let (index, args) = applicable.swap_remove(survivors[0]);
        Match::Unique { index, args }
    } else {
        Match::Ambiguous
    }
}

/// Whether `s1` is strictly better than `s2` for these operands: not worse
/// at every position, strictly better at one.
fn is_better_than(args: &[Expr], s1: Signature, s2: Signature) -> bool {
    let mut better = false;
    for (i, arg) in args.iter().enumerate() {
        match compare_conversions(arg.ty(), &s1[i].ty(), &s2[i].ty()) {
            c if c < 0 => return false,
            c if c > 0 => better = true,
            _ => {}
        }
    }
    better
}

/// Ranks two conversion targets for a source type: exact match wins, then
/// the target the other converts into, then signed over unsigned.
pub fn compare_conversions(source: &Ty, t1: &Ty, t2: &Ty) -> i32 {
    if t1 == t2 {
        return 0;
    }
    if source == t1 {
        return 1;
    }
    if source == t2 {
        return -1;
    }
    let one_into_two = is_compatible_with(t1, t2);
    let two_into_one = is_compatible_with(t2, t1);
    if one_into_two && !two_into_one {
        return 1;
    }
    if two_into_one && !one_into_two {
        return -1;
    }
    let k1 = t1.numeric_kind();
    let k2 = t2.numeric_kind();
    if k1 == Some(NumericKind::Signed) && k2 == Some(NumericKind::Unsigned) {
        return 1;
    }
    if k2 == Some(NumericKind::Signed) && k1 == Some(NumericKind::Unsigned) {
        return -1;
    }
    0
}

/// Promotes `expr` to `target` if possible: exact match, literal re-read at
/// the target type, the null literal against any nullable or reference
/// target, or a widening conversion. `exact` forces a conversion node even
/// when assignability alone would do.
pub fn promote_expression(expr: &Expr, target: &Ty, exact: bool) -> Option<Expr> {
    if expr.ty() == target {
        return Some(expr.clone());
    }

    if let Expr::Constant { value, ty, text } = expr {
        if value.is_null() {
            if target.is_reference() || target.nullable {
                return Some(Expr::constant(Value::Null, target.clone()));
            }
        } else if let Some(text) = text {
            if let Some(re_read) = re_read_literal(text, &ty.kind, target) {
                return Some(re_read);
            }
        }
    }

    if !is_compatible_with(expr.ty(), target) {
        return None;
    }
    if target.is_reference() && !exact {
        return Some(expr.clone());
    }
    Some(Expr::Convert {
        operand: Arc::new(expr.clone()),
        ty: target.clone(),
    })
}

/// Re-reads a literal's source text at another type: integer literals at
/// any numeric type or as an enum value, double literals as decimals,
/// string literals as enum member names.
fn re_read_literal(text: &str, from: &TyKind, target: &Ty) -> Option<Expr> {
    match from {
        TyKind::Int32 | TyKind::UInt32 | TyKind::Int64 | TyKind::UInt64 => {
            match &target.kind {
                TyKind::Enum(_) => {
                    let n: i64 = text.parse().ok()?;
                    Some(Expr::constant(Value::Int64(n), target.clone()))
                }
                kind => {
                    let value = parse_number_text(text, kind)?;
                    Some(Expr::Constant {
                        value,
                        ty: target.clone(),
                        text: Some(text.to_string()),
                    })
                }
            }
        }
        TyKind::Float64 if target.kind == TyKind::Decimal => {
            let value = parse_number_text(text, &TyKind::Decimal)?;
            Some(Expr::Constant {
                value,
                ty: target.clone(),
                text: Some(text.to_string()),
            })
        }
        TyKind::String => match &target.kind {
            TyKind::Enum(def) => {
                let value = def.member(text)?;
                Some(Expr::constant(Value::Int64(value), target.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Parses numeric literal text at a specific kind, rejecting out-of-range
/// values.
pub fn parse_number_text(text: &str, kind: &TyKind) -> Option<Value> {
    match kind {
        TyKind::Int8 => text.parse::<i8>().ok().map(Value::Int8),
        TyKind::Int16 => text.parse::<i16>().ok().map(Value::Int16),
        TyKind::Int32 => text.parse::<i32>().ok().map(Value::Int32),
        TyKind::Int64 => text.parse::<i64>().ok().map(Value::Int64),
        TyKind::UInt8 => text.parse::<u8>().ok().map(Value::UInt8),
        TyKind::UInt16 => text.parse::<u16>().ok().map(Value::UInt16),
        TyKind::UInt32 => text.parse::<u32>().ok().map(Value::UInt32),
        TyKind::UInt64 => text.parse::<u64>().ok().map(Value::UInt64),
        TyKind::Float32 => text.parse::<f32>().ok().map(Value::Float32),
        TyKind::Float64 => text.parse::<f64>().ok().map(Value::Float64),
        TyKind::Decimal => text.parse::<Decimal>().ok().map(Value::Decimal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_const(n: i32) -> Expr {
        Expr::Constant {
            value: Value::Int32(n),
            ty: Ty::new(TyKind::Int32),
            text: Some(n.to_string()),
        }
    }

    #[test]
    fn int_pair_resolves_to_int_signature() {
        match find_best(EQUALITY, &[int_const(1), int_const(2)]) {
            Resolution::Unique(args) => {
                assert_eq!(args[0].ty(), &Ty::new(TyKind::Int32));
                assert_eq!(args[1].ty(), &Ty::new(TyKind::Int32));
            }
            other => panic!("expected unique resolution, got {:?}", other),
        }
    }

    #[test]
    fn null_against_int_lifts_to_nullable() {
        let null = Expr::constant(Value::Null, Ty::new(TyKind::Null));
        match find_best(EQUALITY, &[int_const(1), null]) {
            Resolution::Unique(args) => {
                assert_eq!(args[0].ty(), &Ty::nullable(TyKind::Int32));
                assert_eq!(args[1].ty(), &Ty::nullable(TyKind::Int32));
            }
            other => panic!("expected unique resolution, got {:?}", other),
        }
    }

    #[test]
    fn string_and_int_have_no_signature() {
        let s = Expr::constant(
            Value::String("x".into()),
            Ty::new(TyKind::String),
        );
        assert!(matches!(
            find_best(EQUALITY, &[s, int_const(1)]),
            Resolution::None
        ));
    }

    #[test]
    fn mixed_sign_operands_widen_to_long() {
        // uint vs int (no literal text, so no re-read): (long, long)
        // dominates the float/double/decimal candidates; no ambiguity.
        let u = Expr::constant(Value::UInt32(1), Ty::new(TyKind::UInt32));
        let i = Expr::constant(Value::Int32(2), Ty::new(TyKind::Int32));
        match find_best(EQUALITY, &[u, i]) {
            Resolution::Unique(args) => {
                assert_eq!(args[0].ty(), &Ty::new(TyKind::Int64));
                assert_eq!(args[1].ty(), &Ty::new(TyKind::Int64));
            }
            other => panic!("expected unique resolution, got {:?}", other),
        }
    }

    #[test]
    fn int_literal_re_reads_as_unsigned() {
        // With source text available the literal itself re-reads at uint,
        // making the exact (uint, uint) signature win.
        let u = Expr::constant(Value::UInt32(1), Ty::new(TyKind::UInt32));
        match find_best(EQUALITY, &[u, int_const(2)]) {
            Resolution::Unique(args) => {
                assert_eq!(args[0].ty(), &Ty::new(TyKind::UInt32));
                assert_eq!(args[1].ty(), &Ty::new(TyKind::UInt32));
            }
            other => panic!("expected unique resolution, got {:?}", other),
        }
    }
}
