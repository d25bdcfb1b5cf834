use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{Datelike, Timelike};

use crate::ast::types::{Ty, TyKind};
use crate::ast::{AggregateOp, BinOp, Expr, Param, QueryLambda, UnOp};
use crate::functions::BuiltinFn;
use crate::queryable::Plan;
use crate::value::Value;

/// Errors that can occur while running a compiled plan.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// A value had the wrong runtime type for an operation.
    Type(String),

    /// Integer or decimal division by zero.
    DivisionByZero,

    /// Integer or decimal arithmetic overflow.
    Overflow,

    /// Null reached a context that requires a value (an unwrap of a
    /// nullable into its underlying type).
    NullValue(String),

    /// Element access outside the sequence bounds.
    IndexOutOfRange { index: i64, len: usize },

    /// `average`/`min`/`max` over an empty sequence with no null result
    /// type to fall back to.
    EmptySequence(&'static str),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::Type(msg) => write!(f, "Type error: {}", msg),
            EvalError::DivisionByZero => write!(f, "Division by zero"),
            EvalError::Overflow => write!(f, "Arithmetic overflow"),
            EvalError::NullValue(ty) => {
                write!(f, "Null value where a non-null '{}' is required", ty)
            }
            EvalError::IndexOutOfRange { index, len } => {
                write!(f, "Index {} out of range for sequence of length {}", index, len)
            }
            EvalError::EmptySequence(op) => {
                write!(f, "Aggregate '{}' over an empty sequence", op)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Lambda-parameter bindings, innermost first. Parameters are matched by
/// identity, so an aggregate's element parameter never collides with the
/// row parameter it nests inside.
struct Env<'a> {
    param: &'a Arc<Param>,
    value: &'a Value,
    parent: Option<&'a Env<'a>>,
}

impl<'a> Env<'a> {
    fn lookup(&self, param: &Arc<Param>) -> Option<&'a Value> {
        if Arc::ptr_eq(self.param, param) {
            Some(self.value)
        } else {
            self.parent.and_then(|p| p.lookup(param))
        }
    }
}

/// Runs a plan bottom-up, producing the surviving rows.
pub fn run_plan(plan: &Plan) -> Result<Vec<Value>, EvalError> {
    match plan {
        Plan::Source { rows, .. } => Ok(rows.as_ref().clone()),
        Plan::Where { input, predicate } => {
            let rows = run_plan(input)?;
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if eval_predicate(predicate, &row)? {
                    out.push(row);
                }
            }
            Ok(out)
        }
        Plan::Sort { .. } => run_sort(plan),
        Plan::Skip { input, count } => {
            Ok(run_plan(input)?.into_iter().skip(*count).collect())
        }
        Plan::Take { input, count } => {
            Ok(run_plan(input)?.into_iter().take(*count).collect())
        }
    }
}

/// Executes a primary-sort node plus its chain of "then" nodes as one
/// stable multi-key sort. The outermost node is the last "then" term, so
/// gathered keys are reversed into primary-first order.
fn run_sort(plan: &Plan) -> Result<Vec<Value>, EvalError> {
    let mut keys: Vec<(&QueryLambda, bool)> = Vec::new();
    let mut node = plan;
    while let Plan::Sort {
        input,
        key,
        ascending,
        is_then,
    } = node
    {
        keys.push((key, *ascending));
        node = input.as_ref();
        if !*is_then {
            break;
        }
    }
    keys.reverse();

    let rows = run_plan(node)?;
    let mut decorated: Vec<(Vec<Value>, Value)> = Vec::with_capacity(rows.len());
    for row in rows {
        let row_keys = keys
            .iter()
            .map(|(key, _)| eval_lambda(key, &row))
            .collect::<Result<Vec<Value>, EvalError>>()?;
        decorated.push((row_keys, row));
    }
    decorated.sort_by(|a, b| {
        for (i, (_, ascending)) in keys.iter().enumerate() {
            let ord = a.0[i].compare(&b.0[i]);
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(decorated.into_iter().map(|(_, row)| row).collect())
}

/// Evaluates a predicate lambda against a row; a null result filters the
/// row out.
fn eval_predicate(predicate: &QueryLambda, row: &Value) -> Result<bool, EvalError> {
    match eval_lambda(predicate, row)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => Err(EvalError::Type(format!(
            "predicate produced {} instead of bool",
            other.type_name()
        ))),
    }
}

/// Evaluates a single-parameter lambda against one value.
pub fn eval_lambda(lambda: &QueryLambda, value: &Value) -> Result<Value, EvalError> {
    let env = Env {
        param: &lambda.param,
        value,
        parent: None,
    };
    eval(&lambda.body, &env)
}

fn eval(expr: &Expr, env: &Env<'_>) -> Result<Value, EvalError> {
    match expr {
        Expr::Constant { value, .. } => Ok(value.clone()),
        Expr::Parameter(param) => env
            .lookup(param)
            .cloned()
            .ok_or_else(|| EvalError::Type("unbound lambda parameter".to_string())),
        Expr::Field {
            instance,
            index,
            name,
            ..
        } => match eval(instance, env)? {
            Value::Record(rec) => Ok(rec.field(*index).clone()),
            Value::Null => Ok(Value::Null),
            other => Err(EvalError::Type(format!(
                "cannot read field '{}' of {}",
                name,
                other.type_name()
            ))),
        },
        Expr::Convert { operand, ty } => convert_value(eval(operand, env)?, ty),
        Expr::Unary { op, operand, .. } => apply_unop(*op, eval(operand, env)?),
        Expr::Binary {
            op, left, right, ..
        } => apply_binop(*op, left, right, env),
        Expr::Call {
            function,
            instance,
            args,
            ..
        } => {
            let instance = instance.as_ref().map(|i| eval(i, env)).transpose()?;
            let args = args
                .iter()
                .map(|a| eval(a, env))
                .collect::<Result<Vec<Value>, EvalError>>()?;
            apply_builtin(*function, instance, args)
        }
        Expr::Aggregate {
            source,
            op,
            selector,
            ty,
        } => match eval(source, env)? {
            Value::Null => Ok(Value::Null),
            Value::Sequence(items) => apply_aggregate(*op, &items, selector.as_ref(), ty, env),
            other => Err(EvalError::Type(format!(
                "aggregate over {} instead of a sequence",
                other.type_name()
            ))),
        },
        Expr::Index {
            instance, index, ..
        } => {
            let instance = eval(instance, env)?;
            let index = eval(index, env)?
                .as_i64()
                .ok_or_else(|| EvalError::Type("index must be an integer".to_string()))?;
            match instance {
                Value::Null => Ok(Value::Null),
                Value::Sequence(items) => usize::try_from(index)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .ok_or(EvalError::IndexOutOfRange {
                        index,
                        len: items.len(),
                    }),
                Value::Binary(bytes) => usize::try_from(index)
                    .ok()
                    .and_then(|i| bytes.get(i).copied())
                    .map(Value::UInt8)
                    .ok_or(EvalError::IndexOutOfRange {
                        index,
                        len: bytes.len(),
                    }),
                other => Err(EvalError::Type(format!(
                    "cannot index {}",
                    other.type_name()
                ))),
            }
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
            ..
        } => match eval(test, env)? {
            Value::Bool(true) => eval(if_true, env),
            Value::Bool(false) => eval(if_false, env),
            other => Err(EvalError::Type(format!(
                "conditional test produced {} instead of bool",
                other.type_name()
            ))),
        },
    }
}

/// Conversions inserted by promotion: numeric widening, nullable wrapping
/// or unwrapping, and enum-to-underlying. Null converts to null for any
/// nullable or reference target and errors for the rest.
fn convert_value(value: Value, ty: &Ty) -> Result<Value, EvalError> {
    if value.is_null() {
        return if ty.nullable || ty.is_reference() {
            Ok(Value::Null)
        } else {
            Err(EvalError::NullValue(ty.name()))
        };
    }
    match &ty.kind {
        TyKind::Int8 => narrow_int(&value, |n| i8::try_from(n).ok().map(Value::Int8)),
        TyKind::Int16 => narrow_int(&value, |n| i16::try_from(n).ok().map(Value::Int16)),
        TyKind::Int32 => narrow_int(&value, |n| i32::try_from(n).ok().map(Value::Int32)),
        TyKind::Int64 => narrow_int(&value, |n| Some(Value::Int64(n))),
        TyKind::UInt8 => narrow_int(&value, |n| u8::try_from(n).ok().map(Value::UInt8)),
        TyKind::UInt16 => narrow_int(&value, |n| u16::try_from(n).ok().map(Value::UInt16)),
        TyKind::UInt32 => narrow_int(&value, |n| u32::try_from(n).ok().map(Value::UInt32)),
        TyKind::UInt64 => match value {
            Value::UInt64(n) => Ok(Value::UInt64(n)),
            other => narrow_int(&other, |n| u64::try_from(n).ok().map(Value::UInt64)),
        },
        TyKind::Float32 => value
            .as_f64()
            .map(|n| Value::Float32(n as f32))
            .ok_or_else(|| EvalError::Type("expected a numeric value".to_string())),
        TyKind::Float64 => value
            .as_f64()
            .map(Value::Float64)
            .ok_or_else(|| EvalError::Type("expected a numeric value".to_string())),
        TyKind::Decimal => value
            .as_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| EvalError::Type("expected a numeric value".to_string())),
        // Everything else is an identity conversion: nullable wrapping,
        // enum passthrough, bool, strings, dates.
        _ => Ok(value),
    }
}

fn narrow_int(value: &Value, narrow: impl Fn(i64) -> Option<Value>) -> Result<Value, EvalError> {
    value
        .as_i64()
        .ok_or_else(|| EvalError::Type("expected an integral value".to_string()))
        .and_then(|n| narrow(n).ok_or(EvalError::Overflow))
}

fn apply_unop(op: UnOp, value: Value) -> Result<Value, EvalError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match op {
        UnOp::Not => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::Type(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        UnOp::Negate => match value {
            Value::Int32(n) => n.checked_neg().map(Value::Int32).ok_or(EvalError::Overflow),
            Value::Int64(n) => n.checked_neg().map(Value::Int64).ok_or(EvalError::Overflow),
            Value::Float32(n) => Ok(Value::Float32(-n)),
            Value::Float64(n) => Ok(Value::Float64(-n)),
            Value::Decimal(d) => Ok(Value::Decimal(-d)),
            other => Err(EvalError::Type(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
    }
}

fn apply_binop(op: BinOp, left: &Expr, right: &Expr, env: &Env<'_>) -> Result<Value, EvalError> {
    // Short-circuiting three-valued logic first.
    match op {
        BinOp::And => {
            return match eval_bool_operand(left, env)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => eval_bool_operand(right, env),
                _ => match eval_bool_operand(right, env)? {
                    Value::Bool(false) => Ok(Value::Bool(false)),
                    _ => Ok(Value::Null),
                },
            };
        }
        BinOp::Or => {
            return match eval_bool_operand(left, env)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => eval_bool_operand(right, env),
                _ => match eval_bool_operand(right, env)? {
                    Value::Bool(true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Null),
                },
            };
        }
        _ => {}
    }

    let left = eval(left, env)?;
    let right = eval(right, env)?;
    match op {
        BinOp::Equal => Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::NotEqual => Ok(Value::Bool(!values_equal(&left, &right))),
        BinOp::LessThan | BinOp::LessEqual | BinOp::GreaterThan | BinOp::GreaterEqual => {
            // Relational comparison with null is false.
            if left.is_null() || right.is_null() {
                return Ok(Value::Bool(false));
            }
            let ord = left.compare(&right);
            Ok(Value::Bool(match op {
                BinOp::LessThan => ord == Ordering::Less,
                BinOp::LessEqual => ord != Ordering::Greater,
                BinOp::GreaterThan => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        _ => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            apply_arithmetic(op, left, right)
        }
    }
}

fn eval_bool_operand(expr: &Expr, env: &Env<'_>) -> Result<Value, EvalError> {
    match eval(expr, env)? {
        v @ (Value::Bool(_) | Value::Null) => Ok(v),
        other => Err(EvalError::Type(format!(
            "logical operator over {} instead of bool",
            other.type_name()
        ))),
    }
}

/// Lifted equality: two nulls are equal, null never equals a value.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.is_null(), right.is_null()) {
        (true, true) => true,
        (true, false) | (false, true) => false,
        (false, false) => left == right,
    }
}

fn apply_arithmetic(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    use Value::*;
    match (&left, &right) {
        (Int32(a), Int32(b)) => int_arith(op, i64::from(*a), i64::from(*b))
            .and_then(|n| i32::try_from(n).map(Int32).map_err(|_| EvalError::Overflow)),
        (Int64(a), Int64(b)) => int_arith(op, *a, *b).map(Int64),
        (UInt32(a), UInt32(b)) => uint_arith(op, u64::from(*a), u64::from(*b))
            .and_then(|n| u32::try_from(n).map(UInt32).map_err(|_| EvalError::Overflow)),
        (UInt64(a), UInt64(b)) => uint_arith(op, *a, *b).map(UInt64),
        (Float32(a), Float32(b)) => {
            Ok(Float32(float_arith(op, f64::from(*a), f64::from(*b)) as f32))
        }
        (Float64(a), Float64(b)) => Ok(Float64(float_arith(op, *a, *b))),
        (Decimal(a), Decimal(b)) => decimal_arith(op, *a, *b).map(Decimal),
        (DateTime(a), Duration(b)) => match op {
            BinOp::Add => a
                .checked_add_signed(*b)
                .map(DateTime)
                .ok_or(EvalError::Overflow),
            BinOp::Subtract => a
                .checked_sub_signed(*b)
                .map(DateTime)
                .ok_or(EvalError::Overflow),
            _ => Err(arith_type_error(op, &left, &right)),
        },
        (DateTime(a), DateTime(b)) if op == BinOp::Subtract => Ok(Duration(*a - *b)),
        (DateTimeOffset(a), Duration(b)) => match op {
            BinOp::Add => a
                .checked_add_signed(*b)
                .map(DateTimeOffset)
                .ok_or(EvalError::Overflow),
            BinOp::Subtract => a
                .checked_sub_signed(*b)
                .map(DateTimeOffset)
                .ok_or(EvalError::Overflow),
            _ => Err(arith_type_error(op, &left, &right)),
        },
        (DateTimeOffset(a), DateTimeOffset(b)) if op == BinOp::Subtract => {
            Ok(Duration(a.signed_duration_since(*b)))
        }
        (Duration(a), Duration(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Duration).ok_or(EvalError::Overflow),
            BinOp::Subtract => a.checked_sub(b).map(Duration).ok_or(EvalError::Overflow),
            _ => Err(arith_type_error(op, &left, &right)),
        },
        _ => Err(arith_type_error(op, &left, &right)),
    }
}

fn arith_type_error(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::Type(format!(
        "cannot apply {:?} to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn int_arith(op: BinOp, a: i64, b: i64) -> Result<i64, EvalError> {
    match op {
        BinOp::Add => a.checked_add(b).ok_or(EvalError::Overflow),
        BinOp::Subtract => a.checked_sub(b).ok_or(EvalError::Overflow),
        BinOp::Multiply => a.checked_mul(b).ok_or(EvalError::Overflow),
        BinOp::Divide if b == 0 => Err(EvalError::DivisionByZero),
        BinOp::Divide => a.checked_div(b).ok_or(EvalError::Overflow),
        BinOp::Modulo if b == 0 => Err(EvalError::DivisionByZero),
        BinOp::Modulo => a.checked_rem(b).ok_or(EvalError::Overflow),
        _ => Err(EvalError::Type("not an arithmetic operator".to_string())),
    }
}

fn uint_arith(op: BinOp, a: u64, b: u64) -> Result<u64, EvalError> {
    match op {
        BinOp::Add => a.checked_add(b).ok_or(EvalError::Overflow),
        BinOp::Subtract => a.checked_sub(b).ok_or(EvalError::Overflow),
        BinOp::Multiply => a.checked_mul(b).ok_or(EvalError::Overflow),
        BinOp::Divide => a.checked_div(b).ok_or(EvalError::DivisionByZero),
        BinOp::Modulo => a.checked_rem(b).ok_or(EvalError::DivisionByZero),
        _ => Err(EvalError::Type("not an arithmetic operator".to_string())),
    }
}

fn float_arith(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => a / b,
        _ => a % b,
    }
}

fn decimal_arith(
    op: BinOp,
    a: rust_decimal::Decimal,
    b: rust_decimal::Decimal,
) -> Result<rust_decimal::Decimal, EvalError> {
    match op {
        BinOp::Add => a.checked_add(b).ok_or(EvalError::Overflow),
        BinOp::Subtract => a.checked_sub(b).ok_or(EvalError::Overflow),
        BinOp::Multiply => a.checked_mul(b).ok_or(EvalError::Overflow),
        BinOp::Divide if b.is_zero() => Err(EvalError::DivisionByZero),
        BinOp::Divide => a.checked_div(b).ok_or(EvalError::Overflow),
        BinOp::Modulo if b.is_zero() => Err(EvalError::DivisionByZero),
        BinOp::Modulo => a.checked_rem(b).ok_or(EvalError::Overflow),
        _ => Err(EvalError::Type("not an arithmetic operator".to_string())),
    }
}

fn apply_builtin(
    function: BuiltinFn,
    instance: Option<Value>,
    mut args: Vec<Value>,
) -> Result<Value, EvalError> {
    use BuiltinFn::*;

    // Compare and the concat forms handle nulls themselves; everything
    // else null-propagates.
    match function {
        Compare => {
            let b = args.pop().unwrap_or(Value::Null);
            let a = args.pop().unwrap_or(Value::Null);
            let ord = match (a.is_null(), b.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a.compare(&b),
            };
            return Ok(Value::Int32(match ord {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }));
        }
        Concat | ConcatValues => {
            let b = args.pop().unwrap_or(Value::Null);
            let a = args.pop().unwrap_or(Value::Null);
            return Ok(Value::String(a.concat_text() + &b.concat_text()));
        }
        _ => {}
    }
    if instance.as_ref().is_some_and(Value::is_null) || args.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }

    let string_instance = |v: &Option<Value>| -> Result<String, EvalError> {
        match v {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(EvalError::Type(format!(
                "string function over {}",
                other.as_ref().map_or("nothing", Value::type_name)
            ))),
        }
    };
    let datetime_instance = |v: &Option<Value>| -> Result<chrono::NaiveDateTime, EvalError> {
        match v {
            Some(Value::DateTime(dt)) => Ok(*dt),
            other => Err(EvalError::Type(format!(
                "date function over {}",
                other.as_ref().map_or("nothing", Value::type_name)
            ))),
        }
    };
    let string_arg = |v: Option<&Value>| -> Result<String, EvalError> {
        match v {
            Some(Value::String(s)) => Ok(s.clone()),
            other => Err(EvalError::Type(format!(
                "expected a string argument, found {}",
                other.map_or("nothing", Value::type_name)
            ))),
        }
    };

    match function {
        StartsWith => {
            let s = string_instance(&instance)?;
            let prefix = string_arg(args.first())?;
            Ok(Value::Bool(s.starts_with(&prefix)))
        }
        EndsWith => {
            let s = string_instance(&instance)?;
            let suffix = string_arg(args.first())?;
            Ok(Value::Bool(s.ends_with(&suffix)))
        }
        Contains => {
            let s = string_instance(&instance)?;
            let needle = string_arg(args.first())?;
            Ok(Value::Bool(s.contains(&needle)))
        }
        IndexOf => {
            let s = string_instance(&instance)?;
            let needle = string_arg(args.first())?;
            Ok(Value::Int32(match s.find(&needle) {
                Some(byte_index) => s[..byte_index].chars().count() as i32,
                None => -1,
            }))
        }
        Replace => {
            let s = string_instance(&instance)?;
            let from = string_arg(args.first())?;
            let to = string_arg(args.get(1))?;
            Ok(Value::String(s.replace(&from, &to)))
        }
        Substring => {
            let s = string_instance(&instance)?;
            let chars: Vec<char> = s.chars().collect();
            let start = args
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| EvalError::Type("substring start must be an integer".to_string()))?;
            let start_idx =
                usize::try_from(start).ok().filter(|&i| i <= chars.len()).ok_or(
                    EvalError::IndexOutOfRange {
                        index: start,
                        len: chars.len(),
                    },
                )?;
            let taken: String = match args.get(1) {
                None => chars[start_idx..].iter().collect(),
                Some(len) => {
                    let len = len
                        .as_i64()
                        .and_then(|l| usize::try_from(l).ok())
                        .ok_or_else(|| {
                            EvalError::Type("substring length must be an integer".to_string())
                        })?;
                    if start_idx + len > chars.len() {
                        return Err(EvalError::IndexOutOfRange {
                            index: (start_idx + len) as i64,
                            len: chars.len(),
                        });
                    }
                    chars[start_idx..start_idx + len].iter().collect()
                }
            };
            Ok(Value::String(taken))
        }
        Trim => Ok(Value::String(
            string_instance(&instance)?.trim().to_string(),
        )),
        ToUpper => Ok(Value::String(string_instance(&instance)?.to_uppercase())),
        ToLower => Ok(Value::String(string_instance(&instance)?.to_lowercase())),
        Length => Ok(Value::Int32(
            string_instance(&instance)?.chars().count() as i32,
        )),
        Day => Ok(Value::Int32(datetime_instance(&instance)?.day() as i32)),
        Month => Ok(Value::Int32(datetime_instance(&instance)?.month() as i32)),
        Year => Ok(Value::Int32(datetime_instance(&instance)?.year())),
        Hour => Ok(Value::Int32(datetime_instance(&instance)?.hour() as i32)),
        Minute => Ok(Value::Int32(datetime_instance(&instance)?.minute() as i32)),
        Second => Ok(Value::Int32(datetime_instance(&instance)?.second() as i32)),
        Round => math_builtin(args, f64::round_ties_even, |d| d.round()),
        Floor => math_builtin(args, f64::floor, |d| d.floor()),
        Ceiling => math_builtin(args, f64::ceil, |d| d.ceil()),
        Compare | Concat | ConcatValues => unreachable!("handled above"),
    }
}

/// `round`/`floor`/`ceiling` resolve to a double or decimal overload;
/// rounding is half-to-even on both.
fn math_builtin(
    mut args: Vec<Value>,
    float_op: impl Fn(f64) -> f64,
    decimal_op: impl Fn(rust_decimal::Decimal) -> rust_decimal::Decimal,
) -> Result<Value, EvalError> {
    match args.pop() {
        Some(Value::Float64(f)) => Ok(Value::Float64(float_op(f))),
        Some(Value::Decimal(d)) => Ok(Value::Decimal(decimal_op(d))),
        other => Err(EvalError::Type(format!(
            "math function over {}",
            other.as_ref().map_or("nothing", Value::type_name)
        ))),
    }
}

fn apply_aggregate(
    op: AggregateOp,
    items: &[Value],
    selector: Option<&QueryLambda>,
    ty: &Ty,
    env: &Env<'_>,
) -> Result<Value, EvalError> {
    let select = |item: &Value| -> Result<Value, EvalError> {
        match selector {
            Some(lambda) => {
                let child = Env {
                    param: &lambda.param,
                    value: item,
                    parent: Some(env),
                };
                eval(&lambda.body, &child)
            }
            None => Ok(item.clone()),
        }
    };
    let matches = |item: &Value| -> Result<bool, EvalError> {
        match select(item)? {
            Value::Bool(b) => Ok(b),
            Value::Null => Ok(false),
            other => Err(EvalError::Type(format!(
                "predicate produced {} instead of bool",
                other.type_name()
            ))),
        }
    };

    match op {
        AggregateOp::Count => {
            if selector.is_none() {
                return Ok(Value::Int32(items.len() as i32));
            }
            let mut count = 0;
            for item in items {
                if matches(item)? {
                    count += 1;
                }
            }
            Ok(Value::Int32(count))
        }
        AggregateOp::Any => {
            if selector.is_none() {
                return Ok(Value::Bool(!items.is_empty()));
            }
            for item in items {
                if matches(item)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        AggregateOp::All => {
            for item in items {
                if !matches(item)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        AggregateOp::Where => {
            let mut kept = Vec::new();
            for item in items {
                if matches(item)? {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Sequence(kept))
        }
        AggregateOp::Sum => {
            // Null selector results are skipped; an empty sum is typed zero.
            let mut acc = zero_of(&ty.kind)?;
            for item in items {
                let value = select(item)?;
                if value.is_null() {
                    continue;
                }
                acc = apply_arithmetic(BinOp::Add, acc, value)?;
            }
            Ok(acc)
        }
        AggregateOp::Average => {
            let mut values = Vec::new();
            for item in items {
                let value = select(item)?;
                if !value.is_null() {
                    values.push(value);
                }
            }
            if values.is_empty() {
                return if ty.nullable {
                    Ok(Value::Null)
                } else {
                    Err(EvalError::EmptySequence("average"))
                };
            }
            let count = values.len();
            match ty.kind {
                TyKind::Decimal => {
                    let mut acc = rust_decimal::Decimal::ZERO;
                    for value in &values {
                        acc = acc
                            .checked_add(value.as_decimal().ok_or(EvalError::Overflow)?)
                            .ok_or(EvalError::Overflow)?;
                    }
                    acc.checked_div(rust_decimal::Decimal::from(count))
                        .map(Value::Decimal)
                        .ok_or(EvalError::Overflow)
                }
                TyKind::Float32 => {
                    let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                    Ok(Value::Float32((sum / count as f64) as f32))
                }
                _ => {
                    let sum: f64 = values.iter().filter_map(Value::as_f64).sum();
                    Ok(Value::Float64(sum / count as f64))
                }
            }
        }
        AggregateOp::Min | AggregateOp::Max => {
            let mut best: Option<Value> = None;
            for item in items {
                let value = select(item)?;
                if value.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let keep_new = match op {
                            AggregateOp::Min => value.compare(&current) == Ordering::Less,
                            _ => value.compare(&current) == Ordering::Greater,
                        };
                        if keep_new { value } else { current }
                    }
                });
            }
            match best {
                Some(value) => Ok(value),
                None if ty.nullable || ty.is_reference() => Ok(Value::Null),
                None => Err(EvalError::EmptySequence(match op {
                    AggregateOp::Min => "min",
                    _ => "max",
                })),
            }
        }
    }
}

fn zero_of(kind: &TyKind) -> Result<Value, EvalError> {
    Ok(match kind {
        TyKind::Int32 => Value::Int32(0),
        TyKind::Int64 => Value::Int64(0),
        TyKind::Float32 => Value::Float32(0.0),
        TyKind::Float64 => Value::Float64(0.0),
        TyKind::Decimal => Value::Decimal(rust_decimal::Decimal::ZERO),
        other => {
            return Err(EvalError::Type(format!(
                "cannot sum values of type {}",
                other.name()
            )));
        }
    })
}
