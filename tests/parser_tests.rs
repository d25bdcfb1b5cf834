// tests/parser_tests.rs

use std::sync::Arc;

use dynq::ast::{BinOp, Expr, TyKind, UnOp};
use dynq::errors::ParseErrorKind;
use dynq::evaluator::eval_lambda;
use dynq::functions::BuiltinFn;
use dynq::parser::{parse_orderings, parse_predicate};
use dynq::schema::{EnumDef, Field, Schema};
use dynq::value::{Record, Value};
use dynq::{QueryLambda, Ty};

fn status_enum() -> Arc<EnumDef> {
    EnumDef::new("Status", vec![("Active", 0), ("Suspended", 1), ("Closed", 2)])
}

fn customer_schema() -> Arc<Schema> {
    let order = Schema::new(
        "Order",
        vec![
            Field::new("Total", Ty::new(TyKind::Float64)),
            Field::new("Open", Ty::new(TyKind::Bool)),
        ],
    );
    Schema::new(
        "Customer",
        vec![
            Field::new("Id", Ty::new(TyKind::Int32)),
            Field::new("Name", Ty::new(TyKind::String)),
            Field::new("Total", Ty::new(TyKind::Float64)),
            Field::new("Age", Ty::nullable(TyKind::Int32)),
            Field::new("Status", Ty::new(TyKind::Enum(status_enum()))),
            Field::new(
                "Tags",
                Ty::new(TyKind::Sequence(Box::new(Ty::new(TyKind::String)))),
            ),
            Field::new(
                "Orders",
                Ty::new(TyKind::Sequence(Box::new(order.ty()))),
            ),
        ],
    )
}

fn order_row(total: f64, open: bool) -> Value {
    let order = Schema::new(
        "Order",
        vec![
            Field::new("Total", Ty::new(TyKind::Float64)),
            Field::new("Open", Ty::new(TyKind::Bool)),
        ],
    );
    Value::Record(Record::new(
        order,
        vec![Value::Float64(total), Value::Bool(open)],
    ))
}

fn customer(id: i32, name: &str, total: f64, age: Option<i32>, status: i64) -> Value {
    Value::Record(Record::new(
        customer_schema(),
        vec![
            Value::Int32(id),
            Value::String(name.to_string()),
            Value::Float64(total),
            age.map(Value::Int32).unwrap_or(Value::Null),
            Value::Int32(status as i32),
            Value::Sequence(vec![
                Value::String("new".to_string()),
                Value::String("vip".to_string()),
            ]),
            Value::Sequence(vec![order_row(120.0, true), order_row(30.0, false)]),
        ],
    ))
}

fn predicate(text: &str) -> QueryLambda {
    parse_predicate(&customer_schema(), text, None).expect("parse failure")
}

fn holds(text: &str, row: &Value) -> bool {
    match eval_lambda(&predicate(text), row).expect("eval failure") {
        Value::Bool(b) => b,
        Value::Null => false,
        other => panic!("predicate produced {:?}", other),
    }
}

// ============================================================================
// Tree shapes
// ============================================================================

#[test]
fn test_equality_on_string_field() {
    let lambda = predicate("Name eq 'Joe'");
    match lambda.body.as_ref() {
        Expr::Binary {
            op: BinOp::Equal,
            left,
            right,
            ..
        } => {
            assert!(matches!(
                left.as_ref(),
                Expr::Field { name, .. } if name == "Name"
            ));
            assert!(matches!(
                right.as_ref(),
                Expr::Constant { value: Value::String(s), .. } if s == "Joe"
            ));
        }
        other => panic!("expected equality, got {:?}", other),
    }
}

#[test]
fn test_precedence_and_over_or() {
    // a || b && c parses as a || (b && c)
    let lambda = predicate("Id eq 1 || Id eq 2 && Name eq 'x'");
    match lambda.body.as_ref() {
        Expr::Binary {
            op: BinOp::Or,
            right,
            ..
        } => assert!(matches!(
            right.as_ref(),
            Expr::Binary { op: BinOp::And, .. }
        )),
        other => panic!("expected or at root, got {:?}", other),
    }
}

#[test]
fn test_word_operators_parse() {
    assert!(holds("Id eq 1 and Name ne 'x'", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("Id eq 9 or Name eq 'Joe'", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("not (Id eq 9)", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("Id add 1 eq 2", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("Id mul 3 eq 3", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("Id mod 2 eq 1", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_relational_string_lowering() {
    // Name lt 'b' compiles to compare(Name, 'b') < 0.
    let lambda = predicate("Name lt 'b'");
    match lambda.body.as_ref() {
        Expr::Binary {
            op: BinOp::LessThan,
            left,
            right,
            ..
        } => {
            assert!(matches!(
                left.as_ref(),
                Expr::Call { function: BuiltinFn::Compare, .. }
            ));
            assert!(matches!(
                right.as_ref(),
                Expr::Constant { value: Value::Int32(0), .. }
            ));
        }
        other => panic!("expected lowered comparison, got {:?}", other),
    }
    assert!(holds("Name lt 'b'", &customer(1, "Ann", 0.0, None, 0)));
    assert!(!holds("Name lt 'b'", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_mapped_function_argument_order() {
    // startswith(Name, 'J') calls the receiver-first builtin.
    let lambda = predicate("startswith(Name, 'J')");
    match lambda.body.as_ref() {
        Expr::Call {
            function: BuiltinFn::StartsWith,
            instance: Some(instance),
            args,
            ..
        } => {
            assert!(matches!(
                instance.as_ref(),
                Expr::Field { name, .. } if name == "Name"
            ));
            assert!(matches!(
                args[0].as_ref(),
                Expr::Constant { value: Value::String(s), .. } if s == "J"
            ));
        }
        other => panic!("expected startswith call, got {:?}", other),
    }
}

#[test]
fn test_substringof_swaps_arguments() {
    let lambda = predicate("substringof('oe', Name)");
    match lambda.body.as_ref() {
        Expr::Call {
            function: BuiltinFn::Contains,
            instance: Some(instance),
            args,
            ..
        } => {
            assert!(matches!(
                instance.as_ref(),
                Expr::Field { name, .. } if name == "Name"
            ));
            assert!(matches!(
                args[0].as_ref(),
                Expr::Constant { value: Value::String(s), .. } if s == "oe"
            ));
        }
        other => panic!("expected contains call, got {:?}", other),
    }
    assert!(holds("substringof('oe', Name)", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_unary_minus_folds_into_literal() {
    let lambda = predicate("Id eq -1");
    match lambda.body.as_ref() {
        Expr::Binary { right, .. } => assert!(matches!(
            right.as_ref(),
            Expr::Constant { value: Value::Int32(-1), .. }
        )),
        other => panic!("expected equality, got {:?}", other),
    }
}

#[test]
fn test_not_operator_node() {
    let lambda = predicate("!(Id eq 1)");
    assert!(matches!(
        lambda.body.as_ref(),
        Expr::Unary { op: UnOp::Not, .. }
    ));
}

// ============================================================================
// Promotion and overload resolution
// ============================================================================

#[test]
fn test_int_field_widens_against_double() {
    // Id (int) against Total (double) resolves to the double signature.
    assert!(holds("Id lt Total", &customer(1, "Joe", 2.5, None, 0)));
}

#[test]
fn test_nullable_comparison_null_is_false() {
    assert!(holds("Age gt 30", &customer(1, "Joe", 0.0, Some(40), 0)));
    assert!(!holds("Age gt 30", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_null_literal_equality() {
    assert!(holds("Age eq null", &customer(1, "Joe", 0.0, None, 0)));
    assert!(!holds("Age eq null", &customer(1, "Joe", 0.0, Some(7), 0)));
    assert!(holds("Age ne null", &customer(1, "Joe", 0.0, Some(7), 0)));
}

#[test]
fn test_ambiguous_overload_is_rejected() {
    // round over an int argument converts equally well to the double and
    // decimal overloads; the query is rejected, never silently resolved.
    let err = parse_predicate(&customer_schema(), "round(Id) gt 1", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Semantic);
    assert!(err.message.contains("Ambiguous"), "{}", err.message);
}

#[test]
fn test_incompatible_operands_rejected() {
    let err = parse_predicate(&customer_schema(), "Name gt 5", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Semantic);
    assert!(err.message.contains("incompatible"), "{}", err.message);
}

#[test]
fn test_filter_body_must_be_boolean() {
    let err = parse_predicate(&customer_schema(), "Id add 1", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Semantic);
    assert!(err.message.contains("bool"), "{}", err.message);
}

#[test]
fn test_unknown_identifier() {
    let err = parse_predicate(&customer_schema(), "Bogus eq 1", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Semantic);
    assert!(err.message.contains("Bogus"), "{}", err.message);
}

#[test]
fn test_receiver_type_checked_for_mapped_functions() {
    let err = parse_predicate(&customer_schema(), "startswith(Id, 'x')", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Semantic);
}

// ============================================================================
// Enums
// ============================================================================

#[test]
fn test_enum_compares_by_member_name() {
    assert!(holds("Status eq 'Suspended'", &customer(1, "Joe", 0.0, None, 1)));
    assert!(!holds("Status eq 'Suspended'", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_enum_compares_by_underlying_value() {
    assert!(holds("Status eq 2", &customer(1, "Joe", 0.0, None, 2)));
    assert!(holds("Status lt 2", &customer(1, "Joe", 0.0, None, 1)));
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn test_aggregate_synthesizes_element_lambda() {
    let lambda = predicate("Orders.any(Total gt 100)");
    match lambda.body.as_ref() {
        Expr::Aggregate { selector, .. } => {
            let selector = selector.as_ref().expect("selector lambda");
            assert!(!Arc::ptr_eq(&selector.param, &lambda.param));
        }
        other => panic!("expected aggregate, got {:?}", other),
    }
    assert!(holds("Orders.any(Total gt 100)", &customer(1, "Joe", 0.0, None, 0)));
    assert!(!holds("Orders.all(Total gt 100)", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_aggregate_count_and_sum() {
    let row = customer(1, "Joe", 0.0, None, 0);
    assert!(holds("Orders.count() eq 2", &row));
    assert!(holds("Orders.count(Open) eq 1", &row));
    assert!(holds("Orders.sum(Total) eq 150.0", &row));
    assert!(holds("Orders.min(Total) eq 30.0", &row));
    assert!(holds("Tags.count() eq 2", &row));
}

#[test]
fn test_aggregate_path_syntax() {
    // The OData path separator works for member access too.
    assert!(holds("Orders/any(Open)", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_unknown_aggregate_rejected() {
    let err = parse_predicate(&customer_schema(), "Orders.median(Total) gt 1", None).unwrap_err();
    assert!(err.message.contains("aggregate"), "{}", err.message);
}

// ============================================================================
// Element access, literals, conditional
// ============================================================================

#[test]
fn test_sequence_indexing() {
    assert!(holds("Tags[0] eq 'new'", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_binary_literal_indexing() {
    assert!(holds("binary'0a10'[1] eq 16", &customer(1, "Joe", 0.0, None, 0)));
}

#[test]
fn test_guid_and_datetime_literals() {
    let row = customer(1, "Joe", 0.0, None, 0);
    assert!(holds(
        "guid'0e984725-c51c-4bf4-9960-e1c80e27aba0' eq guid'0E984725-C51C-4BF4-9960-E1C80E27ABA0'",
        &row
    ));
    assert!(holds(
        "datetime'2001-02-03T04:05:06' gt datetime'2001-02-03'",
        &row
    ));
    assert!(holds("time'01:30:00' gt time'00:45:00'", &row));
}

#[test]
fn test_malformed_type_literal_wraps_cause() {
    let err = parse_predicate(&customer_schema(), "guid'nope' eq guid'nope'", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert!(err.position > 0);
}

#[test]
fn test_conditional_expression() {
    let row = customer(1, "Joe", 0.0, None, 0);
    assert!(holds("(Id gt 0 ? 'big' : 'small') eq 'big'", &row));
}

#[test]
fn test_string_concat_operators() {
    let row = customer(7, "Joe", 0.0, None, 0);
    assert!(holds("(Name & '!') eq 'Joe!'", &row));
    assert!(holds("(Name add '!') eq 'Joe!'", &row));
    assert!(holds("('#' & Id) eq '#7'", &row));
}

#[test]
fn test_decimal_literal_arithmetic() {
    let row = customer(1, "Joe", 0.0, None, 0);
    assert!(holds("1.1m add 2.2m eq 3.3m", &row));
}

// ============================================================================
// Depth limit and syntax errors
// ============================================================================

#[test]
fn test_depth_limit() {
    let mut text = String::new();
    for _ in 0..80 {
        text.push('(');
    }
    text.push_str("Id eq 1");
    for _ in 0..80 {
        text.push(')');
    }
    let err = parse_predicate(&customer_schema(), &text, None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
    assert!(err.message.contains("nested"), "{}", err.message);
}

#[test]
fn test_missing_close_paren() {
    let err = parse_predicate(&customer_schema(), "(Id eq 1", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
}

#[test]
fn test_trailing_tokens_rejected() {
    let err = parse_predicate(&customer_schema(), "Id eq 1 1", None).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Syntax);
}

// ============================================================================
// Orderings
// ============================================================================

#[test]
fn test_ordering_round_trip() {
    let (_, orderings) = parse_orderings(&customer_schema(), "Total desc,Id", None).unwrap();
    assert_eq!(orderings.len(), 2);
    assert!(!orderings[0].ascending);
    assert!(matches!(
        orderings[0].selector.as_ref(),
        Expr::Field { name, .. } if name == "Total"
    ));
    assert!(orderings[1].ascending);
    assert!(matches!(
        orderings[1].selector.as_ref(),
        Expr::Field { name, .. } if name == "Id"
    ));
}

#[test]
fn test_ordering_verbose_suffixes() {
    let (_, orderings) =
        parse_orderings(&customer_schema(), "Id ascending,Name descending", None).unwrap();
    assert!(orderings[0].ascending);
    assert!(!orderings[1].ascending);
}

#[test]
fn test_case_insensitive_field_lookup() {
    assert!(holds("name eq 'Joe'", &customer(1, "Joe", 0.0, None, 0)));
    assert!(holds("NAME eq 'Joe'", &customer(1, "Joe", 0.0, None, 0)));
}
