// tests/query_tests.rs

use std::sync::Arc;

use dynq::schema::{Field, Schema};
use dynq::value::{Record, Value};
use dynq::{
    apply_query_string, compose, deserialize, DefaultValidator, FieldPolicyValidator,
    QueryOperator, QueryError, Queryable, StructuredQuery, Ty, TyKind,
};

fn item_schema() -> Arc<Schema> {
    Schema::new(
        "Item",
        vec![
            Field::new("Id", Ty::new(TyKind::Int32)),
            Field::new("Name", Ty::new(TyKind::String)),
            Field::new("Group", Ty::new(TyKind::Int32)),
        ],
    )
}

fn item(id: i32, name: &str, group: i32) -> Value {
    Value::Record(Record::new(
        item_schema(),
        vec![
            Value::Int32(id),
            Value::String(name.to_string()),
            Value::Int32(group),
        ],
    ))
}

fn items() -> Vec<Value> {
    vec![
        item(1, "Joe", 2),
        item(2, "Ann", 1),
        item(3, "Bob", 2),
        item(4, "Joe", 1),
    ]
}

fn ids(rows: &[Value]) -> Vec<i32> {
    let schema = item_schema();
    let (index, _) = schema.field("Id").unwrap();
    rows.iter()
        .map(|row| match row {
            Value::Record(rec) => match rec.field(index) {
                Value::Int32(id) => *id,
                other => panic!("unexpected id {:?}", other),
            },
            other => panic!("expected record, got {:?}", other),
        })
        .collect()
}

fn run(query: &str) -> Result<Vec<Value>, QueryError> {
    let source = Queryable::over(item_schema(), items());
    let composed = apply_query_string(&source, query, &DefaultValidator, None)?;
    Ok(composed.execute().expect("execution failure"))
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn test_extraction_enforces_canonical_order() {
    let query =
        StructuredQuery::from_query_str("$top=2&$skip=1&$orderby=Id&$filter=Id gt 0");
    let operators: Vec<QueryOperator> = query.parts.iter().map(|p| p.operator).collect();
    assert_eq!(
        operators,
        vec![
            QueryOperator::Filter,
            QueryOperator::OrderBy,
            QueryOperator::Skip,
            QueryOperator::Top,
        ]
    );
}

#[test]
fn test_extraction_skips_unrecognized_parameters() {
    let query = StructuredQuery::from_query_str("$select=Name&page=3&$filter=Id gt 0");
    assert_eq!(query.parts.len(), 1);
    assert_eq!(query.parts[0].operator, QueryOperator::Filter);
}

#[test]
fn test_extraction_keeps_repeated_keys_in_order() {
    let query = StructuredQuery::from_query_str("$filter=Id gt 0&$filter=Id lt 10");
    assert_eq!(query.parts.len(), 2);
    assert_eq!(query.parts[0].expression, "Id gt 0");
    assert_eq!(query.parts[1].expression, "Id lt 10");
}

#[test]
fn test_extraction_percent_decodes() {
    let query = StructuredQuery::from_query_str("$filter=Name%20eq%20%27Joe%27");
    assert_eq!(query.parts[0].expression, "Name eq 'Joe'");
}

#[test]
fn test_extraction_tolerates_leading_question_mark() {
    let query = StructuredQuery::from_query_str("?$top=1");
    assert_eq!(query.parts.len(), 1);
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_filter_scenario() {
    let rows = run("$filter=Name eq 'Joe'").unwrap();
    assert_eq!(ids(&rows), vec![1, 4]);
}

#[test]
fn test_orderby_skip_top_scenario() {
    // Sorted descending by Id: [4,3,2,1]; skip 1, take 2 -> [3,2].
    let rows = run("$orderby=Id desc&$skip=1&$top=2").unwrap();
    assert_eq!(ids(&rows), vec![3, 2]);
}

#[test]
fn test_textual_order_does_not_matter() {
    let rows = run("$top=2&$skip=1&$orderby=Id desc").unwrap();
    assert_eq!(ids(&rows), vec![3, 2]);
}

#[test]
fn test_startswith_scenario() {
    let rows = run("$filter=startswith(Name,'J')").unwrap();
    assert_eq!(ids(&rows), vec![1, 4]);
}

#[test]
fn test_multi_key_ordering_with_then() {
    // Group ascending, then Id descending within each group.
    let rows = run("$orderby=Group,Id desc").unwrap();
    assert_eq!(ids(&rows), vec![4, 2, 3, 1]);
}

#[test]
fn test_filter_orderby_pipeline() {
    let rows = run("$filter=Id gt 1&$orderby=Name&$top=2").unwrap();
    assert_eq!(ids(&rows), vec![2, 3]);
}

#[test]
fn test_zero_skip_and_top_are_legal() {
    let rows = run("$skip=0&$top=0").unwrap();
    assert!(rows.is_empty());
    let rows = run("$skip=0").unwrap();
    assert_eq!(rows.len(), 4);
}

#[test]
fn test_skip_past_end() {
    let rows = run("$skip=10").unwrap();
    assert!(rows.is_empty());
}

// ============================================================================
// Boundary errors
// ============================================================================

#[test]
fn test_negative_skip_rejected() {
    match run("$skip=-1") {
        Err(QueryError::Range { operator, .. }) => assert_eq!(operator, QueryOperator::Skip),
        other => panic!("expected range error, got {:?}", other),
    }
}

#[test]
fn test_negative_top_rejected() {
    match run("$top=-1") {
        Err(QueryError::Range { operator, .. }) => assert_eq!(operator, QueryOperator::Top),
        other => panic!("expected range error, got {:?}", other),
    }
}

#[test]
fn test_non_numeric_top_names_operator_and_cause() {
    let err = run("$top=abc").unwrap_err();
    match &err {
        QueryError::Range { operator, message } => {
            assert_eq!(*operator, QueryOperator::Top);
            assert!(message.contains("abc"), "{}", message);
            assert!(message.contains("invalid digit"), "{}", message);
        }
        other => panic!("expected range error, got {:?}", other),
    }
    assert!(err.to_string().contains("$top"), "{}", err);
}

#[test]
fn test_filter_error_names_operator() {
    let err = run("$filter=Bogus eq 1").unwrap_err();
    match &err {
        QueryError::Clause { operator, source } => {
            assert_eq!(*operator, QueryOperator::Filter);
            assert!(source.message.contains("Bogus"));
        }
        other => panic!("expected clause error, got {:?}", other),
    }
    assert!(err.to_string().contains("$filter"), "{}", err);
}

#[test]
fn test_orderby_error_names_operator() {
    let err = run("$orderby=Bogus").unwrap_err();
    assert!(matches!(
        err,
        QueryError::Clause {
            operator: QueryOperator::OrderBy,
            ..
        }
    ));
}

// ============================================================================
// Composition
// ============================================================================

#[test]
fn test_composition_is_idempotent() {
    let source = Queryable::over(item_schema(), items());
    let structured = StructuredQuery::from_query_str("$filter=Id gt 1&$orderby=Id desc&$top=2");
    let compiled = deserialize(source.schema(), &structured, None).unwrap();

    let once = compose(&source, &compiled).unwrap();
    let twice = compose(&source, &once).unwrap();
    assert_eq!(format!("{:?}", once.plan()), format!("{:?}", twice.plan()));
    assert_eq!(ids(&twice.execute().unwrap()), vec![4, 3]);
}

#[test]
fn test_compose_rejects_mismatched_element_type() {
    let other = Schema::new("Other", vec![Field::new("X", Ty::new(TyKind::Int32))]);
    let source = Queryable::over(other, Vec::new());
    let structured = StructuredQuery::from_query_str("$top=1");
    let compiled = deserialize(&item_schema(), &structured, None).unwrap();
    assert!(matches!(
        compose(&source, &compiled),
        Err(QueryError::Composition { .. })
    ));
}

#[test]
fn test_compiled_plan_is_independent_of_source() {
    // The placeholder plan holds no rows; composing it onto two different
    // sources reads each source's data.
    let structured = StructuredQuery::from_query_str("$filter=Id gt 2");
    let compiled = deserialize(&item_schema(), &structured, None).unwrap();
    assert!(compiled.execute().unwrap().is_empty());

    let source = Queryable::over(item_schema(), items());
    let composed = compose(&source, &compiled).unwrap();
    assert_eq!(ids(&composed.execute().unwrap()), vec![3, 4]);

    let partial = Queryable::over(item_schema(), vec![item(9, "Zed", 1)]);
    let recomposed = compose(&partial, &compiled).unwrap();
    assert_eq!(ids(&recomposed.execute().unwrap()), vec![9]);
}

#[test]
fn test_source_rows_unaffected_by_operations() {
    let source = Queryable::over(item_schema(), items());
    let _narrowed = apply_query_string(&source, "$top=1", &DefaultValidator, None).unwrap();
    assert_eq!(source.execute().unwrap().len(), 4);
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validator_runs_after_composition() {
    let source = Queryable::over(item_schema(), items());
    let validator = FieldPolicyValidator::new(["Id"]);
    let err =
        apply_query_string(&source, "$filter=Name eq 'Joe'", &validator, None).unwrap_err();
    match err {
        QueryError::Rejected(message) => assert!(message.contains("Name"), "{}", message),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn test_validator_accepts_allowed_fields() {
    let source = Queryable::over(item_schema(), items());
    let validator = FieldPolicyValidator::new(["Id"]);
    let composed =
        apply_query_string(&source, "$filter=Id gt 2&$orderby=Id", &validator, None).unwrap();
    assert_eq!(ids(&composed.execute().unwrap()), vec![3, 4]);
}
