// tests/cli_tests.rs

#![cfg(feature = "cli")]

use dynq::cli::{execute_check, CheckOptions, CheckResult, CliError};

const ROWS: &str = r#"[
    {"Id": 1, "Name": "Joe"},
    {"Id": 2, "Name": "Ann"},
    {"Id": 3, "Name": "Bob"},
    {"Id": 4, "Name": "Joe"}
]"#;

fn check(query: &str) -> Result<CheckResult, CliError> {
    execute_check(&CheckOptions {
        query: query.to_string(),
        input: Some(ROWS.to_string()),
        pretty: false,
        syntax_only: false,
    })
}

#[test]
fn test_check_filters_rows() {
    match check("$filter=Name eq 'Joe'&$orderby=Id desc").unwrap() {
        CheckResult::Success(json) => {
            let rows = json.as_array().unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0]["Id"], 4);
            assert_eq!(rows[1]["Id"], 1);
        }
        other => panic!("expected rows, got {:?}", other),
    }
}

#[test]
fn test_check_syntax_only() {
    let result = execute_check(&CheckOptions {
        query: "$filter=Id gt 1".to_string(),
        input: Some(ROWS.to_string()),
        pretty: false,
        syntax_only: true,
    })
    .unwrap();
    assert!(matches!(result, CheckResult::SyntaxValid));
}

#[test]
fn test_check_reports_query_errors() {
    match check("$top=abc") {
        Err(CliError::Query(e)) => assert!(e.to_string().contains("$top"), "{}", e),
        other => panic!("expected query error, got {:?}", other),
    }
}

#[test]
fn test_check_requires_input() {
    let err = execute_check(&CheckOptions {
        query: "$top=1".to_string(),
        input: None,
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, CliError::NoInput));
}

#[test]
fn test_check_rejects_non_array_input() {
    let err = execute_check(&CheckOptions {
        query: "$top=1".to_string(),
        input: Some("{\"Id\": 1}".to_string()),
        ..Default::default()
    })
    .unwrap_err();
    assert!(matches!(err, CliError::Schema(_)));
}
