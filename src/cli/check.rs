//! Apply OData query strings to JSON row sets

use super::{rows_to_json, CliError};
use crate::{apply_query_string, infer_schema, rows_from_json, DefaultValidator, Queryable};

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// The query string to apply, e.g. `$filter=Name eq 'Joe'&$top=5`
    pub query: String,
    /// JSON input: an array of row objects
    pub input: Option<String>,
    /// Pretty-print the output
    pub pretty: bool,
    /// Only compile the query, don't execute
    pub syntax_only: bool,
}

/// Result of a check operation
#[derive(Debug)]
pub enum CheckResult {
    /// The query compiled against the inferred schema
    SyntaxValid,
    /// The query executed; the surviving rows as JSON
    Success(serde_json::Value),
}

/// Execute a check operation
pub fn execute_check(options: &CheckOptions) -> Result<CheckResult, CliError> {
    let json_str = options.input.as_ref().ok_or(CliError::NoInput)?;
    let json: serde_json::Value = serde_json::from_str(json_str)?;
    let json_rows = json
        .as_array()
        .ok_or(CliError::Schema(crate::schema::SchemaError::ExpectedObjects))?;

    let schema = infer_schema("row", json_rows)?;
    let rows = rows_from_json(&schema, json_rows)?;
    let source = Queryable::over(schema, rows);

    let composed = apply_query_string(&source, &options.query, &DefaultValidator, None)?;
    if options.syntax_only {
        return Ok(CheckResult::SyntaxValid);
    }

    let result = composed.execute()?;
    Ok(CheckResult::Success(rows_to_json(&result)))
}
