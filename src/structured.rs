//! Structured-query extraction and orchestration.
//!
//! Extraction turns a URI query string into the ordered list of recognized
//! `$`-operator parts; orchestration compiles each part and applies it to
//! a placeholder queryable of the target element type. Application order
//! is fixed (filter, orderby, skip, top) through an explicit priority
//! table - not the accident of alphabetical operator names - so adding an
//! operator later cannot silently reorder execution.

use std::fmt;
use std::sync::Arc;

use crate::composer::compose;
use crate::errors::QueryError;
use crate::parser::{parse_orderings, parse_predicate, QueryResolver};
use crate::queryable::Queryable;
use crate::schema::Schema;
use crate::validator::QueryValidator;

/// The recognized query operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    Filter,
    OrderBy,
    Skip,
    Top,
}

impl QueryOperator {
    /// Parses the operator name with its leading `$` already stripped.
    pub fn parse(name: &str) -> Option<QueryOperator> {
        match name {
            "filter" => Some(QueryOperator::Filter),
            "orderby" => Some(QueryOperator::OrderBy),
            "skip" => Some(QueryOperator::Skip),
            "top" => Some(QueryOperator::Top),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryOperator::Filter => "filter",
            QueryOperator::OrderBy => "orderby",
            QueryOperator::Skip => "skip",
            QueryOperator::Top => "top",
        }
    }

    /// Canonical application order. Parts sort by this, stably, so
    /// repeated occurrences of one operator keep their textual order.
    pub fn priority(self) -> u8 {
        match self {
            QueryOperator::Filter => 0,
            QueryOperator::OrderBy => 1,
            QueryOperator::Skip => 2,
            QueryOperator::Top => 3,
        }
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.as_str())
    }
}

/// One extracted query operator with its raw expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredQueryPart {
    pub operator: QueryOperator,
    pub expression: String,
}

impl fmt::Display for StructuredQueryPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.operator.as_str(), self.expression)
    }
}

/// The ordered decomposition of a request's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredQuery {
    pub parts: Vec<StructuredQueryPart>,
}

impl StructuredQuery {
    /// Extracts the structured query from a raw (possibly still
    /// percent-encoded) URI query string. A leading `?` is tolerated.
    pub fn from_query_str(query: &str) -> StructuredQuery {
        let query = query.strip_prefix('?').unwrap_or(query);
        StructuredQuery::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Extracts the structured query from already-decoded key/value pairs.
    /// Keys without a `$` prefix and unrecognized `$` operators are
    /// skipped; repeated keys yield repeated parts.
    pub fn from_pairs<I, K, V>(pairs: I) -> StructuredQuery
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut parts: Vec<StructuredQueryPart> = pairs
            .into_iter()
            .filter_map(|(key, value)| {
                let name = key.as_ref().strip_prefix('$')?;
                let operator = QueryOperator::parse(name)?;
                Some(StructuredQueryPart {
                    operator,
                    expression: value.into(),
                })
            })
            .collect();
        parts.sort_by_key(|part| part.operator.priority());
        StructuredQuery { parts }
    }
}

/// Compiles a structured query into a plan over an empty placeholder
/// source of the given element type, applying each part in canonical
/// order. Every failure is wrapped with the `$`-operator it came from.
pub fn deserialize(
    schema: &Arc<Schema>,
    query: &StructuredQuery,
    resolver: Option<&dyn QueryResolver>,
) -> Result<Queryable, QueryError> {
    let mut queryable = Queryable::empty(schema.clone());
    for part in &query.parts {
        queryable = apply_part(&queryable, part, resolver)?;
    }
    Ok(queryable)
}

fn apply_part(
    queryable: &Queryable,
    part: &StructuredQueryPart,
    resolver: Option<&dyn QueryResolver>,
) -> Result<Queryable, QueryError> {
    let operator = part.operator;
    match operator {
        QueryOperator::Filter => {
            let predicate = parse_predicate(queryable.schema(), &part.expression, resolver)
                .map_err(|source| QueryError::Clause { operator, source })?;
            queryable.where_(predicate)
        }
        QueryOperator::OrderBy => {
            let (param, orderings) =
                parse_orderings(queryable.schema(), &part.expression, resolver)
                    .map_err(|source| QueryError::Clause { operator, source })?;
            queryable.order_by(&param, &orderings)
        }
        QueryOperator::Skip => {
            let count = parse_count(operator, &part.expression)?;
            Ok(queryable.skip(count))
        }
        QueryOperator::Top => {
            let count = parse_count(operator, &part.expression)?;
            Ok(queryable.take(count))
        }
    }
}

/// `$skip`/`$top` values must be non-negative base-10 integers. The
/// original conversion failure text is preserved in the error.
fn parse_count(operator: QueryOperator, expression: &str) -> Result<usize, QueryError> {
    let count: i32 = expression
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| QueryError::Range {
            operator,
            message: format!("'{}': {}", expression, e),
        })?;
    if count < 0 {
        return Err(QueryError::Range {
            operator,
            message: format!("a non-negative integer is required, found '{}'", expression),
        });
    }
    Ok(count as usize)
}

/// The full pipeline over a live source: extract, compile over a
/// placeholder, rebase onto `source`, validate, and hand the composed
/// queryable back.
pub fn apply_query_string(
    source: &Queryable,
    query: &str,
    validator: &dyn QueryValidator,
    resolver: Option<&dyn QueryResolver>,
) -> Result<Queryable, QueryError> {
    let structured = StructuredQuery::from_query_str(query);
    let compiled = deserialize(source.schema(), &structured, resolver)?;
    let composed = compose(source, &compiled)?;
    validator.validate(&composed)?;
    Ok(composed)
}
