//! Rebasing a compiled plan onto a caller's source.
//!
//! The orchestrator builds its plan over an empty placeholder source. To
//! execute against live data, the plan tree is walked and the constant
//! source at its root is replaced with the real source's plan; every other
//! node is rebuilt around the rebased input with its lambdas shared, not
//! copied. Nothing is evaluated or materialized here.

use std::sync::Arc;

use crate::errors::QueryError;
use crate::queryable::{Plan, Queryable};

/// Transplants `query`'s plan onto `source`. The two must share an element
/// schema. Composing an already-composed query with the same source yields
/// a structurally identical plan.
pub fn compose(source: &Queryable, query: &Queryable) -> Result<Queryable, QueryError> {
    if source.schema() != query.schema() {
        return Err(QueryError::Composition {
            expected: query.schema().name.clone(),
            actual: source.schema().name.clone(),
        });
    }
    let plan = rebase(query.plan(), source.plan());
    Ok(Queryable::from_parts(source.schema().clone(), plan))
}

fn rebase(node: &Arc<Plan>, root: &Arc<Plan>) -> Arc<Plan> {
    match node.as_ref() {
        Plan::Source { .. } => root.clone(),
        Plan::Where { input, predicate } => Arc::new(Plan::Where {
            input: rebase(input, root),
            predicate: predicate.clone(),
        }),
        Plan::Sort {
            input,
            key,
            ascending,
            is_then,
        } => Arc::new(Plan::Sort {
            input: rebase(input, root),
            key: key.clone(),
            ascending: *ascending,
            is_then: *is_then,
        }),
        Plan::Skip { input, count } => Arc::new(Plan::Skip {
            input: rebase(input, root),
            count: *count,
        }),
        Plan::Take { input, count } => Arc::new(Plan::Take {
            input: rebase(input, root),
            count: *count,
        }),
    }
}
