//! Queryable sources and the dynamic-queryable operations.
//!
//! A [`Queryable`] pairs an element schema with an immutable plan tree.
//! Applying `where_`/`order_by`/`skip`/`take` never mutates the receiver:
//! each operation wraps the current plan in a new node and returns a new
//! `Queryable`, sharing every prior node. The operations are typed - they
//! take parsed lambdas, not expression text - so a plan that builds is a
//! plan that evaluates.

use std::sync::Arc;

use crate::ast::types::{Ty, TyKind};
use crate::ast::{DynamicOrdering, Param, QueryLambda};
use crate::errors::QueryError;
use crate::evaluator::{self, EvalError};
use crate::schema::Schema;
use crate::value::Value;

/// One node of a query plan.
///
/// The shape mirrors the method-call chains the operations build: a
/// constant source at the bottom, operator nodes above it. `Sort` chains
/// carry a primary node (`is_then == false`) followed by secondary
/// `is_then` nodes, one per additional ordering term.
#[derive(Debug, Clone)]
pub enum Plan {
    /// A constant holding a row set: either the placeholder an orchestrated
    /// query is built over, or the caller's live data.
    Source {
        schema: Arc<Schema>,
        rows: Arc<Vec<Value>>,
    },
    Where {
        input: Arc<Plan>,
        predicate: QueryLambda,
    },
    Sort {
        input: Arc<Plan>,
        key: QueryLambda,
        ascending: bool,
        is_then: bool,
    },
    Skip {
        input: Arc<Plan>,
        count: usize,
    },
    Take {
        input: Arc<Plan>,
        count: usize,
    },
}

/// A composable queryable source over a fixed element schema.
#[derive(Debug, Clone)]
pub struct Queryable {
    schema: Arc<Schema>,
    plan: Arc<Plan>,
}

impl Queryable {
    /// The empty placeholder source the orchestrator builds plans against.
    pub fn empty(schema: Arc<Schema>) -> Queryable {
        Queryable::over(schema, Vec::new())
    }

    /// Wraps caller-owned rows as a queryable source.
    pub fn over(schema: Arc<Schema>, rows: Vec<Value>) -> Queryable {
        let plan = Arc::new(Plan::Source {
            schema: schema.clone(),
            rows: Arc::new(rows),
        });
        Queryable { schema, plan }
    }

    pub(crate) fn from_parts(schema: Arc<Schema>, plan: Arc<Plan>) -> Queryable {
        Queryable { schema, plan }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// Attaches a filter. The predicate must be a boolean lambda over this
    /// source's element type.
    pub fn where_(&self, predicate: QueryLambda) -> Result<Queryable, QueryError> {
        self.check_lambda(&predicate)?;
        if !predicate.body.ty().is_bool() {
            return Err(QueryError::Composition {
                expected: "bool".to_string(),
                actual: predicate.body.ty().name(),
            });
        }
        Ok(Queryable {
            schema: self.schema.clone(),
            plan: Arc::new(Plan::Where {
                input: self.plan.clone(),
                predicate,
            }),
        })
    }

    /// Attaches the ordering list: the first term through a primary sort
    /// node, every further term through a secondary "then" node.
    pub fn order_by(
        &self,
        param: &Arc<Param>,
        orderings: &[DynamicOrdering],
    ) -> Result<Queryable, QueryError> {
        let mut plan = self.plan.clone();
        let mut is_then = false;
        for ordering in orderings {
            let key = QueryLambda {
                param: param.clone(),
                body: ordering.selector.clone(),
            };
            self.check_lambda(&key)?;
            plan = Arc::new(Plan::Sort {
                input: plan,
                key,
                ascending: ordering.ascending,
                is_then,
            });
            is_then = true;
        }
        Ok(Queryable {
            schema: self.schema.clone(),
            plan,
        })
    }

    pub fn skip(&self, count: usize) -> Queryable {
        Queryable {
            schema: self.schema.clone(),
            plan: Arc::new(Plan::Skip {
                input: self.plan.clone(),
                count,
            }),
        }
    }

    pub fn take(&self, count: usize) -> Queryable {
        Queryable {
            schema: self.schema.clone(),
            plan: Arc::new(Plan::Take {
                input: self.plan.clone(),
                count,
            }),
        }
    }

    /// Runs the plan against its source rows.
    pub fn execute(&self) -> Result<Vec<Value>, EvalError> {
        evaluator::run_plan(&self.plan)
    }

    fn check_lambda(&self, lambda: &QueryLambda) -> Result<(), QueryError> {
        let expected = Ty::new(TyKind::Record(self.schema.clone()));
        if lambda.param.ty != expected {
            return Err(QueryError::Composition {
                expected: self.schema.name.clone(),
                actual: lambda.param.ty.name(),
            });
        }
        Ok(())
    }
}
