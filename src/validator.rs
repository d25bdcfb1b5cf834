//! The pluggable validation hook run over composed queries.
//!
//! Validation happens after composition and before the plan is handed
//! back, so a policy failure never reaches execution. The default
//! validator accepts everything; [`FieldPolicyValidator`] walks every
//! expression in the plan and rejects field accesses outside an
//! allow-list.

use std::collections::HashSet;

use crate::ast::Expr;
use crate::errors::QueryError;
use crate::queryable::{Plan, Queryable};

pub trait QueryValidator {
    fn validate(&self, query: &Queryable) -> Result<(), QueryError>;
}

/// Accepts every query.
#[derive(Debug, Default)]
pub struct DefaultValidator;

impl QueryValidator for DefaultValidator {
    fn validate(&self, _query: &Queryable) -> Result<(), QueryError> {
        Ok(())
    }
}

/// Rejects queries touching fields outside the allow-list.
#[derive(Debug)]
pub struct FieldPolicyValidator {
    allowed: HashSet<String>,
}

impl FieldPolicyValidator {
    pub fn new<I, S>(allowed: I) -> FieldPolicyValidator
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldPolicyValidator {
            allowed: allowed.into_iter().map(|s| s.into().to_lowercase()).collect(),
        }
    }
}

impl QueryValidator for FieldPolicyValidator {
    fn validate(&self, query: &Queryable) -> Result<(), QueryError> {
        let mut rejected: Option<String> = None;
        for_each_expr(query.plan(), &mut |expr| {
            if let Expr::Field { name, .. } = expr {
                if rejected.is_none() && !self.allowed.contains(&name.to_lowercase()) {
                    rejected = Some(name.clone());
                }
            }
        });
        match rejected {
            Some(name) => Err(QueryError::Rejected(format!(
                "unknown property or field '{}'",
                name
            ))),
            None => Ok(()),
        }
    }
}

/// Walks every expression node reachable from a plan, depth-first.
pub fn for_each_expr(plan: &Plan, visit: &mut dyn FnMut(&Expr)) {
    match plan {
        Plan::Source { .. } => {}
        Plan::Where { input, predicate } => {
            for_each_expr(input, visit);
            walk_expr(&predicate.body, visit);
        }
        Plan::Sort { input, key, .. } => {
            for_each_expr(input, visit);
            walk_expr(&key.body, visit);
        }
        Plan::Skip { input, .. } | Plan::Take { input, .. } => {
            for_each_expr(input, visit);
        }
    }
}

fn walk_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Constant { .. } | Expr::Parameter(_) => {}
        Expr::Field { instance, .. } => walk_expr(instance, visit),
        Expr::Unary { operand, .. } | Expr::Convert { operand, .. } => walk_expr(operand, visit),
        Expr::Binary { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Call {
            instance, args, ..
        } => {
            if let Some(instance) = instance {
                walk_expr(instance, visit);
            }
            for arg in args {
                walk_expr(arg, visit);
            }
        }
        Expr::Aggregate {
            source, selector, ..
        } => {
            walk_expr(source, visit);
            if let Some(selector) = selector {
                walk_expr(&selector.body, visit);
            }
        }
        Expr::Index {
            instance, index, ..
        } => {
            walk_expr(instance, visit);
            walk_expr(index, visit);
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
            ..
        } => {
            walk_expr(test, visit);
            walk_expr(if_true, visit);
            walk_expr(if_false, visit);
        }
    }
}
