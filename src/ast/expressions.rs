use std::sync::Arc;

use crate::ast::operators::{AggregateOp, BinOp, UnOp};
use crate::ast::types::Ty;
use crate::functions::BuiltinFn;
use crate::value::Value;

/// A lambda parameter. Parameters are compared by identity (`Arc` pointer),
/// never by name: the row parameter is unnamed, and each aggregate call
/// introduces its own anonymous element parameter.
#[derive(Debug)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

impl Param {
    pub fn unnamed(ty: Ty) -> Arc<Param> {
        Arc::new(Param {
            name: String::new(),
            ty,
        })
    }
}

/// A typed query-expression node.
///
/// Nodes are immutable once built and shared via `Arc`: applying further
/// query operations, rebasing a plan onto a new source, and validating all
/// reuse subtrees without copying them. Every node carries the semantic type
/// the parser resolved for it.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Literal constant. `text` keeps the source spelling of numeric and
    /// string literals so overload resolution can re-read them at another
    /// numeric type or as an enum member name.
    Constant {
        value: Value,
        ty: Ty,
        text: Option<String>,
    },

    /// Reference to a lambda parameter (the row, or an aggregate element).
    Parameter(Arc<Param>),

    /// Field access on a record-typed instance. `index` is the field's
    /// position in the instance's schema.
    Field {
        instance: Arc<Expr>,
        name: String,
        index: usize,
        ty: Ty,
    },

    Unary {
        op: UnOp,
        operand: Arc<Expr>,
        ty: Ty,
    },

    Binary {
        op: BinOp,
        left: Arc<Expr>,
        right: Arc<Expr>,
        ty: Ty,
    },

    /// Numeric widening, nullable wrapping, or enum-to-underlying conversion
    /// inserted by promotion.
    Convert {
        operand: Arc<Expr>,
        ty: Ty,
    },

    /// A call to a built-in function from the closed mapped-function table,
    /// or one synthesized by the parser (string compare, dynamic concat).
    Call {
        function: BuiltinFn,
        instance: Option<Arc<Expr>>,
        args: Vec<Arc<Expr>>,
        ty: Ty,
    },

    /// A sequence aggregate over a collection-typed member.
    ///
    /// `selector` is the per-element sub-lambda synthesized when the call
    /// supplied an argument expression (`Orders.any(Total gt 100)`).
    Aggregate {
        source: Arc<Expr>,
        op: AggregateOp,
        selector: Option<QueryLambda>,
        ty: Ty,
    },

    /// Rank-1 element access: `Tags[0]`, `Payload[3]`.
    Index {
        instance: Arc<Expr>,
        index: Arc<Expr>,
        ty: Ty,
    },

    /// `test ? if_true : if_false`, branches reconciled by promotion.
    Conditional {
        test: Arc<Expr>,
        if_true: Arc<Expr>,
        if_false: Arc<Expr>,
        ty: Ty,
    },
}

impl Expr {
    pub fn ty(&self) -> &Ty {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Field { ty, .. }
            | Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Convert { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Aggregate { ty, .. }
            | Expr::Index { ty, .. }
            | Expr::Conditional { ty, .. } => ty,
            Expr::Parameter(param) => &param.ty,
        }
    }

    pub fn constant(value: Value, ty: Ty) -> Expr {
        Expr::Constant {
            value,
            ty,
            text: None,
        }
    }

    /// True for a literal `null` (or a null constant already promoted to a
    /// concrete type); comparison and promotion special-case these.
    pub fn is_null_constant(&self) -> bool {
        matches!(
            self,
            Expr::Constant {
                value: Value::Null,
                ..
            }
        )
    }
}

/// A single-parameter typed lambda: the unit the dynamic-queryable
/// operations accept for predicates and sort selectors.
#[derive(Debug, Clone)]
pub struct QueryLambda {
    pub param: Arc<Param>,
    pub body: Arc<Expr>,
}

/// One `$orderby` term: a selector over the row parameter plus direction.
/// List order is significant; the first term is the primary sort.
#[derive(Debug, Clone)]
pub struct DynamicOrdering {
    pub selector: Arc<Expr>,
    pub ascending: bool,
}
