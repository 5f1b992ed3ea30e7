//! Value/term adapter: the bidirectional mapping between graph values
//! and expression terms.
//!
//! Decomposition exposes a non-leaf value as `(operator, operands...)`
//! with the originating value recorded as the term's identity cache;
//! reification runs the other way, returning the cached value for
//! unmodified terms and delegating node construction to the operator
//! library for terms the search engine built fresh.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::graph::{GraphStore, NodeId, OpApplyError, OpId, ValueId};
use crate::term::{ExprTuple, Term, TermHead};

#[cfg(feature = "tracing")]
use crate::trace::trace;

/// Local adapter failures. Both collapse to "no match" at the rewrite
/// layer; neither is a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// The value is a leaf: it has no owning node to decompose into.
    NotDecomposable(ValueId),
    /// An operator rejected its operands during composition.
    Apply(OpApplyError),
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::NotDecomposable(v) => {
                write!(f, "value v{} is a leaf and cannot be decomposed", v.raw())
            }
            AdapterError::Apply(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AdapterError {}

impl From<OpApplyError> for AdapterError {
    fn from(e: OpApplyError) -> Self {
        AdapterError::Apply(e)
    }
}

/// Result of composing an operator with concrete operands: the node's
/// canonical output when it declares one (or has exactly one), else
/// the whole multi-output node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composite {
    Value(ValueId),
    Node(NodeId),
}

/// Operator of the value's owning node.
pub fn operator_of(store: &GraphStore, value: ValueId) -> Result<OpId, AdapterError> {
    let owner = store
        .owner(value)
        .ok_or(AdapterError::NotDecomposable(value))?;
    store
        .op_of(owner.node)
        .ok_or(AdapterError::NotDecomposable(value))
}

/// Ordered input list of the value's owning node.
pub fn operands_of(
    store: &GraphStore,
    value: ValueId,
) -> Result<SmallVec<[ValueId; 4]>, AdapterError> {
    let owner = store
        .owner(value)
        .ok_or(AdapterError::NotDecomposable(value))?;
    store
        .inputs_of(owner.node)
        .ok_or(AdapterError::NotDecomposable(value))
}

/// Decompose a non-leaf value into the full term
/// `(operator, operands...)`, caching the value for identity-preserving
/// reification.
pub fn decompose(store: &GraphStore, value: ValueId) -> Result<Term, AdapterError> {
    let op = operator_of(store, value)?;
    let tail = operands_of(store, value)?
        .into_iter()
        .map(Term::Value)
        .collect();
    Ok(Term::Expr(Arc::new(ExprTuple::with_evaled(
        TermHead::Op(op),
        tail,
        value,
    ))))
}

/// The operand-only tail view of a value's decomposition.
///
/// A tail alone cannot be reified without its head, so this view
/// carries no identity cache.
pub fn tail_of(store: &GraphStore, value: ValueId) -> Result<Vec<Term>, AdapterError> {
    Ok(operands_of(store, value)?
        .into_iter()
        .map(Term::Value)
        .collect())
}

/// Apply an operator to concrete operand values, delegating node
/// construction to the operator library.
pub fn compose(
    store: &GraphStore,
    op: OpId,
    operands: &[ValueId],
) -> Result<Composite, OpApplyError> {
    let node = store.apply(op, operands)?;
    match store.canonical_output(node) {
        Some(value) => Ok(Composite::Value(value)),
        None => Ok(Composite::Node(node)),
    }
}

/// Recover a concrete graph object from a term.
///
/// A cached origin wins and is returned by identity. A cache-less
/// expression is evaluated bottom-up through `compose`; residual logic
/// variables in head or operand position make the term unevaluable and
/// surface as an application error.
pub fn reify(store: &GraphStore, term: &Term) -> Result<Composite, AdapterError> {
    match term {
        Term::Value(v) => Ok(Composite::Value(*v)),
        Term::Expr(e) => {
            if let Some(v) = e.evaled() {
                #[cfg(feature = "tracing")]
                trace!(value = v.raw(), "reify_cached");
                return Ok(Composite::Value(v));
            }
            let op = match e.head() {
                TermHead::Op(op) => op,
                TermHead::Var(_) => {
                    return Err(OpApplyError::new(
                        "unresolved logic variable in operator position",
                    )
                    .into())
                }
            };
            let mut operands: SmallVec<[ValueId; 4]> = SmallVec::new();
            for operand in e.tail() {
                match reify(store, operand)? {
                    Composite::Value(v) => operands.push(v),
                    Composite::Node(_) => {
                        return Err(OpApplyError::new(
                            "multi-output composite used as an operand",
                        )
                        .into())
                    }
                }
            }
            Ok(compose(store, op, &operands)?)
        }
        other => Err(OpApplyError::new(format!(
            "cannot evaluate a {} term",
            other.shape_name()
        ))
        .into()),
    }
}
