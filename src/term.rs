use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::graph::{OpId, ValueId};

/// A logic variable: an opaque placeholder for an unknown position
/// during relational search. Identity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LVar(u32);

impl LVar {
    pub fn new(raw: u32) -> Self {
        LVar(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

/// Head position of an expression term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermHead {
    /// A concrete operator.
    Op(OpId),
    /// An unknown standing for an operator.
    Var(LVar),
}

/// Structural access was requested on an opaque term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotDecomposable;

impl fmt::Display for NotDecomposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "term is opaque and has no head/tail structure")
    }
}

impl std::error::Error for NotDecomposable {}

/// An operator-application term: a head applied to ordered operand
/// terms.
///
/// `evaled` is an identity-preserving cache: when present it names the
/// exact graph value this term was decomposed from, so reifying an
/// unmodified term returns that value rather than reconstructing a
/// copy. The cache is side metadata only and takes no part in
/// structural equality or hashing.
#[derive(Debug, Clone)]
pub struct ExprTuple {
    head: TermHead,
    tail: Vec<Term>,
    evaled: Option<ValueId>,
}

impl ExprTuple {
    /// Build a term with no cached origin. The tail may be empty.
    pub fn new(head: TermHead, tail: Vec<Term>) -> Self {
        Self {
            head,
            tail,
            evaled: None,
        }
    }

    /// Build a term recording the value it was decomposed from.
    pub fn with_evaled(head: TermHead, tail: Vec<Term>, value: ValueId) -> Self {
        Self {
            head,
            tail,
            evaled: Some(value),
        }
    }

    pub fn head(&self) -> TermHead {
        self.head
    }

    pub fn tail(&self) -> &[Term] {
        &self.tail
    }

    pub fn evaled(&self) -> Option<ValueId> {
        self.evaled
    }
}

impl PartialEq for ExprTuple {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head && self.tail == other.tail
    }
}

impl Eq for ExprTuple {}

impl Hash for ExprTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.head.hash(state);
        self.tail.hash(state);
    }
}

/// The term view of graph data consumed by relational search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A concrete graph value; opaque unless decomposed.
    Value(ValueId),
    /// A logic variable.
    Var(LVar),
    /// A bare operator, as bound when a head position unifies.
    Op(OpId),
    /// An operator application.
    Expr(Arc<ExprTuple>),
    /// A bare ordered sequence: multi-output input expressions and
    /// replacement pair lists.
    Seq(Vec<Term>),
}

impl Term {
    /// Expression term from a head and operand tail.
    pub fn expr(head: TermHead, tail: Vec<Term>) -> Self {
        Term::Expr(Arc::new(ExprTuple::new(head, tail)))
    }

    /// Expression term with a concrete operator head.
    pub fn app(op: OpId, tail: Vec<Term>) -> Self {
        Term::expr(TermHead::Op(op), tail)
    }

    /// Two-element sequence, the carrier for replacement pairs.
    pub fn pair(key: Term, value: Term) -> Self {
        Term::Seq(vec![key, value])
    }

    /// Head of an expression term; opaque terms fail.
    pub fn head(&self) -> Result<TermHead, NotDecomposable> {
        match self {
            Term::Expr(e) => Ok(e.head()),
            _ => Err(NotDecomposable),
        }
    }

    /// Operand tail of an expression term; opaque terms fail.
    pub fn tail(&self) -> Result<&[Term], NotDecomposable> {
        match self {
            Term::Expr(e) => Ok(e.tail()),
            _ => Err(NotDecomposable),
        }
    }

    /// The concrete value this term directly denotes, if any.
    pub fn as_value(&self) -> Option<ValueId> {
        match self {
            Term::Value(v) => Some(*v),
            _ => None,
        }
    }

    /// Short shape label for diagnostics.
    pub fn shape_name(&self) -> &'static str {
        match self {
            Term::Value(_) => "value",
            Term::Var(_) => "logic variable",
            Term::Op(_) => "operator",
            Term::Expr(_) => "expression",
            Term::Seq(_) => "sequence",
        }
    }
}
