//! Goal-directed rewrite of a single application node.
//!
//! A [`RelationRewrite`] drives one node through relational search:
//! decompose the node's canonical output into a term, hand it to the
//! engine together with a fresh query variable, pick one solution,
//! classify it, and return a validated replacement descriptor. The
//! graph itself is never mutated here; the fixpoint driver applies the
//! descriptor.

use std::fmt;

use crate::adapter::{self, Composite};
use crate::graph::{Graph, NodeId, ValueId};
use crate::search::{first_result, Relational};
use crate::term::Term;

#[cfg(feature = "tracing")]
use crate::trace::{debug, debug_span};

/// The outcome of one transform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// The node was vetoed, the relation produced nothing, or a local
    /// failure made the rule inapplicable.
    Unchanged,
    /// Ordered `old -> new` value replacements for the driver to apply.
    Replace(Vec<(ValueId, ValueId)>),
}

impl Rewrite {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Rewrite::Unchanged)
    }
}

/// Fatal transform failures. Both indicate a malformed relation and
/// must not be retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// A replacement key is not a member of the graph being rewritten:
    /// the relation referenced a stale or foreign value.
    Consistency { value: ValueId },
    /// The relation bound the query to a shape that cannot be applied
    /// as a replacement.
    UnsupportedResult { shape: String },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Consistency { value } => write!(
                f,
                "replacement key v{} is not a member of the rewritten graph",
                value.raw()
            ),
            TransformError::UnsupportedResult { shape } => {
                write!(f, "unsupported replacement result shape: {}", shape)
            }
        }
    }
}

impl std::error::Error for TransformError {}

/// Picks at most one candidate from the lazy solution stream.
pub type ResultsFilter = Box<dyn Fn(&mut dyn Iterator<Item = Term>) -> Option<Term>>;

/// Vetoes individual nodes before any search happens.
pub type NodeFilter = Box<dyn Fn(&Graph, NodeId) -> bool>;

/// A rewrite rule: a two-argument goal constructor plus the knobs of
/// one search invocation.
///
/// The relation receives the engine (to mint pattern variables), the
/// node's canonical input expression, and the output query term, and
/// returns the goal to solve.
pub struct RelationRewrite<E: Relational> {
    relation: Box<dyn Fn(&E, Term, Term) -> E::Goal>,
    relation_lvars: Vec<ValueId>,
    results_filter: ResultsFilter,
    node_filter: NodeFilter,
}

impl<E: Relational> RelationRewrite<E> {
    pub fn new(relation: impl Fn(&E, Term, Term) -> E::Goal + 'static) -> Self {
        Self {
            relation: Box::new(relation),
            relation_lvars: Vec::new(),
            results_filter: Box::new(first_result),
            node_filter: Box::new(|_, _| false),
        }
    }

    /// Graph values to treat as unknowns for the duration of each
    /// invocation.
    pub fn with_unknowns(mut self, values: impl IntoIterator<Item = ValueId>) -> Self {
        self.relation_lvars = values.into_iter().collect();
        self
    }

    /// Replace the default first-solution filter.
    pub fn with_results_filter(
        mut self,
        filter: impl Fn(&mut dyn Iterator<Item = Term>) -> Option<Term> + 'static,
    ) -> Self {
        self.results_filter = Box::new(filter);
        self
    }

    /// Veto predicate; `true` skips the node without searching.
    pub fn with_node_filter(mut self, filter: impl Fn(&Graph, NodeId) -> bool + 'static) -> Self {
        self.node_filter = Box::new(filter);
        self
    }

    /// Run the relation against one node and report what should change.
    ///
    /// Local failures (a leaf where structure was expected, an operator
    /// rejecting operands during reification) collapse to
    /// `Rewrite::Unchanged`; consistency and result-shape failures are
    /// fatal.
    pub fn transform(
        &self,
        graph: &Graph,
        engine: &E,
        node: NodeId,
    ) -> Result<Rewrite, TransformError> {
        #[cfg(feature = "tracing")]
        let _span = debug_span!("transform", node = node.raw()).entered();

        if (self.node_filter)(graph, node) {
            return Ok(Rewrite::Unchanged);
        }

        let store = graph.store();
        let input_expr = match store.canonical_output(node) {
            Some(value) => Term::Value(value),
            None => {
                let Some(outputs) = store.outputs_of(node) else {
                    return Ok(Rewrite::Unchanged);
                };
                Term::Seq(outputs.into_iter().map(Term::Value).collect())
            }
        };

        // The unknown-marking scope covers the search and the filter's
        // pull of the lazy stream; the guard releases it on every exit
        // path, including a panicking filter and reentrant transforms
        // started from inside it.
        let chosen = {
            let _scope = engine.scopes().enter(&self.relation_lvars);
            let q = engine.fresh();
            let goal = (self.relation)(engine, input_expr, Term::Var(q));
            let mut stream = engine.run(None, q, goal);
            (self.results_filter)(&mut *stream)
        };

        let Some(chosen) = chosen else {
            return Ok(Rewrite::Unchanged);
        };
        self.apply_result(graph, node, chosen)
    }

    /// Classify a chosen solution and build the replacement set.
    fn apply_result(
        &self,
        graph: &Graph,
        node: NodeId,
        chosen: Term,
    ) -> Result<Rewrite, TransformError> {
        let store = graph.store();
        let pairs: Vec<(ValueId, ValueId)> = match chosen {
            // A flat concrete result replaces the node's canonical
            // output (disambiguated for multi-output nodes).
            Term::Value(_) | Term::Expr(_) => {
                let new_value = match adapter::reify(store, &chosen) {
                    Ok(Composite::Value(v)) => v,
                    Ok(Composite::Node(_)) => {
                        return Err(TransformError::UnsupportedResult {
                            shape: "multi-output composite".to_string(),
                        })
                    }
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        debug!(error = %_err, "reification failed, treating as no match");
                        return Ok(Rewrite::Unchanged);
                    }
                };
                let Some(old) = adjust_outputs(graph, node, None) else {
                    return Ok(Rewrite::Unchanged);
                };
                vec![(old, new_value)]
            }
            // An explicit replacement set: an ordered sequence of
            // (old, new) pairs.
            Term::Seq(items) => {
                let mut pairs = Vec::with_capacity(items.len());
                for item in items {
                    let (key_term, value_term) = match &item {
                        Term::Seq(kv) => match kv.as_slice() {
                            [key, value] => (key.clone(), value.clone()),
                            _ => {
                                return Err(TransformError::UnsupportedResult {
                                    shape: format!(
                                        "replacement pair of length {}",
                                        kv.len()
                                    ),
                                })
                            }
                        },
                        other => {
                            return Err(TransformError::UnsupportedResult {
                                shape: format!(
                                    "sequence of {} instead of pairs",
                                    other.shape_name()
                                ),
                            })
                        }
                    };
                    let key = match reify_to_value(graph, &key_term) {
                        Some(Ok(v)) => v,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(Rewrite::Unchanged),
                    };
                    let value = match reify_to_value(graph, &value_term) {
                        Some(Ok(v)) => v,
                        Some(Err(e)) => return Err(e),
                        None => return Ok(Rewrite::Unchanged),
                    };
                    pairs.push((key, value));
                }
                pairs
            }
            other => {
                return Err(TransformError::UnsupportedResult {
                    shape: other.shape_name().to_string(),
                })
            }
        };

        // Every key must be reachable in the graph being rewritten.
        for (old, _) in &pairs {
            if !graph.contains(*old) {
                return Err(TransformError::Consistency { value: *old });
            }
        }
        Ok(Rewrite::Replace(pairs))
    }
}

/// Reify one side of a replacement pair down to a concrete value.
///
/// `None` means a local reification failure (rule does not apply);
/// `Some(Err(..))` a fatal shape problem.
fn reify_to_value(
    graph: &Graph,
    term: &Term,
) -> Option<Result<ValueId, TransformError>> {
    match term {
        Term::Value(_) | Term::Expr(_) => match adapter::reify(graph.store(), term) {
            Ok(Composite::Value(v)) => Some(Ok(v)),
            Ok(Composite::Node(_)) => Some(Err(TransformError::UnsupportedResult {
                shape: "multi-output composite in a replacement pair".to_string(),
            })),
            Err(_) => None,
        },
        other => Some(Err(TransformError::UnsupportedResult {
            shape: format!("{} in a replacement pair", other.shape_name()),
        })),
    }
}

/// Resolve which output slot a flat replacement value targets.
///
/// A known prior output wins when it names an actual slot; otherwise
/// the operator's declared default index, else index 0. When the
/// relation does not say which output it supersedes this is a
/// heuristic, not a guarantee.
pub fn adjust_outputs(graph: &Graph, node: NodeId, prior: Option<ValueId>) -> Option<ValueId> {
    let store = graph.store();
    let outputs = store.outputs_of(node)?;
    if outputs.is_empty() {
        return None;
    }
    let declared = store.op_impl_of(node).and_then(|op| op.default_output());
    let index = prior
        .and_then(|p| outputs.iter().position(|&o| o == p))
        .or(declared)
        .filter(|&i| i < outputs.len())
        .unwrap_or(0);
    Some(outputs[index])
}

#[cfg(test)]
#[path = "tests/transform.rs"]
mod tests;
