//! Fixpoint driver: apply rewrite rules across a graph until nothing
//! changes.
//!
//! Each pass snapshots the member nodes in operands-first order and
//! offers every node to each rule in turn; the first rule that matches
//! has its replacement descriptor applied immediately. Nodes detached
//! by earlier surgery in the same pass are skipped. The driver owns
//! all graph mutation and the termination bounds the rewrite layer
//! deliberately does not have.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::graph::{Graph, GraphError, NodeId};
use crate::search::Relational;
use crate::transform::{RelationRewrite, Rewrite, TransformError};

#[cfg(feature = "tracing")]
use crate::metrics::RewriteMetrics;
#[cfg(feature = "tracing")]
use crate::trace::{debug, debug_span};

/// A fixpoint run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquilibriumError {
    /// A rule produced a fatal transform error.
    Transform(TransformError),
    /// Replacement surgery was rejected by the graph.
    Graph(GraphError),
}

impl fmt::Display for EquilibriumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquilibriumError::Transform(e) => write!(f, "{}", e),
            EquilibriumError::Graph(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EquilibriumError {}

impl From<TransformError> for EquilibriumError {
    fn from(e: TransformError) -> Self {
        EquilibriumError::Transform(e)
    }
}

impl From<GraphError> for EquilibriumError {
    fn from(e: GraphError) -> Self {
        EquilibriumError::Graph(e)
    }
}

/// Outcome summary of a fixpoint run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Passes taken, including the final unchanged one.
    pub passes: usize,
    /// Replacements applied across all passes.
    pub replacements: usize,
    /// Times a node was skipped for hitting the per-node ceiling.
    pub ceiling_hits: usize,
}

/// Applies a rule list to every node until equilibrium.
pub struct EquilibriumRewriter<E: Relational> {
    rules: Vec<RelationRewrite<E>>,
    /// How many times any single node may be rewritten.
    max_node_uses: usize,
    /// Upper bound on passes, a backstop against oscillating rules.
    max_passes: usize,
    #[cfg(feature = "tracing")]
    metrics: RewriteMetrics,
}

impl<E: Relational> EquilibriumRewriter<E> {
    pub fn new(rules: Vec<RelationRewrite<E>>) -> Self {
        Self {
            rules,
            max_node_uses: 10,
            max_passes: 100,
            #[cfg(feature = "tracing")]
            metrics: RewriteMetrics::new(),
        }
    }

    pub fn with_max_node_uses(mut self, n: usize) -> Self {
        self.max_node_uses = n;
        self
    }

    pub fn with_max_passes(mut self, n: usize) -> Self {
        self.max_passes = n;
        self
    }

    #[cfg(feature = "tracing")]
    pub fn metrics(&self) -> &RewriteMetrics {
        &self.metrics
    }

    /// Rewrite until a full pass changes nothing or a ceiling is hit.
    pub fn rewrite_to_fixpoint(
        &self,
        graph: &mut Graph,
        engine: &E,
    ) -> Result<RewriteStats, EquilibriumError> {
        let mut stats = RewriteStats::default();
        let mut uses: FxHashMap<NodeId, usize> = FxHashMap::default();

        while stats.passes < self.max_passes {
            stats.passes += 1;
            #[cfg(feature = "tracing")]
            let _span = debug_span!("pass", number = stats.passes).entered();
            #[cfg(feature = "tracing")]
            self.metrics.record_pass();

            let mut changed = false;
            for node in graph.nodes_topo() {
                // Detached by surgery earlier in this pass.
                if !graph.contains_node(node) {
                    continue;
                }
                if uses.get(&node).copied().unwrap_or(0) >= self.max_node_uses {
                    stats.ceiling_hits += 1;
                    continue;
                }
                #[cfg(feature = "tracing")]
                self.metrics.record_visit();

                for rule in &self.rules {
                    match rule.transform(graph, engine, node)? {
                        Rewrite::Unchanged => {}
                        Rewrite::Replace(pairs) => {
                            #[cfg(feature = "tracing")]
                            debug!(node = node.raw(), pairs = pairs.len(), "replacing");
                            graph.replace_all(&pairs)?;
                            *uses.entry(node).or_insert(0) += 1;
                            stats.replacements += 1;
                            #[cfg(feature = "tracing")]
                            self.metrics.record_replacement();
                            changed = true;
                            // The node was rewritten; don't offer it to
                            // later rules this pass.
                            break;
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }
        Ok(stats)
    }
}
