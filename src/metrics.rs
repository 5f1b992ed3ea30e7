//! Rewrite metrics collection.
//!
//! Aggregate counters recorded by the fixpoint driver when the
//! `tracing` feature is enabled; the whole module compiles away
//! otherwise. Counters use relaxed ordering; a snapshot taken after a
//! run completes is exact.

#[cfg(feature = "tracing")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one driver's lifetime.
#[cfg(feature = "tracing")]
#[derive(Debug, Default)]
pub struct RewriteMetrics {
    /// Fixpoint passes started.
    pub passes: AtomicU64,
    /// Nodes offered to the rule list.
    pub nodes_visited: AtomicU64,
    /// Replacement descriptors applied.
    pub replacements: AtomicU64,
}

#[cfg(feature = "tracing")]
impl RewriteMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_visit(&self) {
        self.nodes_visited.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_replacement(&self) {
        self.replacements.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the counters.
    pub fn report(&self) -> MetricsReport {
        MetricsReport {
            passes: self.passes.load(Ordering::Relaxed),
            nodes_visited: self.nodes_visited.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
        }
    }
}

/// Plain snapshot of [`RewriteMetrics`].
#[cfg(feature = "tracing")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsReport {
    pub passes: u64,
    pub nodes_visited: u64,
    pub replacements: u64,
}
