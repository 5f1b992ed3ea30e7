//! Boundary to the relational search engine.
//!
//! The rewrite layer stays agnostic to the search algorithm: it only
//! needs fresh variables, a way to mark graph values as unknowns for
//! the duration of one invocation, and a lazy solution stream. The
//! `kanren` module ships a reference implementation of this trait.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::graph::ValueId;
use crate::term::{LVar, Term};

/// A relational search engine.
///
/// `run` yields the query variable's resolved bindings lazily; pulling
/// the stream may be unbounded for ill-behaved goals, so callers that
/// want termination must stop after the first result (see
/// [`first_result`]).
pub trait Relational {
    /// Opaque goal type built by relation constructors.
    type Goal;

    /// Mint a logic variable unused by any live query.
    fn fresh(&self) -> LVar;

    /// The registry marking graph values as unknowns.
    fn scopes(&self) -> &VarScopes;

    /// Solve `goal`, yielding up to `limit` resolved bindings of
    /// `query` (all of them when `limit` is `None`).
    fn run<'a>(
        &'a self,
        limit: Option<usize>,
        query: LVar,
        goal: Self::Goal,
    ) -> Box<dyn Iterator<Item = Term> + 'a>;
}

/// Stack-disciplined registry of graph values treated as logic
/// variables.
///
/// Each `enter` pushes one frame and returns a guard; dropping the
/// guard releases that frame (and anything nested above it), so
/// marking never leaks across invocations. That holds on normal
/// return, on panic, and under reentrant nesting, where an inner
/// transform opens and closes its own frame while an outer one is
/// still live.
#[derive(Debug, Default)]
pub struct VarScopes {
    frames: Mutex<Vec<FxHashSet<ValueId>>>,
}

impl VarScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `values` as unknowns until the returned guard drops.
    pub fn enter(&self, values: &[ValueId]) -> ScopeGuard<'_> {
        let mut frames = self.frames.lock();
        let depth = frames.len();
        frames.push(values.iter().copied().collect());
        ScopeGuard {
            scopes: self,
            depth,
        }
    }

    /// Is the value marked by any live frame?
    pub fn is_unknown(&self, value: ValueId) -> bool {
        self.frames.lock().iter().any(|f| f.contains(&value))
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }
}

/// Releases one marking frame on drop.
pub struct ScopeGuard<'a> {
    scopes: &'a VarScopes,
    depth: usize,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.scopes.frames.lock().truncate(self.depth);
    }
}

/// The default results filter: the first solution, or none.
pub fn first_result(stream: &mut dyn Iterator<Item = Term>) -> Option<Term> {
    stream.next()
}
