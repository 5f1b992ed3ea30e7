//! Reference relational engine.
//!
//! A compact goal solver implementing the [`Relational`] boundary:
//! substitution maps, worklist unification with occurs check, and a
//! lazy depth-first solution stream. Unification knows one thing about
//! graphs: a concrete non-leaf value unifies against an expression
//! pattern by decomposing through the adapter, which is what lets
//! relations pattern-match directly on graph values.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::adapter;
use crate::graph::{GraphStore, ValueId};
use crate::search::{Relational, VarScopes};
use crate::term::{LVar, Term, TermHead};

#[cfg(feature = "tracing")]
use crate::trace::{debug_span, trace};

/// Binding key: a minted logic variable or a scope-marked graph value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum VarKey {
    Lv(LVar),
    Val(ValueId),
}

/// Accumulated bindings of one search branch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subst {
    bindings: FxHashMap<VarKey, Term>,
}

impl Subst {
    fn bind(&mut self, key: VarKey, term: Term) {
        self.bindings.insert(key, term);
    }

    fn get(&self, key: VarKey) -> Option<&Term> {
        self.bindings.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Follow the binding chain from `term` to its end, without
    /// descending into structure.
    fn walk(&self, term: &Term, scopes: &VarScopes) -> Term {
        let mut current = term;
        loop {
            match as_unknown(current, scopes).and_then(|key| self.get(key)) {
                Some(next) => current = next,
                None => return current.clone(),
            }
        }
    }

    /// Substitute bindings throughout `term`.
    ///
    /// Unmodified subterms are returned as-is, so identity caches on
    /// decomposed expressions survive resolution; any rebuilt
    /// expression is cache-less.
    pub fn resolve(&self, term: &Term, scopes: &VarScopes) -> Term {
        let walked = self.walk(term, scopes);
        match &walked {
            Term::Expr(e) => {
                let head = match e.head() {
                    TermHead::Var(lv) => match self.walk(&Term::Var(lv), scopes) {
                        Term::Op(op) => TermHead::Op(op),
                        Term::Var(other) => TermHead::Var(other),
                        _ => TermHead::Var(lv),
                    },
                    head => head,
                };
                let mut changed = head != e.head();
                let mut tail = Vec::with_capacity(e.tail().len());
                for sub in e.tail() {
                    let resolved = self.resolve(sub, scopes);
                    changed |= resolved != *sub;
                    tail.push(resolved);
                }
                if changed {
                    Term::expr(head, tail)
                } else {
                    walked
                }
            }
            Term::Seq(items) => {
                let mut changed = false;
                let mut resolved = Vec::with_capacity(items.len());
                for sub in items {
                    let r = self.resolve(sub, scopes);
                    changed |= r != *sub;
                    resolved.push(r);
                }
                if changed {
                    Term::Seq(resolved)
                } else {
                    walked
                }
            }
            _ => walked,
        }
    }

    /// Does `key` occur in `term` (resolving as we go)? Binding a
    /// variable to a term containing itself would build an infinite
    /// term.
    fn occurs(&self, key: VarKey, term: &Term, scopes: &VarScopes) -> bool {
        let walked = self.walk(term, scopes);
        match &walked {
            Term::Var(lv) => VarKey::Lv(*lv) == key,
            Term::Value(v) => scopes.is_unknown(*v) && VarKey::Val(*v) == key,
            Term::Op(_) => false,
            Term::Expr(e) => {
                let head_hit = match e.head() {
                    TermHead::Var(lv) => VarKey::Lv(lv) == key,
                    TermHead::Op(_) => false,
                };
                head_hit || e.tail().iter().any(|t| self.occurs(key, t, scopes))
            }
            Term::Seq(items) => items.iter().any(|t| self.occurs(key, t, scopes)),
        }
    }
}

fn as_unknown(term: &Term, scopes: &VarScopes) -> Option<VarKey> {
    match term {
        Term::Var(lv) => Some(VarKey::Lv(*lv)),
        Term::Value(v) if scopes.is_unknown(*v) => Some(VarKey::Val(*v)),
        _ => None,
    }
}

fn head_term(head: TermHead, subst: &Subst, scopes: &VarScopes) -> Term {
    match head {
        TermHead::Op(op) => Term::Op(op),
        TermHead::Var(lv) => subst.walk(&Term::Var(lv), scopes),
    }
}

fn unify_heads(h1: TermHead, h2: TermHead, subst: &mut Subst, scopes: &VarScopes) -> bool {
    let r1 = head_term(h1, subst, scopes);
    let r2 = head_term(h2, subst, scopes);
    if r1 == r2 {
        return true;
    }
    match (&r1, &r2) {
        (Term::Var(lv), Term::Op(_)) => {
            subst.bind(VarKey::Lv(*lv), r2.clone());
            true
        }
        (Term::Op(_), Term::Var(lv)) => {
            subst.bind(VarKey::Lv(*lv), r1.clone());
            true
        }
        (Term::Var(a), Term::Var(b)) => {
            subst.bind(VarKey::Lv(*a), Term::Var(*b));
            true
        }
        _ => false,
    }
}

/// Unify two terms under `subst`, returning the extended substitution
/// on success.
///
/// Uses an explicit worklist. Concrete values compare by identity; a
/// non-leaf value meeting an expression pattern is decomposed through
/// the adapter (the cons view), and a leaf meeting structure fails.
pub fn unify(
    a: &Term,
    b: &Term,
    mut subst: Subst,
    store: &GraphStore,
    scopes: &VarScopes,
) -> Option<Subst> {
    #[cfg(feature = "tracing")]
    let _span = debug_span!("unify").entered();

    let mut worklist: SmallVec<[(Term, Term); 16]> = smallvec![(a.clone(), b.clone())];

    while let Some((x, y)) = worklist.pop() {
        let x = subst.walk(&x, scopes);
        let y = subst.walk(&y, scopes);

        if x == y {
            continue;
        }

        if let Some(key) = as_unknown(&x, scopes) {
            if subst.occurs(key, &y, scopes) {
                #[cfg(feature = "tracing")]
                trace!("unify_occurs_check_failed");
                return None;
            }
            subst.bind(key, y);
            continue;
        }
        if let Some(key) = as_unknown(&y, scopes) {
            if subst.occurs(key, &x, scopes) {
                #[cfg(feature = "tracing")]
                trace!("unify_occurs_check_failed");
                return None;
            }
            subst.bind(key, x);
            continue;
        }

        match (x, y) {
            (Term::Expr(e1), Term::Expr(e2)) => {
                if !unify_heads(e1.head(), e2.head(), &mut subst, scopes) {
                    #[cfg(feature = "tracing")]
                    trace!("unify_head_mismatch");
                    return None;
                }
                if e1.tail().len() != e2.tail().len() {
                    return None;
                }
                for (t1, t2) in e1.tail().iter().zip(e2.tail()) {
                    worklist.push((t1.clone(), t2.clone()));
                }
            }
            (Term::Expr(e), Term::Value(v)) | (Term::Value(v), Term::Expr(e)) => {
                match adapter::decompose(store, v) {
                    Ok(decomposed) => worklist.push((Term::Expr(e), decomposed)),
                    // Leaf against structure.
                    Err(_) => return None,
                }
            }
            (Term::Seq(s1), Term::Seq(s2)) => {
                if s1.len() != s2.len() {
                    return None;
                }
                for (t1, t2) in s1.into_iter().zip(s2) {
                    worklist.push((t1, t2));
                }
            }
            _ => return None,
        }
    }

    Some(subst)
}

/// Goal combinators consumed by the solver.
#[derive(Debug, Clone)]
pub enum Goal {
    /// Structural equality of two terms.
    Eq(Term, Term),
    /// Conjunction: every goal must hold.
    All(Vec<Goal>),
    /// Disjunction: alternatives explored in order.
    Any(Vec<Goal>),
    /// Always holds.
    Succeed,
    /// Never holds.
    Fail,
}

impl Goal {
    pub fn eq(a: Term, b: Term) -> Goal {
        Goal::Eq(a, b)
    }

    pub fn all(goals: impl IntoIterator<Item = Goal>) -> Goal {
        Goal::All(goals.into_iter().collect())
    }

    pub fn any(goals: impl IntoIterator<Item = Goal>) -> Goal {
        Goal::Any(goals.into_iter().collect())
    }
}

/// One branch of the search: remaining goals (top of the stack next)
/// and the bindings accumulated so far.
#[derive(Debug, Clone)]
struct State {
    pending: Vec<Goal>,
    subst: Subst,
}

/// Lazy depth-first stream of solutions.
pub struct Solutions<'e> {
    engine: &'e MiniKanren,
    stack: Vec<State>,
}

impl Iterator for Solutions<'_> {
    type Item = Subst;

    fn next(&mut self) -> Option<Subst> {
        'states: while let Some(mut state) = self.stack.pop() {
            loop {
                let Some(goal) = state.pending.pop() else {
                    return Some(state.subst);
                };
                match goal {
                    Goal::Succeed => {}
                    Goal::Fail => continue 'states,
                    Goal::Eq(a, b) => {
                        let subst = std::mem::take(&mut state.subst);
                        match unify(&a, &b, subst, self.engine.store(), &self.engine.scopes) {
                            Some(extended) => state.subst = extended,
                            None => continue 'states,
                        }
                    }
                    Goal::All(goals) => {
                        for g in goals.into_iter().rev() {
                            state.pending.push(g);
                        }
                    }
                    Goal::Any(goals) => {
                        // Fork one branch per alternative; the first
                        // alternative ends up on top of the stack.
                        for g in goals.into_iter().rev() {
                            let mut pending = state.pending.clone();
                            pending.push(g);
                            self.stack.push(State {
                                pending,
                                subst: state.subst.clone(),
                            });
                        }
                        continue 'states;
                    }
                }
            }
        }
        None
    }
}

/// The reference engine: a graph store to decompose against, the
/// unknown-marking scope stack, and a fresh-variable counter.
pub struct MiniKanren {
    store: Arc<GraphStore>,
    scopes: VarScopes,
    next_var: AtomicU32,
}

impl MiniKanren {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self {
            store,
            scopes: VarScopes::new(),
            next_var: AtomicU32::new(0),
        }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Raw solution stream for a goal (no query projection).
    pub fn solve(&self, goal: Goal) -> Solutions<'_> {
        Solutions {
            engine: self,
            stack: vec![State {
                pending: vec![goal],
                subst: Subst::default(),
            }],
        }
    }
}

impl Relational for MiniKanren {
    type Goal = Goal;

    fn fresh(&self) -> LVar {
        LVar::new(self.next_var.fetch_add(1, Ordering::Relaxed))
    }

    fn scopes(&self) -> &VarScopes {
        &self.scopes
    }

    fn run<'a>(
        &'a self,
        limit: Option<usize>,
        query: LVar,
        goal: Goal,
    ) -> Box<dyn Iterator<Item = Term> + 'a> {
        let solutions = self.solve(goal);
        let q = Term::Var(query);
        let mut seen: FxHashSet<Term> = FxHashSet::default();
        let iter = solutions
            .map(move |subst| subst.resolve(&q, &self.scopes))
            .filter(move |answer| seen.insert(answer.clone()));
        match limit {
            Some(n) => Box::new(iter.take(n)),
            None => Box::new(iter),
        }
    }
}

#[cfg(test)]
#[path = "tests/kanren.rs"]
mod tests;
