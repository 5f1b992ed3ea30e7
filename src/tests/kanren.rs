use super::*;
use crate::term::ExprTuple;
use crate::test_utils::{setup, VECTOR};

fn eng(ctx: &crate::test_utils::Ctx) -> MiniKanren {
    MiniKanren::new(ctx.store.clone())
}

// ========== UNIFICATION TESTS ==========

#[test]
fn unify_var_with_value() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let v = Term::Var(engine.fresh());

    let subst = unify(
        &v,
        &Term::Value(x),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .unwrap();
    assert_eq!(subst.resolve(&v, engine.scopes()), Term::Value(x));
}

#[test]
fn unify_values_by_identity() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);

    assert!(unify(
        &Term::Value(x),
        &Term::Value(x),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_some());
    // Structurally identical leaves are still different values.
    assert!(unify(
        &Term::Value(x),
        &Term::Value(y),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_none());
}

#[test]
fn unify_decomposes_value_against_pattern() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let sum = ctx.value(ctx.add, &[x, y]);

    let p = Term::Var(engine.fresh());
    let q = Term::Var(engine.fresh());
    let pattern = Term::app(ctx.add, vec![p.clone(), q.clone()]);

    let subst = unify(
        &pattern,
        &Term::Value(sum),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .unwrap();
    assert_eq!(subst.resolve(&p, engine.scopes()), Term::Value(x));
    assert_eq!(subst.resolve(&q, engine.scopes()), Term::Value(y));
}

#[test]
fn unify_leaf_against_pattern_fails() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let p = Term::Var(engine.fresh());
    let pattern = Term::app(ctx.add, vec![p.clone(), p]);

    assert!(unify(
        &pattern,
        &Term::Value(x),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_none());
}

#[test]
fn unify_head_mismatch_fails() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let sum = ctx.value(ctx.add, &[x, y]);

    let p = Term::Var(engine.fresh());
    let q = Term::Var(engine.fresh());
    let pattern = Term::app(ctx.dot, vec![p, q]);
    assert!(unify(
        &pattern,
        &Term::Value(sum),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_none());
}

#[test]
fn unify_binds_head_variable() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let sum = ctx.value(ctx.add, &[x, y]);

    let h = engine.fresh();
    let p = Term::Var(engine.fresh());
    let q = Term::Var(engine.fresh());
    let pattern = Term::expr(TermHead::Var(h), vec![p, q]);

    let subst = unify(
        &pattern,
        &Term::Value(sum),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .unwrap();
    assert_eq!(
        subst.resolve(&Term::Var(h), engine.scopes()),
        Term::Op(ctx.add)
    );
}

#[test]
fn occurs_check_rejects_cyclic_binding() {
    let ctx = setup();
    let engine = eng(&ctx);
    let a = Term::Var(engine.fresh());
    let cyclic = Term::app(ctx.add, vec![a.clone(), a.clone()]);

    assert!(unify(
        &a,
        &cyclic,
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_none());
}

#[test]
fn unify_seq_elementwise() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let p = Term::Var(engine.fresh());
    let q = Term::Var(engine.fresh());

    let subst = unify(
        &Term::Seq(vec![p.clone(), q.clone()]),
        &Term::Seq(vec![Term::Value(x), Term::Value(y)]),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .unwrap();
    assert_eq!(subst.resolve(&p, engine.scopes()), Term::Value(x));
    assert_eq!(subst.resolve(&q, engine.scopes()), Term::Value(y));

    assert!(unify(
        &Term::Seq(vec![p]),
        &Term::Seq(vec![Term::Value(x), Term::Value(y)]),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .is_none());
}

// ========== SCOPED UNKNOWN TESTS ==========

#[test]
fn marked_value_unifies_like_a_variable() {
    let ctx = setup();
    let engine = eng(&ctx);
    let c = ctx.store.leaf(VECTOR);
    let x = ctx.store.leaf(VECTOR);

    let q = engine.fresh();
    let goal = Goal::all([
        Goal::eq(Term::Value(c), Term::Value(x)),
        Goal::eq(Term::Var(q), Term::Value(c)),
    ]);

    {
        let _guard = engine.scopes().enter(&[c]);
        let answers: Vec<Term> = engine.run(None, q, goal.clone()).collect();
        assert_eq!(answers, vec![Term::Value(x)]);
    }

    // Outside the scope the same goal is an identity mismatch.
    let answers: Vec<Term> = engine.run(None, q, goal).collect();
    assert!(answers.is_empty());
}

// ========== RESOLUTION TESTS ==========

#[test]
fn resolve_preserves_identity_cache_when_unmodified() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let sum = ctx.value(ctx.add, &[x, y]);

    let term = crate::adapter::decompose(engine.store(), sum).unwrap();
    let resolved = Subst::default().resolve(&term, engine.scopes());
    match resolved {
        Term::Expr(e) => assert_eq!(e.evaled(), Some(sum)),
        other => panic!("expected expression, got {:?}", other),
    }
}

#[test]
fn resolve_rebuild_drops_stale_cache() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let sum = ctx.value(ctx.add, &[x, y]);

    let v = Term::Var(engine.fresh());
    let cached = Term::Expr(std::sync::Arc::new(ExprTuple::with_evaled(
        TermHead::Op(ctx.add),
        vec![Term::Value(x), v.clone()],
        sum,
    )));
    let subst = unify(
        &v,
        &Term::Value(y),
        Subst::default(),
        engine.store(),
        engine.scopes(),
    )
    .unwrap();
    match subst.resolve(&cached, engine.scopes()) {
        Term::Expr(e) => {
            assert_eq!(e.tail(), &[Term::Value(x), Term::Value(y)]);
            // A substituted term no longer denotes its origin.
            assert_eq!(e.evaled(), None);
        }
        other => panic!("expected expression, got {:?}", other),
    }
}

// ========== RUN TESTS ==========

#[test]
fn run_fail_is_empty() {
    let ctx = setup();
    let engine = eng(&ctx);
    let q = engine.fresh();
    assert_eq!(engine.run(None, q, Goal::Fail).count(), 0);
}

#[test]
fn run_unbound_query_is_itself() {
    let ctx = setup();
    let engine = eng(&ctx);
    let q = engine.fresh();
    let answers: Vec<Term> = engine.run(None, q, Goal::Succeed).collect();
    assert_eq!(answers, vec![Term::Var(q)]);
}

#[test]
fn run_alternatives_in_order() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let q = engine.fresh();
    let goal = Goal::any([
        Goal::eq(Term::Var(q), Term::Value(x)),
        Goal::eq(Term::Var(q), Term::Value(y)),
    ]);
    let answers: Vec<Term> = engine.run(None, q, goal).collect();
    assert_eq!(answers, vec![Term::Value(x), Term::Value(y)]);
}

#[test]
fn run_deduplicates_answers() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let q = engine.fresh();
    let goal = Goal::any([
        Goal::eq(Term::Var(q), Term::Value(x)),
        Goal::eq(Term::Var(q), Term::Value(x)),
    ]);
    assert_eq!(engine.run(None, q, goal).count(), 1);
}

#[test]
fn run_respects_limit() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let q = engine.fresh();
    let goal = Goal::any([
        Goal::eq(Term::Var(q), Term::Value(x)),
        Goal::eq(Term::Var(q), Term::Value(y)),
    ]);
    assert_eq!(engine.run(Some(1), q, goal).count(), 1);
}

#[test]
fn run_conjunction_threads_bindings() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let a = Term::Var(engine.fresh());
    let q = engine.fresh();
    let goal = Goal::all([
        Goal::eq(a.clone(), Term::Value(x)),
        Goal::eq(Term::Var(q), a),
    ]);
    let answers: Vec<Term> = engine.run(None, q, goal).collect();
    assert_eq!(answers, vec![Term::Value(x)]);
}

#[test]
fn run_is_lazy() {
    let ctx = setup();
    let engine = eng(&ctx);
    let x = ctx.store.leaf(VECTOR);
    let y = ctx.store.leaf(VECTOR);
    let q = engine.fresh();
    let goal = Goal::any([
        Goal::eq(Term::Var(q), Term::Value(x)),
        Goal::eq(Term::Var(q), Term::Value(y)),
    ]);
    let mut stream = engine.run(None, q, goal);
    assert_eq!(stream.next(), Some(Term::Value(x)));
    // The second alternative is still pending, untouched.
    assert_eq!(stream.next(), Some(Term::Value(y)));
    assert_eq!(stream.next(), None);
}
