//! End-to-end fixpoint scenario: distribute matrix multiplication over
//! addition until the graph stops changing.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use relgraph::adapter::{operands_of, operator_of};
use relgraph::equilibrium::EquilibriumRewriter;
use relgraph::graph::{Graph, GraphStore, Op, OpApplyError, OpId, TypeTag, ValueId};
use relgraph::kanren::{Goal, MiniKanren};
use relgraph::search::Relational;
use relgraph::term::Term;
use relgraph::transform::RelationRewrite;

const VECTOR: TypeTag = TypeTag(0);
const MATRIX: TypeTag = TypeTag(1);

#[derive(Debug)]
struct AddOp;

impl Op for AddOp {
    fn name(&self) -> &str {
        "add"
    }

    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError> {
        if inputs.len() != 2 || store.ty(inputs[0]) != store.ty(inputs[1]) {
            return Err(OpApplyError::for_op("add", "expected two operands of one type"));
        }
        let ty = store
            .ty(inputs[0])
            .ok_or_else(|| OpApplyError::for_op("add", "unknown operand"))?;
        Ok(smallvec![ty])
    }
}

#[derive(Debug)]
struct DotOp;

impl Op for DotOp {
    fn name(&self) -> &str {
        "dot"
    }

    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError> {
        if inputs.len() != 2 {
            return Err(OpApplyError::for_op("dot", "expected two operands"));
        }
        if store.ty(inputs[0]) != Some(MATRIX) {
            return Err(OpApplyError::for_op("dot", "left operand must be a matrix"));
        }
        let right = store
            .ty(inputs[1])
            .ok_or_else(|| OpApplyError::for_op("dot", "unknown operand"))?;
        Ok(smallvec![right])
    }
}

/// `dot(M, add(p, q)) => add(dot(M, p), dot(M, q))`
fn distributes(add: OpId, dot: OpId) -> impl Fn(&MiniKanren, Term, Term) -> Goal {
    move |engine, input, output| {
        let m = Term::Var(engine.fresh());
        let p = Term::Var(engine.fresh());
        let q = Term::Var(engine.fresh());
        Goal::all([
            Goal::eq(
                Term::app(
                    dot,
                    vec![m.clone(), Term::app(add, vec![p.clone(), q.clone()])],
                ),
                input,
            ),
            Goal::eq(
                Term::app(
                    add,
                    vec![Term::app(dot, vec![m.clone(), p]), Term::app(dot, vec![m, q])],
                ),
                output,
            ),
        ])
    }
}

#[test]
fn distributes_to_fixpoint() {
    let store = Arc::new(GraphStore::new());
    let add = store.registry().register(Arc::new(AddOp));
    let dot = store.registry().register(Arc::new(DotOp));

    let x = store.named_leaf(VECTOR, "x");
    let c = store.named_leaf(VECTOR, "c");
    let d = store.named_leaf(VECTOR, "d");
    let a_mat = store.named_leaf(MATRIX, "A");
    let b_mat = store.named_leaf(MATRIX, "B");

    let value = |op: OpId, inputs: &[ValueId]| -> ValueId {
        let node = store.apply(op, inputs).unwrap();
        store.canonical_output(node).unwrap()
    };

    // Z = A . (x + B . (c + d))
    let cd = value(add, &[c, d]);
    let bcd = value(dot, &[b_mat, cd]);
    let xbcd = value(add, &[x, bcd]);
    let z = value(dot, &[a_mat, xbcd]);

    let mut graph = Graph::new(
        store.clone(),
        vec![x, c, d, a_mat, b_mat],
        vec![z],
    );
    let engine = MiniKanren::new(store.clone());

    let rule = RelationRewrite::new(distributes(add, dot));
    let driver = EquilibriumRewriter::new(vec![rule]);
    let stats = driver.rewrite_to_fixpoint(&mut graph, &engine).unwrap();

    // One distribution per matching product, then a pass that finds
    // nothing left to do.
    assert_eq!(stats.replacements, 3);
    assert_eq!(stats.passes, 3);

    // Z' = add(dot(A, x), add(dot(A, dot(B, c)), dot(A, dot(B, d))))
    let out = graph.outputs()[0];
    assert_eq!(operator_of(&store, out), Ok(add));
    let top = operands_of(&store, out).unwrap();

    assert_eq!(operator_of(&store, top[0]), Ok(dot));
    assert_eq!(operands_of(&store, top[0]).unwrap().as_slice(), &[a_mat, x]);

    assert_eq!(operator_of(&store, top[1]), Ok(add));
    let inner = operands_of(&store, top[1]).unwrap();
    for (branch, vec_leaf) in [(inner[0], c), (inner[1], d)] {
        assert_eq!(operator_of(&store, branch), Ok(dot));
        let operands = operands_of(&store, branch).unwrap();
        assert_eq!(operands[0], a_mat);
        assert_eq!(operator_of(&store, operands[1]), Ok(dot));
        assert_eq!(
            operands_of(&store, operands[1]).unwrap().as_slice(),
            &[b_mat, vec_leaf]
        );
    }

    // Every leaf survives the rewrite untouched.
    for leaf in [x, c, d, a_mat, b_mat] {
        assert!(graph.contains(leaf));
    }
}

#[test]
fn unsatisfiable_relation_leaves_graph_alone() {
    let store = Arc::new(GraphStore::new());
    let add = store.registry().register(Arc::new(AddOp));
    let dot = store.registry().register(Arc::new(DotOp));

    let x = store.named_leaf(VECTOR, "x");
    let y = store.named_leaf(VECTOR, "y");
    let sum_node = store.apply(add, &[x, y]).unwrap();
    let sum = store.canonical_output(sum_node).unwrap();

    let mut graph = Graph::new(store.clone(), vec![x, y], vec![sum]);
    let engine = MiniKanren::new(store.clone());

    // The distribute pattern needs a dot over an add; a bare sum of
    // leaves can never match.
    let rule = RelationRewrite::new(distributes(add, dot));
    let driver = EquilibriumRewriter::new(vec![rule]);
    let stats = driver.rewrite_to_fixpoint(&mut graph, &engine).unwrap();
    assert_eq!(stats.replacements, 0);
    assert_eq!(graph.outputs(), &[sum]);
}
