//! Graph model: operators, application nodes, values, and the
//! membership container rewrites run against.
//!
//! Nodes and values live in a `GraphStore` arena and are addressed by
//! copyable ids, so "the same value" is an id comparison and survives
//! any number of term round-trips. A `Graph` is a view over one store:
//! the input/output frontier plus the set of values and nodes currently
//! reachable from the outputs. Rewrite application never mutates a
//! value in place; the driver swaps ids at the consumers.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use lasso::{Spur, ThreadedRodeo};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Interned identity of an operator.
pub type OpId = Spur;

/// Opaque value-type tag.
///
/// Tags are assigned and interpreted by the operator library; the core
/// only carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag(pub u32);

/// Identifier of a value in a `GraphStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    /// Raw index (for display/debugging).
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Identifier of an application node in a `GraphStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// An operator rejected its operands (arity or type mismatch).
///
/// This is a local, catchable failure: callers treat it as "this
/// composition does not apply", never as a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpApplyError {
    /// Operator name, when known.
    pub op: Option<String>,
    /// What the operator objected to.
    pub reason: String,
}

impl OpApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            op: None,
            reason: reason.into(),
        }
    }

    pub fn for_op(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            op: Some(op.into()),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for OpApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Some(op) => write!(f, "cannot apply `{}`: {}", op, self.reason),
            None => write!(f, "operator application failed: {}", self.reason),
        }
    }
}

impl std::error::Error for OpApplyError {}

/// A pure, typed graph transformation rule.
///
/// Implementations live in the operator library. The core calls
/// `infer` to type-check operands and determine output arity when a
/// node is constructed, and `default_output` to learn which output
/// stands for the whole node.
pub trait Op: fmt::Debug + Send + Sync {
    /// Stable name; node heads with the same name are the same operator.
    fn name(&self) -> &str;

    /// Output types for the given operands, or a rejection.
    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError>;

    /// Index of the declared canonical output, if any.
    fn default_output(&self) -> Option<usize> {
        None
    }
}

/// Back-reference from a value to the node that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub node: NodeId,
    /// Output slot the value occupies on that node.
    pub index: usize,
}

/// A typed datum on a graph edge. Leaf iff `owner` is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub ty: TypeTag,
    pub name: Option<String>,
    pub owner: Option<Owner>,
}

/// One instantiation of an operator over ordered input values.
///
/// The output list length is fixed by `Op::infer` at construction and
/// never changes afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub op: OpId,
    pub inputs: SmallVec<[ValueId; 4]>,
    pub outputs: SmallVec<[ValueId; 2]>,
}

/// Registry of operator implementations keyed by interned name.
pub struct OpRegistry {
    names: ThreadedRodeo,
    ops: RwLock<HashMap<OpId, Arc<dyn Op>>>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self {
            names: ThreadedRodeo::new(),
            ops: RwLock::new(HashMap::new()),
        }
    }

    /// Register an operator under its name, returning its identity.
    /// Registering the same name again replaces the implementation but
    /// keeps the id.
    pub fn register(&self, op: Arc<dyn Op>) -> OpId {
        let id = self.names.get_or_intern(op.name());
        self.ops.write().insert(id, op);
        id
    }

    /// Look up an operator implementation.
    pub fn get(&self, id: OpId) -> Option<Arc<dyn Op>> {
        self.ops.read().get(&id).cloned()
    }

    /// Resolve an id back to the operator name.
    pub fn name(&self, id: OpId) -> Option<&str> {
        self.names.try_resolve(&id)
    }

    /// Id for an already-registered name, without registering.
    pub fn lookup(&self, name: &str) -> Option<OpId> {
        self.names.get(name)
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena of nodes and values.
///
/// All methods take `&self`; interior locks make the store shareable
/// between a graph view and a search engine. Ids are never reused, so
/// values created during reification simply exist alongside the graph
/// until the driver splices them in.
pub struct GraphStore {
    registry: OpRegistry,
    values: RwLock<Vec<Value>>,
    nodes: RwLock<Vec<Node>>,
    /// Application interning: `(op, inputs)` resolves to the node that
    /// already applied it. Makes pure composition idempotent, so a
    /// decompose/compose round-trip lands on the original node.
    apps: RwLock<HashMap<(OpId, SmallVec<[ValueId; 4]>), NodeId>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            registry: OpRegistry::new(),
            values: RwLock::new(Vec::new()),
            nodes: RwLock::new(Vec::new()),
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    /// Create an unowned leaf value.
    pub fn leaf(&self, ty: TypeTag) -> ValueId {
        self.push_value(Value {
            ty,
            name: None,
            owner: None,
        })
    }

    /// Create a named leaf value.
    pub fn named_leaf(&self, ty: TypeTag, name: &str) -> ValueId {
        self.push_value(Value {
            ty,
            name: Some(name.to_string()),
            owner: None,
        })
    }

    fn push_value(&self, value: Value) -> ValueId {
        let mut values = self.values.write();
        let id = ValueId(values.len() as u32);
        values.push(value);
        id
    }

    /// Apply an operator to ordered operands, constructing a node and
    /// its output values.
    ///
    /// Applications are interned: applying the same operator to the
    /// same operands returns the existing node. Otherwise the operator
    /// types the outputs via `Op::infer` (a rejection is returned
    /// as-is) and the output values carry back-references to the new
    /// node.
    pub fn apply(&self, op: OpId, inputs: &[ValueId]) -> Result<NodeId, OpApplyError> {
        let key = (op, SmallVec::from_slice(inputs));

        // Fast path: the application already exists.
        if let Some(&node) = self.apps.read().get(&key) {
            return Ok(node);
        }

        let op_impl = self.registry.get(op).ok_or_else(|| {
            OpApplyError::new(format!("unregistered operator id {:?}", op))
        })?;
        let out_tys = op_impl.infer(self, inputs)?;

        let mut values = self.values.write();
        let mut nodes = self.nodes.write();
        let mut apps = self.apps.write();

        // Double-check after acquiring the write locks.
        if let Some(&node) = apps.get(&key) {
            return Ok(node);
        }

        let node_id = NodeId(nodes.len() as u32);
        let mut outputs: SmallVec<[ValueId; 2]> = SmallVec::new();
        for (index, ty) in out_tys.into_iter().enumerate() {
            let vid = ValueId(values.len() as u32);
            values.push(Value {
                ty,
                name: None,
                owner: Some(Owner {
                    node: node_id,
                    index,
                }),
            });
            outputs.push(vid);
        }
        nodes.push(Node {
            op,
            inputs: SmallVec::from_slice(inputs),
            outputs,
        });
        apps.insert(key, node_id);
        Ok(node_id)
    }

    /// Resolve a value id. `None` if the id is not from this store.
    pub fn value(&self, id: ValueId) -> Option<Value> {
        self.values.read().get(id.raw() as usize).cloned()
    }

    /// Owning node of a value; `None` for leaves and invalid ids.
    pub fn owner(&self, id: ValueId) -> Option<Owner> {
        self.values
            .read()
            .get(id.raw() as usize)
            .and_then(|v| v.owner)
    }

    /// Type tag of a value.
    pub fn ty(&self, id: ValueId) -> Option<TypeTag> {
        self.values.read().get(id.raw() as usize).map(|v| v.ty)
    }

    /// Resolve a node id.
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.nodes.read().get(id.raw() as usize).cloned()
    }

    /// Operator of a node.
    pub fn op_of(&self, id: NodeId) -> Option<OpId> {
        self.nodes.read().get(id.raw() as usize).map(|n| n.op)
    }

    /// Ordered input list of a node.
    pub fn inputs_of(&self, id: NodeId) -> Option<SmallVec<[ValueId; 4]>> {
        self.nodes
            .read()
            .get(id.raw() as usize)
            .map(|n| n.inputs.clone())
    }

    /// Ordered output list of a node.
    pub fn outputs_of(&self, id: NodeId) -> Option<SmallVec<[ValueId; 2]>> {
        self.nodes
            .read()
            .get(id.raw() as usize)
            .map(|n| n.outputs.clone())
    }

    /// Operator implementation for a node.
    pub fn op_impl_of(&self, id: NodeId) -> Option<Arc<dyn Op>> {
        self.op_of(id).and_then(|op| self.registry.get(op))
    }

    /// The single output that stands for the node: the operator's
    /// declared default output, else the sole output, else none.
    pub fn canonical_output(&self, id: NodeId) -> Option<ValueId> {
        let node = self.node(id)?;
        let op = self.registry.get(node.op)?;
        match op.default_output() {
            Some(index) => node.outputs.get(index).copied(),
            None if node.outputs.len() == 1 => Some(node.outputs[0]),
            None => None,
        }
    }

    pub fn value_count(&self) -> usize {
        self.values.read().len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Replacement surgery referenced a value outside the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphError {
    NotAMember(ValueId),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NotAMember(v) => {
                write!(f, "value v{} is not a member of the graph", v.raw())
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// A function graph: an input/output frontier over a shared store,
/// plus the membership sets rewrite validation consults.
///
/// Members are the values reachable from the outputs (walking owner
/// back-references) together with the declared inputs. The rewrite
/// engine only reads membership; `replace_all` is the one mutating
/// entry point and belongs to the fixpoint driver.
pub struct Graph {
    store: Arc<GraphStore>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
    members: FxHashSet<ValueId>,
    member_nodes: FxHashSet<NodeId>,
}

impl Graph {
    pub fn new(store: Arc<GraphStore>, inputs: Vec<ValueId>, outputs: Vec<ValueId>) -> Self {
        let mut graph = Self {
            store,
            inputs,
            outputs,
            members: FxHashSet::default(),
            member_nodes: FxHashSet::default(),
        };
        graph.refresh();
        graph
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Shared handle to the underlying store.
    pub fn store_arc(&self) -> Arc<GraphStore> {
        Arc::clone(&self.store)
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Is the value currently reachable in this graph?
    pub fn contains(&self, value: ValueId) -> bool {
        self.members.contains(&value)
    }

    /// Is the node currently reachable in this graph?
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.member_nodes.contains(&node)
    }

    /// Member nodes in operands-first (topological) order.
    pub fn nodes_topo(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        // (node, expanded) pairs; a node is emitted once its operand
        // subtrees have been emitted.
        let mut stack: Vec<(NodeId, bool)> = Vec::new();

        for out in &self.outputs {
            if let Some(owner) = self.store.owner(*out) {
                stack.push((owner.node, false));
            }
        }

        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !visited.insert(node) {
                continue;
            }
            stack.push((node, true));
            if let Some(inputs) = self.store.inputs_of(node) {
                for input in inputs.iter().rev() {
                    if let Some(owner) = self.store.owner(*input) {
                        if !visited.contains(&owner.node) {
                            stack.push((owner.node, false));
                        }
                    }
                }
            }
        }
        order
    }

    /// Apply an ordered set of `old -> new` replacements.
    ///
    /// Each `old` must be a current member. Consumers of `old` among
    /// member nodes are rewired to `new`, graph outputs are substituted,
    /// and membership is recomputed once at the end.
    pub fn replace_all(&mut self, pairs: &[(ValueId, ValueId)]) -> Result<(), GraphError> {
        for (old, new) in pairs {
            if !self.members.contains(old) {
                return Err(GraphError::NotAMember(*old));
            }
            {
                let mut nodes = self.store.nodes.write();
                let mut apps = self.store.apps.write();
                for node_id in &self.member_nodes {
                    let node = &mut nodes[node_id.raw() as usize];
                    if !node.inputs.contains(old) {
                        continue;
                    }
                    // Rewiring changes the node's application key;
                    // keep the intern map in step.
                    apps.remove(&(node.op, node.inputs.clone()));
                    for input in node.inputs.iter_mut() {
                        if input == old {
                            *input = *new;
                        }
                    }
                    apps.entry((node.op, node.inputs.clone()))
                        .or_insert(*node_id);
                }
            }
            for out in self.outputs.iter_mut() {
                if out == old {
                    *out = *new;
                }
            }
        }
        self.refresh();
        Ok(())
    }

    fn refresh(&mut self) {
        self.members.clear();
        self.member_nodes.clear();
        let mut stack: Vec<ValueId> = self.outputs.clone();
        stack.extend(self.inputs.iter().copied());
        while let Some(value) = stack.pop() {
            if !self.members.insert(value) {
                continue;
            }
            if let Some(owner) = self.store.owner(value) {
                if self.member_nodes.insert(owner.node) {
                    if let Some(node) = self.store.node(owner.node) {
                        // All sibling outputs of a member node are members.
                        stack.extend(node.outputs.iter().copied());
                        stack.extend(node.inputs.iter().copied());
                    }
                }
            }
        }
    }
}
