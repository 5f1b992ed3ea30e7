use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

use crate::graph::{GraphStore, Op, OpApplyError, OpId, TypeTag, ValueId};

pub(crate) const VECTOR: TypeTag = TypeTag(0);
pub(crate) const MATRIX: TypeTag = TypeTag(1);

/// Element-wise addition: two operands of one type, one output of the
/// same type.
#[derive(Debug)]
pub(crate) struct AddOp;

impl Op for AddOp {
    fn name(&self) -> &str {
        "add"
    }

    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError> {
        if inputs.len() != 2 {
            return Err(OpApplyError::for_op(
                "add",
                format!("expected 2 operands, got {}", inputs.len()),
            ));
        }
        let left = store
            .ty(inputs[0])
            .ok_or_else(|| OpApplyError::for_op("add", "unknown operand"))?;
        let right = store
            .ty(inputs[1])
            .ok_or_else(|| OpApplyError::for_op("add", "unknown operand"))?;
        if left != right {
            return Err(OpApplyError::for_op("add", "operand types differ"));
        }
        Ok(smallvec![left])
    }
}

/// Matrix product: matrix times vector-or-matrix.
#[derive(Debug)]
pub(crate) struct DotOp;

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
            return Err(OpApplyError::for_op(
                "dot",
                format!("expected 2 operands, got {}", inputs.len()),
            ));
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

/// Two-output splitter with no declared default output.
#[derive(Debug)]
pub(crate) struct SplitOp;

impl Op for SplitOp {
    fn name(&self) -> &str {
        "split"
    }

    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError> {
        if inputs.len() != 1 {
            return Err(OpApplyError::for_op("split", "expected 1 operand"));
        }
        let ty = store
            .ty(inputs[0])
            .ok_or_else(|| OpApplyError::for_op("split", "unknown operand"))?;
        Ok(smallvec![ty, ty])
    }
}

/// Two-output splitter declaring its second output as the default.
#[derive(Debug)]
pub(crate) struct SplitHiOp;

impl Op for SplitHiOp {
    fn name(&self) -> &str {
        "split_hi"
    }

    fn infer(
        &self,
        store: &GraphStore,
        inputs: &[ValueId],
    ) -> Result<SmallVec<[TypeTag; 2]>, OpApplyError> {
        if inputs.len() != 1 {
            return Err(OpApplyError::for_op("split_hi", "expected 1 operand"));
        }
        let ty = store
            .ty(inputs[0])
            .ok_or_else(|| OpApplyError::for_op("split_hi", "unknown operand"))?;
        Ok(smallvec![ty, ty])
    }

    fn default_output(&self) -> Option<usize> {
        Some(1)
    }
}

pub(crate) struct Ctx {
    pub store: Arc<GraphStore>,
    pub add: OpId,
    pub dot: OpId,
    pub split: OpId,
    pub split_hi: OpId,
}

impl Ctx {
    /// Apply a single-output (or default-output) operator and return
    /// the resulting value.
    pub fn value(&self, op: OpId, inputs: &[ValueId]) -> ValueId {
        let node = self.store.apply(op, inputs).unwrap();
        self.store.canonical_output(node).unwrap()
    }
}

pub(crate) fn setup() -> Ctx {
    let store = Arc::new(GraphStore::new());
    let add = store.registry().register(Arc::new(AddOp));
    let dot = store.registry().register(Arc::new(DotOp));
    let split = store.registry().register(Arc::new(SplitOp));
    let split_hi = store.registry().register(Arc::new(SplitHiOp));
    Ctx {
        store,
        add,
        dot,
        split,
        split_hi,
    }
}
