use crate::error::{LowerError, LowerResult};
use crate::ir::{Dim, Value};
use crate::tensor::{self, ElemType, OpId, OpKind, Operation, ScalarType};

use super::indices::emit_indices;
use super::{result_type, ConversionPattern, RewriteCtx};

/// `make_range`: element `i` holds `start` plus its logical index.
pub struct MakeRangeLowering;

impl ConversionPattern for MakeRangeLowering {
    fn name(&self) -> &'static str {
        "make_range"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::MakeRange { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::MakeRange { start, end } = &op.kind else {
            return Err(LowerError::match_failure("not a make_range"));
        };
        let ty = result_type(op)?;
        let t = ty
            .as_tensor()
            .ok_or_else(|| LowerError::invariant("make_range producing a scalar"))?;
        if t.rank() != 1 {
            return Err(LowerError::invariant(format!("make_range of rank {}", t.rank())));
        }
        if t.elem != ElemType::Scalar(ScalarType::I32) {
            return Err(LowerError::not_implemented(format!("make_range of {}", t.elem)));
        }
        if end.checked_sub(*start) != Some(t.shape[0]) {
            return Err(LowerError::invariant(format!(
                "make_range [{}, {}) with {} elements",
                start, end, t.shape[0]
            )));
        }

        let indices = emit_indices(&mut cx.builder, &t.layout, &t.shape)?;
        let b = &mut cx.builder;
        let first = b.index(*start);
        let vals = indices
            .iter()
            .map(|idx| b.add(first, idx[0]))
            .collect::<LowerResult<Vec<_>>>()?;
        cx.assemble(&vals, ty).map(Some)
    }
}

/// `get_program_id`: the block index along the axis.
pub struct ProgramIdLowering;

impl ConversionPattern for ProgramIdLowering {
    fn name(&self) -> &'static str {
        "get_program_id"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::GetProgramId { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::GetProgramId { axis } = &op.kind else {
            return Err(LowerError::match_failure("not a get_program_id"));
        };
        let dim = Dim::from_axis(*axis)
            .ok_or_else(|| LowerError::invariant(format!("program id axis {}", axis)))?;
        match result_type(op)? {
            tensor::Type::Scalar(ElemType::Scalar(ScalarType::I32)) => Ok(Some(cx.builder.block_idx(dim))),
            other => Err(LowerError::invariant(format!("program id of type {}", other))),
        }
    }
}
