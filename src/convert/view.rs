use crate::error::{LowerError, LowerResult};
use crate::ir::Value;
use crate::tensor::{OpId, OpKind, Operation};

use super::{result_type, ConversionPattern, RewriteCtx};

/// `view` and `expand_dims`: same elements in the same order, repacked
/// under the result type.
pub struct ViewLowering;

impl ConversionPattern for ViewLowering {
    fn name(&self) -> &'static str {
        "view"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::View { .. } | OpKind::ExpandDims { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let src = match &op.kind {
            OpKind::View { src } | OpKind::ExpandDims { src, .. } => *src,
            _ => return Err(LowerError::match_failure("not a view-like op")),
        };
        let ty = result_type(op)?;
        let vals = cx.elements(src)?;
        cx.assemble(&vals, ty).map(Some)
    }
}
