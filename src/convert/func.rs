use crate::error::{LowerError, LowerResult};
use crate::ir::Value;
use crate::tensor::{OpId, OpKind, Operation};

use super::{ConversionPattern, RewriteCtx};

/// Kernel `return`. Kernels produce their results through memory.
pub struct ReturnLowering;

impl ConversionPattern for ReturnLowering {
    fn name(&self) -> &'static str {
        "return"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Return { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        match &op.kind {
            OpKind::Return { operands } if operands.is_empty() => {
                cx.builder.ret();
                Ok(None)
            }
            OpKind::Return { .. } => Err(LowerError::match_failure(
                "only kernels that return nothing are supported",
            )),
            _ => Err(LowerError::match_failure("not a return")),
        }
    }
}
