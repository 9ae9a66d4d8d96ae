use crate::error::{LowerError, LowerResult};
use crate::ir::{BinOp, Value};
use crate::tensor::{BinaryOp, OpId, OpKind, Operation, ValueId};

use super::{result_type, ConversionPattern, RewriteCtx};

fn lower_binary_op(kind: BinaryOp) -> BinOp {
    match kind {
        BinaryOp::AddI => BinOp::Add,
        BinaryOp::SubI => BinOp::Sub,
        BinaryOp::MulI => BinOp::Mul,
        BinaryOp::AddF => BinOp::FAdd,
        BinaryOp::SubF => BinOp::FSub,
        BinaryOp::MulF => BinOp::FMul,
    }
}

/// Unpack two same-layout operands into paired elements.
fn zip_elements(cx: &mut RewriteCtx<'_>, lhs: ValueId, rhs: ValueId) -> LowerResult<Vec<(Value, Value)>> {
    let l = cx.elements(lhs)?;
    let r = cx.elements(rhs)?;
    if l.len() != r.len() {
        return Err(LowerError::match_failure(format!(
            "elementwise operands own {} and {} elements",
            l.len(),
            r.len()
        )));
    }
    Ok(l.into_iter().zip(r).collect())
}

/// Integer and float arithmetic, applied per owned element.
pub struct BinaryLowering;

impl ConversionPattern for BinaryLowering {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Binary { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::Binary { kind, lhs, rhs } = &op.kind else {
            return Err(LowerError::match_failure("not a binary op"));
        };
        let ty = result_type(op)?;
        let bin = lower_binary_op(*kind);
        let vals = zip_elements(cx, *lhs, *rhs)?
            .into_iter()
            .map(|(l, r)| cx.builder.binary(bin, l, r))
            .collect::<LowerResult<Vec<_>>>()?;
        cx.assemble(&vals, ty).map(Some)
    }
}

/// `addptr`: one `getelementptr` per element.
pub struct AddPtrLowering;

impl ConversionPattern for AddPtrLowering {
    fn name(&self) -> &'static str {
        "addptr"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::AddPtr { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::AddPtr { ptr, offset } = &op.kind else {
            return Err(LowerError::match_failure("not an addptr"));
        };
        let ty = result_type(op)?;
        if !ty.elem().is_ptr() {
            return Err(LowerError::invariant(format!("addptr producing {}", ty)));
        }
        let vals = zip_elements(cx, *ptr, *offset)?
            .into_iter()
            .map(|(p, o)| cx.builder.gep(p, o))
            .collect::<LowerResult<Vec<_>>>()?;
        cx.assemble(&vals, ty).map(Some)
    }
}
