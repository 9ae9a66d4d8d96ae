use crate::error::{LowerError, LowerResult};
use crate::ir::{Type, Value};
use crate::tensor::{self, ConstValue, OpId, OpKind, Operation};

use super::{convert_elem, result_type, ConversionPattern, RewriteCtx};

/// `splat` and `constant`: one scalar copied into every owned element.
pub struct SplatLowering;

impl ConversionPattern for SplatLowering {
    fn name(&self) -> &'static str {
        "splat"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Splat { .. } | OpKind::Constant { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let ty = result_type(op)?;
        let scalar = match &op.kind {
            OpKind::Splat { src } => {
                if cx.ty(*src)?.as_tensor().is_some() {
                    return Err(LowerError::invariant("splat of a tensor operand"));
                }
                cx.operand(*src)?
            }
            OpKind::Constant { value } => emit_constant(cx, *value, &convert_elem(ty.elem()))?,
            _ => return Err(LowerError::match_failure("not a splat")),
        };
        match ty {
            tensor::Type::Tensor(t) => {
                let count = t.layout.elems_per_thread(&t.shape)?;
                let copies = vec![scalar; count as usize];
                cx.assemble(&copies, ty).map(Some)
            }
            tensor::Type::Scalar(_) => Ok(Some(scalar)),
        }
    }
}

fn emit_constant(cx: &mut RewriteCtx<'_>, value: ConstValue, ty: &Type) -> LowerResult<Value> {
    let b = &mut cx.builder;
    match (value, ty) {
        (ConstValue::Bool(v), Type::Int(bits)) => Ok(b.const_int(*bits, i64::from(v))),
        (ConstValue::Int(v), Type::Int(bits)) => Ok(b.const_int(*bits, v)),
        (ConstValue::Float(v), t) if t.is_float() => Ok(b.const_float(t.clone(), v)),
        (ConstValue::Int(v), t) if t.is_float() => Ok(b.const_float(t.clone(), v as f64)),
        (value, ty) => Err(LowerError::invariant(format!(
            "constant {:?} does not fit type {}",
            value, ty
        ))),
    }
}
