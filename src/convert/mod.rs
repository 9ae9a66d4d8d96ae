//! Tile-op to per-thread lowering rules.
//!
//! Each rule implements `ConversionPattern`: it claims ops by kind and
//! rewrites one op into builder calls, returning the lowered result.
//! Rules see operands through `RewriteCtx`, which maps every already
//! lowered tile value to its per-thread value.

mod broadcast;
mod convert_layout;
mod elementwise;
mod func;
pub mod indices;
pub mod marshal;
mod memory;
mod range;
mod splat;
mod view;

use std::collections::HashMap;

use crate::analysis::{AxisInfoOracle, SharedMemoryPlan};
use crate::config::GLOBAL_ADDRESS_SPACE;
use crate::error::{LowerError, LowerResult};
use crate::ir::builder::FunctionBuilder;
use crate::ir::{self, Value};
use crate::tensor::{self, ConstValue, ElemType, OpId, Operation, ScalarType, TensorType, ValueId};

pub use broadcast::{broadcast_slots, BroadcastLowering};
pub use convert_layout::ConvertLayoutLowering;
pub use elementwise::{AddPtrLowering, BinaryLowering};
pub use func::ReturnLowering;
pub use memory::{choose_vector_width, LoadLowering, StoreLowering, WordShape};
pub use range::{MakeRangeLowering, ProgramIdLowering};
pub use splat::SplatLowering;
pub use view::ViewLowering;

/// One lowering rule.
pub trait ConversionPattern {
    fn name(&self) -> &'static str;

    fn matches(&self, op: &Operation) -> bool;

    /// Emit the lowered form of `op`; returns its result value, if any.
    fn rewrite(&self, id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>>;
}

/// Every rule, in match order.
pub fn populate_patterns() -> Vec<Box<dyn ConversionPattern>> {
    vec![
        Box::new(SplatLowering),
        Box::new(BroadcastLowering),
        Box::new(BinaryLowering),
        Box::new(AddPtrLowering),
        Box::new(LoadLowering),
        Box::new(StoreLowering),
        Box::new(MakeRangeLowering),
        Box::new(ProgramIdLowering),
        Box::new(ViewLowering),
        Box::new(ConvertLayoutLowering),
        Box::new(ReturnLowering),
    ]
}

pub struct RewriteCtx<'a> {
    pub builder: FunctionBuilder,
    pub axis: &'a dyn AxisInfoOracle,
    pub smem: &'a dyn SharedMemoryPlan,
    /// `i8` pointer to the start of the module's shared array.
    pub smem_base: Value,
    pub num_warps: u32,
    types: &'a HashMap<ValueId, tensor::Type>,
    constants: HashMap<ValueId, ConstValue>,
    values: HashMap<ValueId, Value>,
}

impl<'a> RewriteCtx<'a> {
    pub fn new(
        builder: FunctionBuilder,
        types: &'a HashMap<ValueId, tensor::Type>,
        constants: HashMap<ValueId, ConstValue>,
        axis: &'a dyn AxisInfoOracle,
        smem: &'a dyn SharedMemoryPlan,
        smem_base: Value,
        num_warps: u32,
    ) -> Self {
        Self {
            builder,
            axis,
            smem,
            smem_base,
            num_warps,
            types,
            constants,
            values: HashMap::new(),
        }
    }

    pub fn map(&mut self, tile: ValueId, lowered: Value) {
        self.values.insert(tile, lowered);
    }

    /// The lowered form of an operand.
    pub fn operand(&self, v: ValueId) -> LowerResult<Value> {
        self.values
            .get(&v)
            .copied()
            .ok_or_else(|| LowerError::match_failure(format!("operand {} was not lowered", v)))
    }

    pub fn ty(&self, v: ValueId) -> LowerResult<&'a tensor::Type> {
        self.types
            .get(&v)
            .ok_or_else(|| LowerError::invariant(format!("{} has no type", v)))
    }

    pub fn tensor_ty(&self, v: ValueId) -> LowerResult<&'a TensorType> {
        self.ty(v)?
            .as_tensor()
            .ok_or_else(|| LowerError::invariant(format!("{} is not a tensor", v)))
    }

    /// Constant defining `v`, if it comes from a `constant` op.
    pub fn constant(&self, v: ValueId) -> Option<ConstValue> {
        self.constants.get(&v).copied()
    }

    /// Scalar elements of a value: the struct fields of a tensor, or the
    /// value itself for a scalar.
    pub fn elements(&mut self, v: ValueId) -> LowerResult<Vec<Value>> {
        let lowered = self.operand(v)?;
        match self.ty(v)? {
            tensor::Type::Tensor(t) => {
                let count = t.layout.elems_per_thread(&t.shape)?;
                marshal::unpack(&mut self.builder, lowered, count)
            }
            tensor::Type::Scalar(_) => Ok(vec![lowered]),
        }
    }

    /// Inverse of [`RewriteCtx::elements`] for a result of type `ty`.
    pub fn assemble(&mut self, values: &[Value], ty: &tensor::Type) -> LowerResult<Value> {
        match ty {
            tensor::Type::Tensor(t) => {
                let expected = t.layout.elems_per_thread(&t.shape)?;
                if values.len() != expected as usize {
                    return Err(LowerError::invariant(format!(
                        "{} elements produced for {}, layout implies {}",
                        values.len(),
                        t,
                        expected
                    )));
                }
                let elem = convert_elem(t.elem);
                marshal::pack(&mut self.builder, values, &elem)
            }
            tensor::Type::Scalar(_) => match values {
                [v] => Ok(*v),
                _ => Err(LowerError::invariant(format!(
                    "{} values produced for scalar {}",
                    values.len(),
                    ty
                ))),
            },
        }
    }
}

/// Result type of `op`, which must produce a value.
pub(crate) fn result_type(op: &Operation) -> LowerResult<&tensor::Type> {
    op.ty
        .as_ref()
        .ok_or_else(|| LowerError::invariant(format!("{} has no result type", op.kind.name())))
}

// ─── Type conversion ───────────────────────────────────────────────

pub fn convert_scalar(s: ScalarType) -> ir::Type {
    match s {
        ScalarType::I1 => ir::Type::Int(1),
        ScalarType::I8 => ir::Type::Int(8),
        ScalarType::I16 => ir::Type::Int(16),
        ScalarType::I32 => ir::Type::Int(32),
        ScalarType::I64 => ir::Type::Int(64),
        ScalarType::F16 => ir::Type::F16,
        ScalarType::F32 => ir::Type::F32,
        ScalarType::F64 => ir::Type::F64,
    }
}

pub fn convert_elem(e: ElemType) -> ir::Type {
    match e {
        ElemType::Scalar(s) => convert_scalar(s),
        ElemType::Ptr { ptr } => ir::Type::ptr(convert_scalar(ptr), GLOBAL_ADDRESS_SPACE),
    }
}

/// Lowered type of a tile value: a struct of the thread's elements for a
/// tensor, the element type for a scalar.
pub fn convert_type(ty: &tensor::Type) -> LowerResult<ir::Type> {
    match ty {
        tensor::Type::Tensor(t) => {
            let count = t.layout.elems_per_thread(&t.shape)?;
            Ok(ir::Type::Struct(vec![convert_elem(t.elem); count as usize]))
        }
        tensor::Type::Scalar(e) => Ok(convert_elem(*e)),
    }
}

#[cfg(test)]
mod tests;
