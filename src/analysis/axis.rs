//! Axis information: for every dimension of a value,
//!
//! ```text
//!   contiguity    length of runs of values increasing by exactly 1
//!   divisibility  largest power of two dividing the first value of each run
//!   constancy     length of runs of equal values
//! ```
//!
//! Pointer divisibility is counted in elements of the pointee, not bytes.
//! Scalars are treated as rank-1 values of one element.

use std::collections::HashMap;

use tracing::trace;

use crate::index::Shape;
use crate::tensor::{BinaryOp, ConstValue, ElemType, Kernel, OpKind, Type, ValueId};

/// Cap for the divisibility of zero and of large constants.
pub const MAX_DIVISIBILITY: u32 = 1 << 30;

/// Alignment and contiguity facts about values of the input kernel.
pub trait AxisInfoOracle {
    fn info(&self, value: ValueId) -> Option<&AxisInfo>;

    fn divisibility(&self, value: ValueId, dim: usize) -> u32 {
        self.info(value)
            .and_then(|i| i.divisibility.get(dim).copied())
            .unwrap_or(1)
    }

    fn contiguity(&self, value: ValueId, dim: usize) -> u32 {
        self.info(value)
            .and_then(|i| i.contiguity.get(dim).copied())
            .unwrap_or(1)
    }

    fn constancy(&self, value: ValueId, dim: usize) -> u32 {
        self.info(value)
            .and_then(|i| i.constancy.get(dim).copied())
            .unwrap_or(1)
    }
}

/// Oracle that knows nothing; every query answers 1.
pub struct NoAxisInfo;

impl AxisInfoOracle for NoAxisInfo {
    fn info(&self, _value: ValueId) -> Option<&AxisInfo> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisInfo {
    pub contiguity: Shape,
    pub divisibility: Shape,
    pub constancy: Shape,
}

impl AxisInfo {
    fn unknown(rank: usize) -> Self {
        Self::uniform(rank, 1, 1, 1)
    }

    fn uniform(rank: usize, contiguity: u32, divisibility: u32, constancy: u32) -> Self {
        Self {
            contiguity: Shape::from_elem(contiguity, rank),
            divisibility: Shape::from_elem(divisibility, rank),
            constancy: Shape::from_elem(constancy, rank),
        }
    }

    fn rank(&self) -> usize {
        self.contiguity.len()
    }
}

/// Largest power of two dividing `v`, capped at [`MAX_DIVISIBILITY`].
pub fn pow2_divisor(v: i64) -> u32 {
    if v == 0 {
        return MAX_DIVISIBILITY;
    }
    let tz = v.unsigned_abs().trailing_zeros();
    if tz >= MAX_DIVISIBILITY.trailing_zeros() {
        MAX_DIVISIBILITY
    } else {
        1 << tz
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn shape_of(ty: Option<&Type>) -> Shape {
    match ty.and_then(Type::as_tensor) {
        Some(t) => t.shape.clone(),
        None => Shape::from_slice(&[1]),
    }
}

/// Forward dataflow over the straight-line kernel body.
#[derive(Debug, Default)]
pub struct AxisAnalysis {
    infos: HashMap<ValueId, AxisInfo>,
}

impl AxisInfoOracle for AxisAnalysis {
    fn info(&self, value: ValueId) -> Option<&AxisInfo> {
        self.infos.get(&value)
    }
}

impl AxisAnalysis {
    pub fn run(kernel: &Kernel) -> Self {
        let mut analysis = Self::default();

        for arg in &kernel.args {
            let info = match (arg.ty.elem(), arg.divisibility) {
                (ElemType::Ptr { ptr }, Some(bytes)) => {
                    let elem_bytes = ptr.bit_width().div_ceil(8).max(1);
                    AxisInfo::uniform(1, 1, (bytes / elem_bytes).max(1), 1)
                }
                (_, Some(div)) => AxisInfo::uniform(1, 1, div.max(1), 1),
                (_, None) => AxisInfo::unknown(1),
            };
            analysis.infos.insert(arg.id, info);
        }

        for op in &kernel.body {
            let Some(result) = op.result else { continue };
            let shape = shape_of(op.ty.as_ref());
            let info = analysis.visit(&op.kind, &shape);
            trace!(value = %result, ?info, "axis info");
            analysis.infos.insert(result, info);
        }
        analysis
    }

    fn get(&self, v: ValueId, rank: usize) -> AxisInfo {
        match self.infos.get(&v) {
            Some(info) if info.rank() == rank => info.clone(),
            // A scalar operand of a tensor op behaves like a splat.
            Some(info) if info.rank() == 1 => AxisInfo::uniform(rank, 1, info.divisibility[0], 1),
            _ => AxisInfo::unknown(rank),
        }
    }

    fn visit(&self, kind: &OpKind, shape: &[u32]) -> AxisInfo {
        let rank = shape.len();
        match kind {
            OpKind::MakeRange { start, end } => AxisInfo {
                contiguity: Shape::from_slice(&[end.saturating_sub(*start).max(1)]),
                divisibility: Shape::from_slice(&[pow2_divisor(i64::from(*start))]),
                constancy: Shape::from_slice(&[1]),
            },
            OpKind::Constant { value } => {
                let div = match value {
                    ConstValue::Int(v) => pow2_divisor(*v),
                    ConstValue::Bool(_) | ConstValue::Float(_) => 1,
                };
                AxisInfo {
                    contiguity: Shape::from_elem(1, rank),
                    divisibility: Shape::from_elem(div, rank),
                    constancy: Shape::from_slice(shape),
                }
            }
            OpKind::Splat { src } => {
                let div = self.divisibility(*src, 0);
                AxisInfo {
                    contiguity: Shape::from_elem(1, rank),
                    divisibility: Shape::from_elem(div, rank),
                    constancy: Shape::from_slice(shape),
                }
            }
            OpKind::AddPtr { ptr: lhs, offset: rhs }
            | OpKind::Binary {
                kind: BinaryOp::AddI,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.get(*lhs, rank), self.get(*rhs, rank));
                AxisInfo {
                    contiguity: (0..rank)
                        .map(|d| {
                            gcd(l.contiguity[d], r.constancy[d]).max(gcd(l.constancy[d], r.contiguity[d]))
                        })
                        .collect(),
                    divisibility: (0..rank).map(|d| gcd(l.divisibility[d], r.divisibility[d])).collect(),
                    constancy: (0..rank).map(|d| gcd(l.constancy[d], r.constancy[d])).collect(),
                }
            }
            OpKind::Binary {
                kind: BinaryOp::SubI,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.get(*lhs, rank), self.get(*rhs, rank));
                AxisInfo {
                    contiguity: (0..rank).map(|d| gcd(l.contiguity[d], r.constancy[d])).collect(),
                    divisibility: (0..rank).map(|d| gcd(l.divisibility[d], r.divisibility[d])).collect(),
                    constancy: (0..rank).map(|d| gcd(l.constancy[d], r.constancy[d])).collect(),
                }
            }
            OpKind::Binary {
                kind: BinaryOp::MulI,
                lhs,
                rhs,
            } => {
                let (l, r) = (self.get(*lhs, rank), self.get(*rhs, rank));
                AxisInfo {
                    contiguity: Shape::from_elem(1, rank),
                    divisibility: (0..rank)
                        .map(|d| {
                            l.divisibility[d]
                                .saturating_mul(r.divisibility[d])
                                .min(MAX_DIVISIBILITY)
                        })
                        .collect(),
                    constancy: (0..rank).map(|d| gcd(l.constancy[d], r.constancy[d])).collect(),
                }
            }
            OpKind::Binary { lhs, rhs, .. } => {
                let (l, r) = (self.get(*lhs, rank), self.get(*rhs, rank));
                AxisInfo {
                    contiguity: Shape::from_elem(1, rank),
                    divisibility: Shape::from_elem(1, rank),
                    constancy: (0..rank).map(|d| gcd(l.constancy[d], r.constancy[d])).collect(),
                }
            }
            OpKind::Broadcast { src } => {
                let s = self.get(*src, rank);
                let mut info = s.clone();
                for d in 0..rank {
                    if s.constancy[d] == 1 && s.contiguity[d] == 1 && shape[d] > 1 {
                        // grown unit dimension
                        info.constancy[d] = shape[d];
                    }
                }
                info
            }
            OpKind::ExpandDims { src, axis } => {
                let s = self.get(*src, rank.saturating_sub(1).max(1));
                let axis = (*axis as usize).min(s.rank());
                let mut info = s;
                if rank > info.rank() {
                    let div = info.divisibility.first().copied().unwrap_or(1);
                    info.contiguity.insert(axis, 1);
                    info.divisibility.insert(axis, div);
                    info.constancy.insert(axis, 1);
                }
                info
            }
            OpKind::ConvertLayout { src } => self.get(*src, rank),
            OpKind::View { .. }
            | OpKind::Load { .. }
            | OpKind::GetProgramId { .. }
            | OpKind::Store { .. }
            | OpKind::Return { .. } => AxisInfo::unknown(rank),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BlockedLayout, Layout};
    use crate::tensor::{KernelBuilder, ScalarType, TensorType};

    fn layout() -> Layout {
        Layout::Blocked(BlockedLayout::new(&[4], &[32], &[1], &[0]).unwrap())
    }

    fn tensor(elem: ElemType) -> Type {
        Type::Tensor(TensorType::new(&[128], elem, layout()))
    }

    #[test]
    fn test_pow2_divisor() {
        assert_eq!(pow2_divisor(0), MAX_DIVISIBILITY);
        assert_eq!(pow2_divisor(12), 4);
        assert_eq!(pow2_divisor(-8), 8);
        assert_eq!(pow2_divisor(7), 1);
    }

    #[test]
    fn test_pointer_plus_range() {
        let f32_ptr = ElemType::Ptr { ptr: ScalarType::F32 };
        let mut kb = KernelBuilder::new("k");
        let base = kb.arg(Type::Scalar(f32_ptr), Some(16));
        let range = kb.op(
            tensor(ElemType::Scalar(ScalarType::I32)),
            OpKind::MakeRange { start: 0, end: 128 },
        );
        let ptrs = kb.op(tensor(f32_ptr), OpKind::Splat { src: base });
        let addr = kb.op(tensor(f32_ptr), OpKind::AddPtr { ptr: ptrs, offset: range });
        let axis = AxisAnalysis::run(&kb.finish());

        // 16 bytes of alignment is 4 f32 elements
        assert_eq!(axis.divisibility(base, 0), 4);
        assert_eq!(axis.constancy(ptrs, 0), 128);
        assert_eq!(axis.contiguity(range, 0), 128);
        assert_eq!(axis.contiguity(addr, 0), 128);
        assert_eq!(axis.divisibility(addr, 0), 4);
    }

    #[test]
    fn test_offset_by_odd_constant_breaks_alignment() {
        let i32_ty = ElemType::Scalar(ScalarType::I32);
        let mut kb = KernelBuilder::new("k");
        let range = kb.op(tensor(i32_ty), OpKind::MakeRange { start: 0, end: 128 });
        let three = kb.op(
            tensor(i32_ty),
            OpKind::Constant {
                value: ConstValue::Int(3),
            },
        );
        let sum = kb.op(
            tensor(i32_ty),
            OpKind::Binary {
                kind: BinaryOp::AddI,
                lhs: range,
                rhs: three,
            },
        );
        let prod = kb.op(
            tensor(i32_ty),
            OpKind::Binary {
                kind: BinaryOp::MulI,
                lhs: range,
                rhs: three,
            },
        );
        let axis = AxisAnalysis::run(&kb.finish());
        assert_eq!(axis.contiguity(sum, 0), 128);
        assert_eq!(axis.divisibility(sum, 0), 1);
        assert_eq!(axis.contiguity(prod, 0), 1);
    }

    #[test]
    fn test_unknown_values_answer_one() {
        assert_eq!(NoAxisInfo.divisibility(ValueId(3), 0), 1);
        assert_eq!(NoAxisInfo.contiguity(ValueId(3), 1), 1);
    }
}
