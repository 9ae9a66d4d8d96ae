//! `convert_layout` between two blocked layouts, staged through shared
//! memory.
//!
//! The tensor is moved in rounds. One round covers, per dimension,
//! `max(min(shape, spcSrc), min(shape, spcDst))` elements, which is at
//! most a few CTA tiles of either layout:
//!
//! ```text
//!   for rep in grid(numReplicates):        row-major
//!       barrier
//!       every thread stores its src-layout elements of the round
//!       barrier
//!       every thread loads its dst-layout elements of the round
//! ```
//!
//! Offsets in the round buffer linearize the logical index with the
//! destination's `order[0]` fastest over the padded replica shape, so
//! both phases agree on where every element lives.

use tracing::debug;

use crate::analysis::allocation::elem_bits;
use crate::config::SHARED_ADDRESS_SPACE;
use crate::error::{ensure, LowerError, LowerResult};
use crate::index::{ceil_div, delinearize, linearize, product, reorder, Shape};
use crate::ir::builder::FunctionBuilder;
use crate::ir::{CastOp, Type, Value};
use crate::layout::BlockedLayout;
use crate::tensor::{OpId, OpKind, Operation};

use super::indices::{emit_base_index, emit_linearize, reorder_values};
use super::{convert_elem, result_type, ConversionPattern, RewriteCtx};

/// Round structure of one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReplicaPlan {
    pub num_replicates: Shape,
    /// CTA tiles of the source layout per round, per dimension.
    pub in_each: Shape,
    /// CTA tiles of the destination layout per round, per dimension.
    pub out_each: Shape,
}

impl ReplicaPlan {
    pub fn new(src: &BlockedLayout, dst: &BlockedLayout, shape: &[u32]) -> LowerResult<Self> {
        let src_spc = src.shape_per_cta();
        let dst_spc = dst.shape_per_cta();
        let rank = shape.len();
        let mut plan = ReplicaPlan {
            num_replicates: Shape::with_capacity(rank),
            in_each: Shape::with_capacity(rank),
            out_each: Shape::with_capacity(rank),
        };
        for d in 0..rank {
            let in_per_cta = shape[d].min(src_spc[d]);
            let out_per_cta = shape[d].min(dst_spc[d]);
            let max_per_cta = in_per_cta.max(out_per_cta);
            ensure(
                max_per_cta % in_per_cta == 0 && max_per_cta % out_per_cta == 0,
                || {
                    format!(
                        "dimension {}: per-CTA extents {} and {} do not nest",
                        d, in_per_cta, out_per_cta
                    )
                },
            )?;
            plan.num_replicates.push(ceil_div(shape[d], max_per_cta));
            plan.in_each.push(max_per_cta / in_per_cta);
            plan.out_each.push(max_per_cta / out_per_cta);
        }
        Ok(plan)
    }

    pub fn rounds(&self) -> u32 {
        product(&self.num_replicates)
    }
}

/// Which way one phase moves data.
enum Access<'v> {
    Store(&'v [Value]),
    Load(&'v mut [Option<Value>]),
}

/// Buffer geometry shared by both phases.
struct Staging<'a> {
    elem_ptr: Value,
    elem_ty: Type,
    /// Padded replica shape, arranged slowest to fastest.
    padded: Shape,
    out_order: &'a [u32],
}

/// Store or load the part of a thread's elements that falls into round
/// `rep`, using `vec`-wide shared accesses.
#[allow(clippy::too_many_arguments)]
fn process_replica(
    b: &mut FunctionBuilder,
    layout: &BlockedLayout,
    shape: &[u32],
    each: &[u32],
    rep: &[u32],
    vec: u32,
    staging: &Staging<'_>,
    mut access: Access<'_>,
) -> LowerResult<()> {
    let rank = shape.len();
    let spt = layout.size_per_thread();
    let spc = layout.shape_per_cta();
    let tiles = layout.num_tiles(shape);
    let block = product(spt);
    let vec_ty = Type::vector(vec, staging.elem_ty.clone());
    let vec_ptr_ty = Type::ptr(vec_ty.clone(), SHARED_ADDRESS_SPACE);
    let base = emit_base_index(b, layout, shape)?;

    for cta_in_rep in 0..product(each) {
        let in_rep = delinearize(cta_in_rep, each);
        let cta: Shape = (0..rank).map(|d| rep[d] * each[d] + in_rep[d]).collect();
        if cta.iter().zip(&tiles).any(|(c, t)| c >= t) {
            continue;
        }
        let linear_cta = linearize(&cta, &tiles);

        for elem_id in (0..block).step_by(vec as usize) {
            let elem = delinearize(elem_id, spt);
            let offset = (0..rank)
                .map(|d| {
                    let c = b.index(in_rep[d] * spc[d] + elem[d]);
                    b.add(base[d], c)
                })
                .collect::<LowerResult<Vec<_>>>()?;
            let reordered = reorder_values(&offset, staging.out_order);
            let linear = emit_linearize(b, &reordered, &staging.padded)?;
            let ptr = b.gep(staging.elem_ptr, linear)?;
            let ptr = b.cast(CastOp::Bitcast, ptr, vec_ptr_ty.clone());

            let first = (elem_id + linear_cta * block) as usize;
            match &mut access {
                Access::Store(vals) => {
                    let mut packed = b.undef(vec_ty.clone());
                    for v in 0..vec {
                        let value = vals.get(first + v as usize).copied().ok_or_else(|| {
                            LowerError::invariant(format!("no source element {}", first + v as usize))
                        })?;
                        let idx = b.index(v);
                        packed = b.insert_element(packed, value, idx)?;
                    }
                    b.store(packed, ptr);
                }
                Access::Load(slots) => {
                    let loaded = b.load(ptr)?;
                    for v in 0..vec {
                        let idx = b.index(v);
                        let value = b.extract_element(loaded, idx)?;
                        let slot = slots.get_mut(first + v as usize).ok_or_else(|| {
                            LowerError::invariant(format!("no result element {}", first + v as usize))
                        })?;
                        *slot = Some(value);
                    }
                }
            }
        }
    }
    Ok(())
}

pub struct ConvertLayoutLowering;

impl ConversionPattern for ConvertLayoutLowering {
    fn name(&self) -> &'static str {
        "convert_layout"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::ConvertLayout { .. })
    }

    fn rewrite(&self, id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::ConvertLayout { src } = &op.kind else {
            return Err(LowerError::match_failure("not a convert_layout"));
        };
        let ty = result_type(op)?;
        let src_ty = cx.tensor_ty(*src)?;
        let dst_ty = ty
            .as_tensor()
            .ok_or_else(|| LowerError::invariant("convert_layout to a scalar"))?;
        let (Some(src_layout), Some(dst_layout)) = (src_ty.layout.as_blocked(), dst_ty.layout.as_blocked())
        else {
            return Err(LowerError::not_implemented(format!(
                "convert_layout from {} to {}",
                src_ty.layout, dst_ty.layout
            )));
        };
        if src_ty.shape != dst_ty.shape {
            return Err(LowerError::invariant(format!(
                "convert_layout changes the shape from {} to {}",
                src_ty, dst_ty
            )));
        }
        let shape = &dst_ty.shape;
        src_layout.check_rank(shape)?;
        dst_layout.check_rank(shape)?;

        let region = cx
            .smem
            .region(id)
            .ok_or_else(|| LowerError::invariant(format!("no shared memory for op {}", id.0)))?;
        let config = cx
            .smem
            .scratch_config(id)
            .cloned()
            .ok_or_else(|| LowerError::invariant(format!("no scratch layout for op {}", id.0)))?;
        let elem_bytes = (elem_bits(dst_ty.elem) / 8).max(1);
        let needed = product(&config.padded_rep_shape) * elem_bytes;
        ensure(needed <= region.bytes, || {
            format!(
                "replica of {} bytes does not fit a region of {}",
                needed, region.bytes
            )
        })?;
        let plan = ReplicaPlan::new(src_layout, dst_layout, shape)?;
        debug!(
            op = id.0,
            rounds = plan.rounds(),
            replicates = ?plan.num_replicates,
            in_vec = config.in_vec,
            out_vec = config.out_vec,
            "layout conversion"
        );

        let src_vals = cx.elements(*src)?;
        let out_count = dst_layout.elems_per_thread(shape) as usize;
        let mut out_vals: Vec<Option<Value>> = vec![None; out_count];
        let elem_ty = convert_elem(dst_ty.elem);
        let out_order = dst_layout.order();

        let b = &mut cx.builder;
        let offset = b.index(region.offset);
        let raw = b.gep(cx.smem_base, offset)?;
        let elem_ptr = b.cast(
            CastOp::Bitcast,
            raw,
            Type::ptr(elem_ty.clone(), SHARED_ADDRESS_SPACE),
        );
        let staging = Staging {
            elem_ptr,
            elem_ty,
            padded: reorder(&config.padded_rep_shape, out_order),
            out_order,
        };

        for rep_id in 0..plan.rounds() {
            let rep = delinearize(rep_id, &plan.num_replicates);
            b.barrier();
            process_replica(
                b,
                src_layout,
                shape,
                &plan.in_each,
                &rep,
                config.in_vec,
                &staging,
                Access::Store(&src_vals),
            )?;
            b.barrier();
            process_replica(
                b,
                dst_layout,
                shape,
                &plan.out_each,
                &rep,
                config.out_vec,
                &staging,
                Access::Load(&mut out_vals),
            )?;
        }

        let vals = out_vals
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| LowerError::invariant(format!("result element {} never loaded", i))))
            .collect::<LowerResult<Vec<_>>>()?;
        cx.assemble(&vals, ty).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(spt: &[u32], tpw: &[u32], wpc: &[u32], order: &[u32]) -> BlockedLayout {
        BlockedLayout::new(spt, tpw, wpc, order).unwrap()
    }

    #[test]
    fn test_plan_single_round_when_tiles_cover_shape() {
        let src = blocked(&[4], &[32], &[1], &[0]);
        let dst = blocked(&[1], &[32], &[1], &[0]);
        let plan = ReplicaPlan::new(&src, &dst, &[128]).unwrap();
        assert_eq!(plan.num_replicates.as_slice(), &[1]);
        assert_eq!(plan.in_each.as_slice(), &[1]);
        assert_eq!(plan.out_each.as_slice(), &[4]);
    }

    #[test]
    fn test_plan_rounds_over_large_shapes() {
        let src = blocked(&[1, 4], &[8, 4], &[1, 1], &[1, 0]);
        let dst = blocked(&[4, 1], &[4, 8], &[1, 1], &[0, 1]);
        // spc src [8, 16], dst [16, 8]: rounds of 16 x 16
        let plan = ReplicaPlan::new(&src, &dst, &[64, 32]).unwrap();
        assert_eq!(plan.num_replicates.as_slice(), &[4, 2]);
        assert_eq!(plan.rounds(), 8);
        assert_eq!(plan.in_each.as_slice(), &[2, 1]);
        assert_eq!(plan.out_each.as_slice(), &[1, 2]);
    }

    #[test]
    fn test_plan_rejects_non_nesting_tiles() {
        let src = blocked(&[3], &[32], &[1], &[0]);
        let dst = blocked(&[2], &[32], &[1], &[0]);
        let err = ReplicaPlan::new(&src, &dst, &[192]).unwrap_err();
        assert!(!err.is_recoverable());
    }
}
