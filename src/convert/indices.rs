//! Index arithmetic emitted into the lowered function.
//!
//! IR twins of `index` and `layout::ownership`: same formulas, computed
//! at run time from the thread id. Offsets that do not depend on the
//! thread are folded into constants at lowering time.

use tracing::trace;

use crate::config::WARP_SIZE;
use crate::error::{LowerError, LowerResult};
use crate::index::{ceil_div, reorder};
use crate::ir::builder::FunctionBuilder;
use crate::ir::{Dim, Value};
use crate::layout::ownership::element_offsets;
use crate::layout::{BlockedLayout, Layout};

/// Row-major delinearization of `linear` under `shape`.
pub fn emit_delinearize(b: &mut FunctionBuilder, linear: Value, shape: &[u32]) -> LowerResult<Vec<Value>> {
    let rank = shape.len();
    let mut multi = vec![linear; rank];
    let mut remaining = linear;
    for d in (0..rank).rev() {
        let extent = b.index(shape[d]);
        multi[d] = b.urem(remaining, extent)?;
        if d > 0 {
            remaining = b.udiv(remaining, extent)?;
        }
    }
    Ok(multi)
}

/// Delinearize with `order[0]` as the fastest-varying dimension.
pub fn emit_delinearize_ordered(
    b: &mut FunctionBuilder,
    linear: Value,
    shape: &[u32],
    order: &[u32],
) -> LowerResult<Vec<Value>> {
    let rank = order.len();
    let permuted = reorder(shape, order);
    let multi = emit_delinearize(b, linear, &permuted)?;
    let mut out = vec![linear; rank];
    for (i, &d) in order.iter().enumerate() {
        out[d as usize] = multi[rank - 1 - i];
    }
    Ok(out)
}

/// Row-major linearization of `multi` under `shape`.
pub fn emit_linearize(b: &mut FunctionBuilder, multi: &[Value], shape: &[u32]) -> LowerResult<Value> {
    if multi.len() != shape.len() || multi.is_empty() {
        return Err(LowerError::invariant(format!(
            "linearize: {} indices for a shape of rank {}",
            multi.len(),
            shape.len()
        )));
    }
    let mut linear = multi[0];
    for d in 1..shape.len() {
        let extent = b.index(shape[d]);
        let scaled = b.mul(linear, extent)?;
        linear = b.add(scaled, multi[d])?;
    }
    Ok(linear)
}

/// Arrange values so `order[0]` is last, as [`reorder`] does for numbers.
pub fn reorder_values(values: &[Value], order: &[u32]) -> Vec<Value> {
    let rank = order.len();
    let mut out = values.to_vec();
    for (i, &d) in order.iter().enumerate() {
        out[rank - 1 - i] = values[d as usize];
    }
    out
}

/// First index owned by the executing thread, per dimension.
pub fn emit_base_index(b: &mut FunctionBuilder, layout: &BlockedLayout, shape: &[u32]) -> LowerResult<Vec<Value>> {
    layout.check_rank(shape)?;
    let tid = b.thread_idx(Dim::X);
    let warp_size = b.index(WARP_SIZE);
    let lane = b.urem(tid, warp_size)?;
    let warp = b.udiv(tid, warp_size)?;
    let order = layout.order();
    let warp_coord = emit_delinearize_ordered(b, warp, layout.warps_per_cta(), order)?;
    let lane_coord = emit_delinearize_ordered(b, lane, layout.threads_per_warp(), order)?;

    let mut base = Vec::with_capacity(layout.rank());
    for k in 0..layout.rank() {
        let spt = layout.size_per_thread()[k];
        let tpw = layout.threads_per_warp()[k];
        let max_warps = b.index(ceil_div(shape[k], spt * tpw));
        let max_threads = b.index(ceil_div(shape[k], spt));
        let w = b.urem(warp_coord[k], max_warps)?;
        let t = b.urem(lane_coord[k], max_threads)?;
        let tpw = b.index(tpw);
        let spt = b.index(spt);
        let warp_offset = b.mul(w, tpw)?;
        let thread = b.add(t, warp_offset)?;
        base.push(b.mul(thread, spt)?);
    }
    Ok(base)
}

/// Logical index of every owned element, in canonical order.
pub fn emit_indices(b: &mut FunctionBuilder, layout: &Layout, shape: &[u32]) -> LowerResult<Vec<Vec<Value>>> {
    match layout {
        Layout::Blocked(blocked) => emit_blocked_indices(b, blocked, shape),
        Layout::Slice(slice) => {
            slice.check_rank(shape)?;
            let parent = slice.blocked_parent()?;
            let padded = slice.padded_shape(shape);
            let dim = slice.dim as usize;
            let mut indices = emit_blocked_indices(b, parent, &padded)?;
            for idx in &mut indices {
                idx.remove(dim);
            }
            Ok(indices)
        }
        Layout::Mma(_) | Layout::Shared(_) => Err(LowerError::not_implemented(format!(
            "index computation for layout {}",
            layout
        ))),
    }
}

fn emit_blocked_indices(
    b: &mut FunctionBuilder,
    layout: &BlockedLayout,
    shape: &[u32],
) -> LowerResult<Vec<Vec<Value>>> {
    let base = emit_base_index(b, layout, shape)?;
    let offsets = element_offsets(layout, shape);
    trace!(count = offsets.len(), %layout, "emit indices");
    offsets
        .iter()
        .map(|off| {
            off.iter()
                .zip(&base)
                .map(|(&o, &start)| {
                    let o = b.index(o);
                    b.add(start, o)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Inst;

    #[test]
    fn test_delinearize_emits_one_urem_per_dim() {
        let mut b = FunctionBuilder::new("f");
        let linear = b.index(5);
        let multi = emit_delinearize(&mut b, linear, &[2, 3, 4]).unwrap();
        assert_eq!(multi.len(), 3);
        let f = b.finish();
        assert_eq!(f.count(|i| matches!(i, Inst::Binary { op: crate::ir::BinOp::URem, .. })), 3);
        assert_eq!(f.count(|i| matches!(i, Inst::Binary { op: crate::ir::BinOp::UDiv, .. })), 2);
    }

    #[test]
    fn test_linearize_rank_mismatch() {
        let mut b = FunctionBuilder::new("f");
        let i = b.index(0);
        assert!(emit_linearize(&mut b, &[i], &[2, 2]).is_err());
    }

    #[test]
    fn test_reorder_values_matches_numeric_reorder() {
        let values = [Value(10), Value(20), Value(30)];
        let order = [2, 0, 1];
        let numeric = reorder(&[10u32, 20, 30], &order);
        let reordered: Vec<u32> = reorder_values(&values, &order).iter().map(|v| v.0).collect();
        assert_eq!(reordered.as_slice(), numeric.as_slice());
    }

    #[test]
    fn test_slice_of_mma_is_not_implemented() {
        use std::sync::Arc;

        use crate::index::Shape;
        use crate::layout::{MmaLayout, SliceLayout};

        let parent = Arc::new(Layout::Mma(MmaLayout {
            version: 2,
            warps_per_cta: Shape::from_slice(&[1, 1]),
        }));
        let layout = Layout::Slice(SliceLayout::new(0, parent).unwrap());
        let mut b = FunctionBuilder::new("f");
        let err = emit_indices(&mut b, &layout, &[16]).unwrap_err();
        assert!(err.is_recoverable());
    }
}
