//! `broadcast`: grow unit dimensions without moving data.
//!
//! Source and result share one blocked layout, so every result element a
//! thread owns is a copy of a source element the same thread owns. The
//! copy pattern is fixed at lowering time: both element lists are viewed
//! as `[tiles..., size_per_thread...]` grids (row-major, matching the
//! canonical element order), and each source element is replicated across
//! the grid positions its broadcast dimensions expand into.

use smallvec::SmallVec;

use crate::error::{ensure, LowerError, LowerResult};
use crate::index::{delinearize, linearize, product, Shape};
use crate::ir::Value;
use crate::layout::BlockedLayout;
use crate::tensor::{OpId, OpKind, Operation};

use super::{result_type, ConversionPattern, RewriteCtx};

fn record_slot(slots: &mut [Option<usize>], slot: usize, src: usize) -> LowerResult<()> {
    let count = slots.len();
    let entry = slots.get_mut(slot).ok_or_else(|| {
        LowerError::invariant(format!("broadcast slot {} outside {} result elements", slot, count))
    })?;
    *entry = Some(src);
    Ok(())
}

/// For each result element of the thread, the source element it copies.
pub fn broadcast_slots(layout: &BlockedLayout, src_shape: &[u32], dst_shape: &[u32]) -> LowerResult<Vec<usize>> {
    let rank = dst_shape.len();
    ensure(src_shape.len() == rank, || {
        format!("broadcast from rank {} to rank {}", src_shape.len(), rank)
    })?;
    layout.check_rank(dst_shape)?;

    let spt = layout.size_per_thread();
    let tiles = layout.num_tiles(dst_shape);
    let mut src_logical = Shape::from_elem(0, 2 * rank);
    let mut dst_logical = Shape::from_elem(0, 2 * rank);
    let mut dims: SmallVec<[usize; 4]> = SmallVec::new();
    for d in 0..rank {
        dst_logical[d] = tiles[d];
        dst_logical[d + rank] = spt[d];
        if src_shape[d] == dst_shape[d] {
            src_logical[d] = tiles[d];
            src_logical[d + rank] = spt[d];
        } else {
            ensure(src_shape[d] == 1, || {
                format!(
                    "broadcast of dimension {} from extent {} to {}",
                    d, src_shape[d], dst_shape[d]
                )
            })?;
            dims.push(d);
            src_logical[d] = 1;
            src_logical[d + rank] = spt[d].max(1);
        }
    }

    // First the tile factor of every broadcast dim, then the element factor.
    let nb = dims.len();
    let mut sizes = Shape::from_elem(1, 2 * nb);
    for (i, &d) in dims.iter().enumerate() {
        sizes[i] = dst_logical[d] / src_logical[d];
        sizes[i + nb] = dst_logical[d + rank] / src_logical[d + rank];
    }
    let duplicates = product(&sizes);

    let src_count = product(&src_logical);
    let dst_count = product(&dst_logical) as usize;
    let mut slots: Vec<Option<usize>> = vec![None; dst_count];
    for i in 0..src_count {
        let src_multi = delinearize(i, &src_logical);
        for j in 0..duplicates {
            let bcast = delinearize(j, &sizes);
            let mut dst_multi = src_multi.clone();
            for (k, &d) in dims.iter().enumerate() {
                dst_multi[d] += bcast[k];
                dst_multi[d + rank] += bcast[k + nb] * src_logical[d + rank];
            }
            let slot = linearize(&dst_multi, &dst_logical) as usize;
            record_slot(&mut slots, slot, i as usize)?;
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(n, s)| {
            s.ok_or_else(|| LowerError::invariant(format!("broadcast leaves result element {} unset", n)))
        })
        .collect()
}

pub struct BroadcastLowering;

impl ConversionPattern for BroadcastLowering {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn matches(&self, op: &Operation) -> bool {
        matches!(op.kind, OpKind::Broadcast { .. })
    }

    fn rewrite(&self, _id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> LowerResult<Option<Value>> {
        let OpKind::Broadcast { src } = &op.kind else {
            return Err(LowerError::match_failure("not a broadcast"));
        };
        let ty = result_type(op)?;
        let src_ty = cx.tensor_ty(*src)?;
        let dst_ty = ty
            .as_tensor()
            .ok_or_else(|| LowerError::invariant("broadcast to a scalar"))?;
        let layout = match (src_ty.layout.as_blocked(), dst_ty.layout.as_blocked()) {
            (Some(a), Some(b)) if a == b => a,
            _ => {
                return Err(LowerError::invariant(format!(
                    "broadcast from {} to {} needs one blocked layout",
                    src_ty.layout, dst_ty.layout
                )))
            }
        };

        let slots = broadcast_slots(layout, &src_ty.shape, &dst_ty.shape)?;
        let src_vals = cx.elements(*src)?;
        let vals = slots
            .iter()
            .map(|&s| {
                src_vals
                    .get(s)
                    .copied()
                    .ok_or_else(|| LowerError::invariant(format!("broadcast reads source element {}", s)))
            })
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
    fn test_column_broadcast_repeats_per_tile() {
        // [4, 1] -> [4, 8] with one thread per column: 2 tiles along dim 1
        let layout = blocked(&[1, 1], &[8, 4], &[1, 1], &[1, 0]);
        let slots = broadcast_slots(&layout, &[4, 1], &[4, 8]).unwrap();
        assert_eq!(slots, vec![0, 0]);
    }

    #[test]
    fn test_row_broadcast_with_tiles_in_both_dims() {
        // tiles [2, 2]; source [1, 16] owns the 2 tiles along dim 1
        let layout = blocked(&[1, 1], &[2, 16], &[1, 1], &[1, 0]);
        let slots = broadcast_slots(&layout, &[1, 32], &[4, 32]).unwrap();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_size_per_thread_block_is_kept() {
        // spt 4 along the broadcast dim: the source already holds the
        // 4 duplicated copies, so each maps onto its own element
        let layout = blocked(&[1, 4], &[32, 1], &[1, 1], &[1, 0]);
        let slots = broadcast_slots(&layout, &[32, 1], &[32, 8]).unwrap();
        assert_eq!(slots, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn test_identity_broadcast() {
        let layout = blocked(&[2], &[32], &[1], &[0]);
        let slots = broadcast_slots(&layout, &[128], &[128]).unwrap();
        assert_eq!(slots, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_out_of_range_slot_is_invariant() {
        let mut slots = vec![None; 4];
        record_slot(&mut slots, 3, 1).unwrap();
        assert_eq!(slots[3], Some(1));
        let err = record_slot(&mut slots, 4, 0).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("slot 4 outside 4"));
    }

    #[test]
    fn test_non_unit_source_dim_is_invariant() {
        let layout = blocked(&[1, 1], &[8, 4], &[1, 1], &[1, 0]);
        let err = broadcast_slots(&layout, &[4, 2], &[4, 8]).unwrap_err();
        assert!(!err.is_recoverable());
        assert!(broadcast_slots(&layout, &[4], &[4, 8]).is_err());
    }
}
