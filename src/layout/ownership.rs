//! Which logical indices a thread owns.
//!
//! Host-side twin of the index code emitted by `convert::indices`; both
//! share the offset table and the canonical element order below, so the
//! layout conversion, broadcast and the simulator all agree on it.
//!
//! Canonical order of a thread's elements, slowest to fastest:
//!
//! ```text
//!   n = linearize(tile, num_tiles) * product(size_per_thread)
//!     + linearize(elem, size_per_thread)
//! ```
//!
//! so the `size_per_thread` block of one CTA tile is always contiguous.

use crate::config::WARP_SIZE;
use crate::error::{LowerError, LowerResult};
use crate::index::{ceil_div, delinearize, delinearize_ordered, product, Shape};

use super::{BlockedLayout, Layout};

/// First logical index owned by `thread_id`, per dimension.
///
/// Warp and lane coordinates wrap around when the tensor is smaller than
/// a CTA tile, so several threads can own the same element.
pub fn base_index(layout: &BlockedLayout, shape: &[u32], thread_id: u32) -> Shape {
    let lane = thread_id % WARP_SIZE;
    let warp = thread_id / WARP_SIZE;
    let order = layout.order();
    let warp_coord = delinearize_ordered(warp, layout.warps_per_cta(), order);
    let lane_coord = delinearize_ordered(lane, layout.threads_per_warp(), order);

    (0..layout.rank())
        .map(|k| {
            let spt = layout.size_per_thread()[k];
            let tpw = layout.threads_per_warp()[k];
            let max_warps = ceil_div(shape[k], spt * tpw);
            let max_threads = ceil_div(shape[k], spt);
            let w = warp_coord[k] % max_warps;
            let t = lane_coord[k] % max_threads;
            spt * (t + w * tpw)
        })
        .collect()
}

/// Offsets along each dimension for every
/// (tile, warp, thread, element) combination, in that nesting order.
pub fn offset_table(layout: &BlockedLayout, shape: &[u32]) -> Vec<Vec<u32>> {
    let tiles = layout.num_tiles(shape);
    (0..layout.rank())
        .map(|k| {
            let spt = layout.size_per_thread()[k];
            let tpw = layout.threads_per_warp()[k];
            let wpc = layout.warps_per_cta()[k];
            let mut offsets = Vec::with_capacity((tiles[k] * wpc * tpw * spt) as usize);
            for tile in 0..tiles[k] {
                for warp in 0..wpc {
                    for thread in 0..tpw {
                        for elem in 0..spt {
                            offsets.push(tile * spt * tpw * wpc + warp * spt * tpw + thread * spt + elem);
                        }
                    }
                }
            }
            offsets
        })
        .collect()
}

/// Offset from the thread's base index of each owned element, in
/// canonical order. Identical for every thread.
pub fn element_offsets(layout: &BlockedLayout, shape: &[u32]) -> Vec<Shape> {
    let table = offset_table(layout, shape);
    let tiles = layout.num_tiles(shape);
    let spt = layout.size_per_thread();
    let per_cta = layout.shape_per_cta();
    let block = product(spt);
    let count = layout.elems_per_thread(shape);

    (0..count)
        .map(|n| {
            let tile = delinearize(n / block, &tiles);
            let elem = delinearize(n % block, spt);
            (0..layout.rank())
                .map(|k| table[k][(tile[k] * per_cta[k] + elem[k]) as usize])
                .collect()
        })
        .collect()
}

/// Logical indices owned by `thread_id`, in canonical order.
pub fn enumerate_indices(layout: &Layout, shape: &[u32], thread_id: u32) -> LowerResult<Vec<Shape>> {
    match layout {
        Layout::Blocked(blocked) => {
            blocked.check_rank(shape)?;
            Ok(blocked_indices(blocked, shape, thread_id))
        }
        Layout::Slice(slice) => {
            slice.check_rank(shape)?;
            let parent = slice.blocked_parent()?;
            let dim = slice.dim as usize;
            let padded = slice.padded_shape(shape);
            Ok(blocked_indices(parent, &padded, thread_id)
                .into_iter()
                .map(|mut idx| {
                    idx.remove(dim);
                    idx
                })
                .collect())
        }
        Layout::Mma(_) | Layout::Shared(_) => Err(LowerError::not_implemented(format!(
            "index enumeration for layout {}",
            layout
        ))),
    }
}

fn blocked_indices(layout: &BlockedLayout, shape: &[u32], thread_id: u32) -> Vec<Shape> {
    let base = base_index(layout, shape, thread_id);
    element_offsets(layout, shape)
        .into_iter()
        .map(|off| off.iter().zip(&base).map(|(o, b)| o + b).collect())
        .collect()
}

/// Owned indices of every thread in a CTA of `num_warps` warps.
pub fn ownership_map(layout: &Layout, shape: &[u32], num_warps: u32) -> LowerResult<Vec<Vec<Shape>>> {
    (0..num_warps * WARP_SIZE)
        .map(|tid| enumerate_indices(layout, shape, tid))
        .collect()
}
