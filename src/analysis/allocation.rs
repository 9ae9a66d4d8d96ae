//! Shared-memory planning.
//!
//! Every `convert_layout` between two blocked layouts needs a scratch
//! buffer holding one replica of the tensor:
//!
//! ```text
//!   padded[d]         = max(min(shape[d], spcSrc[d]), min(shape[d], spcDst[d]))
//!   padded[outOrd[0]] += max(in_vec, out_vec)
//!   bytes             = product(padded) * max(1, bits / 8)
//! ```
//!
//! A scratch buffer is live only while its op executes, so buffers of
//! different ops share offsets. Placement is first-fit over live ranges.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{LowerError, LowerResult};
use crate::index::{product, Shape};
use crate::layout::BlockedLayout;
use crate::tensor::{ElemType, Kernel, OpId, OpKind, TensorType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRegion {
    pub offset: u32,
    pub bytes: u32,
}

impl SharedRegion {
    fn end(&self) -> u32 {
        self.offset + self.bytes
    }

    fn overlaps(&self, other: &SharedRegion) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchConfig {
    pub padded_rep_shape: Shape,
    /// Elements per vector store into the buffer.
    pub in_vec: u32,
    /// Elements per vector load from the buffer.
    pub out_vec: u32,
}

/// Placement of shared-memory buffers, queried by lowering rules.
pub trait SharedMemoryPlan {
    fn region(&self, op: OpId) -> Option<SharedRegion>;
    fn scratch_config(&self, op: OpId) -> Option<&ScratchConfig>;
    /// Size of the module-level shared array.
    fn total_bytes(&self) -> u32;
}

/// Bits of one element in its in-memory representation.
pub fn elem_bits(elem: ElemType) -> u32 {
    match elem {
        ElemType::Scalar(s) => s.bit_width(),
        ElemType::Ptr { .. } => 64,
    }
}

/// Scratch layout for converting `src` to `dst`.
pub fn scratch_config(src: &BlockedLayout, dst: &BlockedLayout, shape: &[u32]) -> ScratchConfig {
    let rank = shape.len();
    let src_spc = src.shape_per_cta();
    let dst_spc = dst.shape_per_cta();
    let out_fastest = dst.order()[0] as usize;
    let last = rank - 1;

    // Consecutive canonical elements step along the last dimension, so a
    // vector access is only contiguous in the buffer when that dimension
    // is also the buffer's fastest one.
    let (in_vec, out_vec) = if out_fastest == last {
        (src.size_per_thread()[last], dst.size_per_thread()[last])
    } else {
        (1, 1)
    };

    let mut padded: Shape = (0..rank)
        .map(|d| shape[d].min(src_spc[d]).max(shape[d].min(dst_spc[d])))
        .collect();
    padded[out_fastest] += in_vec.max(out_vec);

    ScratchConfig {
        padded_rep_shape: padded,
        in_vec,
        out_vec,
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveRange {
    start: usize,
    end: usize,
}

impl LiveRange {
    fn intersects(&self, other: &LiveRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Default)]
pub struct Allocation {
    regions: HashMap<OpId, SharedRegion>,
    configs: HashMap<OpId, ScratchConfig>,
    total: u32,
}

impl SharedMemoryPlan for Allocation {
    fn region(&self, op: OpId) -> Option<SharedRegion> {
        self.regions.get(&op).copied()
    }

    fn scratch_config(&self, op: OpId) -> Option<&ScratchConfig> {
        self.configs.get(&op)
    }

    fn total_bytes(&self) -> u32 {
        self.total
    }
}

impl Allocation {
    /// Plan scratch buffers for every blocked-to-blocked conversion.
    ///
    /// Conversions involving other layouts get no buffer; their lowering
    /// reports them unsupported.
    pub fn run(kernel: &Kernel, alignment: u32) -> LowerResult<Self> {
        let types = kernel.value_types()?;
        let alignment = alignment.max(1);
        let mut requests: Vec<(OpId, LiveRange, u32)> = Vec::new();
        let mut configs = HashMap::new();

        for (id, op) in kernel.ops() {
            let OpKind::ConvertLayout { src } = &op.kind else {
                continue;
            };
            let src_ty = types.get(src).and_then(|t| t.as_tensor());
            let dst_ty = op.ty.as_ref().and_then(|t| t.as_tensor());
            let (Some(src_ty), Some(dst_ty)) = (src_ty, dst_ty) else {
                return Err(LowerError::invariant(format!(
                    "convert_layout at op {} on a non-tensor value",
                    id.0
                )));
            };
            let Some((src_layout, dst_layout)) = blocked_pair(src_ty, dst_ty) else {
                continue;
            };
            let config = scratch_config(src_layout, dst_layout, &dst_ty.shape);
            let elem_bytes = (elem_bits(dst_ty.elem) / 8).max(1);
            let bytes = product(&config.padded_rep_shape) * elem_bytes;
            debug!(op = id.0, bytes, padded = ?config.padded_rep_shape, "scratch buffer");
            let live = LiveRange {
                start: id.0 as usize,
                end: id.0 as usize + 1,
            };
            requests.push((id, live, bytes));
            configs.insert(id, config);
        }

        let mut placed: Vec<(LiveRange, SharedRegion)> = Vec::new();
        let mut regions = HashMap::new();
        let mut total = 0u32;
        requests.sort_by_key(|(_, live, _)| live.start);
        for (id, live, bytes) in requests {
            let region = first_fit(&placed, live, bytes, alignment);
            total = total.max(region.end());
            placed.push((live, region));
            regions.insert(id, region);
        }

        Ok(Self {
            regions,
            configs,
            total: total.next_multiple_of(alignment),
        })
    }
}

fn blocked_pair<'a>(
    src: &'a TensorType,
    dst: &'a TensorType,
) -> Option<(&'a BlockedLayout, &'a BlockedLayout)> {
    Some((src.layout.as_blocked()?, dst.layout.as_blocked()?))
}

/// Lowest aligned offset whose bytes are free for the whole live range.
fn first_fit(
    placed: &[(LiveRange, SharedRegion)],
    live: LiveRange,
    bytes: u32,
    alignment: u32,
) -> SharedRegion {
    let mut busy: Vec<SharedRegion> = placed
        .iter()
        .filter(|(other, _)| other.intersects(&live))
        .map(|(_, region)| *region)
        .collect();
    busy.sort_by_key(|r| r.offset);

    let mut candidate = SharedRegion { offset: 0, bytes };
    for region in busy {
        if candidate.overlaps(&region) {
            candidate.offset = region.end().next_multiple_of(alignment);
        }
    }
    candidate
}
