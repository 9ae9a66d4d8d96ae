//! Layout encodings: how a logical tensor is distributed over a CTA.
//!
//! ```text
//!   Blocked   sizePerThread x threadsPerWarp x warpsPerCTA, tiled with wraparound
//!   Slice     a Blocked parent with one dimension removed
//!   Mma       matrix-accumulator fragments      (recognized, not lowered)
//!   Shared    shared-memory resident operand    (recognized, not lowered)
//! ```
//!
//! Every consumer matches on `Layout` exhaustively; the two descriptor-only
//! variants answer `NotImplemented` wherever a distribution is required.

pub mod ownership;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::WARP_SIZE;
use crate::error::{LowerError, LowerResult};
use crate::index::{ceil_div, is_permutation, product, Shape};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout parameters have mismatched ranks ({0})")]
    RankMismatch(String),
    #[error("order {0:?} is not a permutation of 0..{1}")]
    NotPermutation(Vec<u32>, usize),
    #[error("threads_per_warp must multiply to the warp size (32), got {0}")]
    ThreadsPerWarp(u32),
    #[error("layout parameter `{0}` contains a zero extent")]
    ZeroExtent(&'static str),
    #[error("slice dimension {dim} out of range for parent of rank {rank}")]
    SliceDim { dim: u32, rank: usize },
}

// ─── Blocked ───────────────────────────────────────────────────────

/// Row/column-blocked distribution.
///
/// Along dimension `d` one CTA covers
/// `size_per_thread[d] * threads_per_warp[d] * warps_per_cta[d]` elements;
/// larger extents repeat that tile, smaller ones reuse threads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BlockedParams")]
pub struct BlockedLayout {
    size_per_thread: Shape,
    threads_per_warp: Shape,
    warps_per_cta: Shape,
    order: Shape,
}

#[derive(Deserialize)]
struct BlockedParams {
    size_per_thread: Shape,
    threads_per_warp: Shape,
    warps_per_cta: Shape,
    order: Shape,
}

impl TryFrom<BlockedParams> for BlockedLayout {
    type Error = LayoutError;

    fn try_from(p: BlockedParams) -> Result<Self, Self::Error> {
        BlockedLayout::new(
            &p.size_per_thread,
            &p.threads_per_warp,
            &p.warps_per_cta,
            &p.order,
        )
    }
}

impl BlockedLayout {
    pub fn new(
        size_per_thread: &[u32],
        threads_per_warp: &[u32],
        warps_per_cta: &[u32],
        order: &[u32],
    ) -> Result<Self, LayoutError> {
        let rank = size_per_thread.len();
        if threads_per_warp.len() != rank || warps_per_cta.len() != rank || order.len() != rank {
            return Err(LayoutError::RankMismatch(format!(
                "size_per_thread {}, threads_per_warp {}, warps_per_cta {}, order {}",
                rank,
                threads_per_warp.len(),
                warps_per_cta.len(),
                order.len()
            )));
        }
        if !is_permutation(order, rank) {
            return Err(LayoutError::NotPermutation(order.to_vec(), rank));
        }
        for (name, values) in [
            ("size_per_thread", size_per_thread),
            ("threads_per_warp", threads_per_warp),
            ("warps_per_cta", warps_per_cta),
        ] {
            if values.contains(&0) {
                return Err(LayoutError::ZeroExtent(name));
            }
        }
        let lanes = product(threads_per_warp);
        if lanes != WARP_SIZE {
            return Err(LayoutError::ThreadsPerWarp(lanes));
        }
        Ok(Self {
            size_per_thread: Shape::from_slice(size_per_thread),
            threads_per_warp: Shape::from_slice(threads_per_warp),
            warps_per_cta: Shape::from_slice(warps_per_cta),
            order: Shape::from_slice(order),
        })
    }

    pub fn rank(&self) -> usize {
        self.order.len()
    }

    pub fn size_per_thread(&self) -> &[u32] {
        &self.size_per_thread
    }

    pub fn threads_per_warp(&self) -> &[u32] {
        &self.threads_per_warp
    }

    pub fn warps_per_cta(&self) -> &[u32] {
        &self.warps_per_cta
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    pub fn num_warps(&self) -> u32 {
        product(&self.warps_per_cta)
    }

    /// Elements covered by one CTA repetition, per dimension.
    pub fn shape_per_cta(&self) -> Shape {
        (0..self.rank())
            .map(|d| self.size_per_thread[d] * self.threads_per_warp[d] * self.warps_per_cta[d])
            .collect()
    }

    /// CTA-tile repetitions needed to cover `shape`, per dimension.
    pub fn num_tiles(&self, shape: &[u32]) -> Shape {
        self.shape_per_cta()
            .iter()
            .zip(shape)
            .map(|(&per_cta, &extent)| ceil_div(extent, per_cta))
            .collect()
    }

    /// Elements each thread owns along each dimension.
    pub fn elems_per_thread_per_dim(&self, shape: &[u32]) -> Shape {
        self.num_tiles(shape)
            .iter()
            .zip(&self.size_per_thread)
            .map(|(&tiles, &spt)| tiles * spt)
            .collect()
    }

    pub fn elems_per_thread(&self, shape: &[u32]) -> u32 {
        product(&self.elems_per_thread_per_dim(shape))
    }

    /// Length of the runs of consecutive owned elements that are also
    /// consecutive along `order[0]`.
    ///
    /// Owned elements are numbered with the last dimension fastest, so a
    /// run only follows `order[0]` when every later dimension holds a
    /// single element per thread.
    pub fn contig_per_thread(&self) -> u32 {
        let fastest = self.order[0] as usize;
        if product(&self.size_per_thread[fastest + 1..]) == 1 {
            self.size_per_thread[fastest]
        } else {
            1
        }
    }

    pub(crate) fn check_rank(&self, shape: &[u32]) -> LowerResult<()> {
        if shape.len() != self.rank() {
            return Err(LowerError::invariant(format!(
                "shape of rank {} used with {}",
                shape.len(),
                self
            )));
        }
        Ok(())
    }
}

// ─── Slice ─────────────────────────────────────────────────────────

/// Cross-section of a parent distribution at a fixed coordinate of `dim`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SliceParams")]
pub struct SliceLayout {
    pub dim: u32,
    pub parent: Arc<Layout>,
}

#[derive(Deserialize)]
struct SliceParams {
    dim: u32,
    parent: Arc<Layout>,
}

impl TryFrom<SliceParams> for SliceLayout {
    type Error = LayoutError;

    fn try_from(p: SliceParams) -> Result<Self, Self::Error> {
        SliceLayout::new(p.dim, p.parent)
    }
}

impl SliceLayout {
    pub fn new(dim: u32, parent: Arc<Layout>) -> Result<Self, LayoutError> {
        let rank = parent.rank();
        if dim as usize >= rank {
            return Err(LayoutError::SliceDim { dim, rank });
        }
        Ok(Self { dim, parent })
    }

    /// `shape` with a unit extent inserted at the sliced dimension.
    pub fn padded_shape(&self, shape: &[u32]) -> Shape {
        let mut padded = Shape::from_slice(shape);
        padded.insert(self.dim as usize, 1);
        padded
    }

    /// The parent, which must be blocked for any index computation.
    pub fn blocked_parent(&self) -> LowerResult<&BlockedLayout> {
        match self.parent.as_ref() {
            Layout::Blocked(b) => Ok(b),
            other => Err(LowerError::not_implemented(format!(
                "slice of a non-blocked parent {}",
                other
            ))),
        }
    }

    pub(crate) fn check_rank(&self, shape: &[u32]) -> LowerResult<()> {
        if shape.len() + 1 != self.parent.rank() {
            return Err(LowerError::invariant(format!(
                "shape of rank {} used with slice of a rank-{} parent",
                shape.len(),
                self.parent.rank()
            )));
        }
        Ok(())
    }

    fn drop_dim(&self, values: &[u32]) -> Shape {
        values
            .iter()
            .enumerate()
            .filter(|(d, _)| *d != self.dim as usize)
            .map(|(_, &v)| v)
            .collect()
    }
}

// ─── Descriptor-only layouts ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MmaLayout {
    pub version: u32,
    pub warps_per_cta: Shape,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedLayout {
    pub vec: u32,
    pub per_phase: u32,
    pub max_phase: u32,
    pub order: Shape,
}

// ─── Layout ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layout {
    Blocked(BlockedLayout),
    Slice(SliceLayout),
    Mma(MmaLayout),
    Shared(SharedLayout),
}

impl Layout {
    pub fn rank(&self) -> usize {
        match self {
            Layout::Blocked(b) => b.rank(),
            Layout::Slice(s) => s.parent.rank().saturating_sub(1),
            Layout::Mma(_) => 2,
            Layout::Shared(s) => s.order.len(),
        }
    }

    pub fn as_blocked(&self) -> Option<&BlockedLayout> {
        match self {
            Layout::Blocked(b) => Some(b),
            _ => None,
        }
    }

    /// Number of per-thread elements a tensor of `shape` occupies.
    pub fn elems_per_thread(&self, shape: &[u32]) -> LowerResult<u32> {
        match self {
            Layout::Blocked(b) => {
                b.check_rank(shape)?;
                Ok(b.elems_per_thread(shape))
            }
            Layout::Slice(s) => {
                s.check_rank(shape)?;
                s.parent.elems_per_thread(&s.padded_shape(shape))
            }
            Layout::Mma(_) | Layout::Shared(_) => Err(self.unsupported("elements per thread")),
        }
    }

    pub fn shape_per_cta(&self) -> LowerResult<Shape> {
        match self {
            Layout::Blocked(b) => Ok(b.shape_per_cta()),
            Layout::Slice(s) => Ok(s.drop_dim(&s.parent.shape_per_cta()?)),
            Layout::Mma(_) | Layout::Shared(_) => Err(self.unsupported("shape per CTA")),
        }
    }

    /// Dimension order, fastest first.
    pub fn order(&self) -> LowerResult<Shape> {
        match self {
            Layout::Blocked(b) => Ok(Shape::from_slice(b.order())),
            Layout::Slice(s) => {
                let parent = s.parent.order()?;
                Ok(parent
                    .iter()
                    .filter(|&&d| d != s.dim)
                    .map(|&d| if d > s.dim { d - 1 } else { d })
                    .collect())
            }
            Layout::Shared(s) => Ok(s.order.clone()),
            Layout::Mma(_) => Err(self.unsupported("order")),
        }
    }

    pub fn contig_per_thread(&self) -> LowerResult<u32> {
        match self {
            Layout::Blocked(b) => Ok(b.contig_per_thread()),
            // Slice elements come in parent order with duplicates; no runs.
            Layout::Slice(_) => Ok(1),
            Layout::Mma(_) | Layout::Shared(_) => Err(self.unsupported("contiguity")),
        }
    }

    /// Total warps the distribution assumes, where the layout states it.
    pub fn num_warps(&self) -> Option<u32> {
        match self {
            Layout::Blocked(b) => Some(b.num_warps()),
            Layout::Slice(s) => s.parent.num_warps(),
            Layout::Mma(m) => Some(product(&m.warps_per_cta)),
            Layout::Shared(_) => None,
        }
    }

    fn unsupported(&self, what: &str) -> LowerError {
        LowerError::not_implemented(format!("{} for layout {}", what, self))
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[u32]) -> fmt::Result {
    write!(f, "[")?;
    for (i, v) in values.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", v)?;
    }
    write!(f, "]")
}

impl fmt::Display for BlockedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#blocked<{{sizePerThread = ")?;
        write_list(f, &self.size_per_thread)?;
        write!(f, ", threadsPerWarp = ")?;
        write_list(f, &self.threads_per_warp)?;
        write!(f, ", warpsPerCTA = ")?;
        write_list(f, &self.warps_per_cta)?;
        write!(f, ", order = ")?;
        write_list(f, &self.order)?;
        write!(f, "}}>")
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Blocked(b) => write!(f, "{}", b),
            Layout::Slice(s) => write!(f, "#slice<{{dim = {}, parent = {}}}>", s.dim, s.parent),
            Layout::Mma(m) => {
                write!(f, "#mma<{{version = {}, warpsPerCTA = ", m.version)?;
                write_list(f, &m.warps_per_cta)?;
                write!(f, "}}>")
            }
            Layout::Shared(s) => {
                write!(
                    f,
                    "#shared<{{vec = {}, perPhase = {}, maxPhase = {}, order = ",
                    s.vec, s.per_phase, s.max_phase
                )?;
                write_list(f, &s.order)?;
                write!(f, "}}>")
            }
        }
    }
}
