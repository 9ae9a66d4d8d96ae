//! Facts about the input kernel that lowering rules consult but do not
//! compute themselves.
//!
//! - `axis`: per-dimension divisibility, contiguity and constancy of
//!   integer and pointer values, used to pick memory vector widths.
//! - `allocation`: shared-memory scratch regions for layout conversions.

pub mod allocation;
pub mod axis;

pub use allocation::{Allocation, ScratchConfig, SharedMemoryPlan, SharedRegion};
pub use axis::{AxisAnalysis, AxisInfo, AxisInfoOracle, NoAxisInfo};
