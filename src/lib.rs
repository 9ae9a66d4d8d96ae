//! Lowering of tile-parallel GPU kernels to per-thread IR.
//!
//! A kernel arrives as a flat list of tile operations over tensors whose
//! layout says which thread owns which element ([`tensor`], [`layout`]).
//! [`lower::lower_module`] rewrites every op into scalar and vector
//! instructions for one thread ([`ir`]), moving global memory through
//! predicated inline PTX and staging layout conversions through shared
//! memory. [`ssa`] builds SSA form for structured code generators and
//! [`sim`] executes lowered kernels on the host.

pub mod analysis;
pub mod config;
pub mod convert;
pub mod diagnostic;
pub mod error;
pub mod index;
pub mod ir;
pub mod layout;
pub mod location;
pub mod lower;
pub mod sim;
pub mod ssa;
pub mod tensor;

pub use config::LowerOptions;
pub use diagnostic::Diagnostic;
pub use error::{LowerError, LowerResult};
pub use lower::lower_module;
