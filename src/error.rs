//! Lowering errors.
//!
//! Two tiers:
//!   - `Invariant`: the input broke a precondition that upstream passes
//!     are expected to establish (mismatched element counts, ranks, layouts).
//!     Lowering of the whole unit stops.
//!   - `NotImplemented` / `MatchFailure`: valid input this backend does not
//!     handle (MMA or shared layouts, kernels returning values). The op is
//!     rolled back and reported; the rest of the kernel is still lowered so
//!     every such op surfaces in one run.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
    #[error("match failure: {0}")]
    MatchFailure(String),
}

impl LowerError {
    pub fn invariant(message: impl Into<String>) -> Self {
        LowerError::Invariant(message.into())
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        LowerError::NotImplemented(message.into())
    }

    pub fn match_failure(message: impl Into<String>) -> Self {
        LowerError::MatchFailure(message.into())
    }

    /// Whether the pass may skip the failing op and keep going.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LowerError::Invariant(_))
    }
}

pub type LowerResult<T> = Result<T, LowerError>;

/// Return an invariant error unless `cond` holds.
pub(crate) fn ensure(cond: bool, message: impl FnOnce() -> String) -> LowerResult<()> {
    if cond {
        Ok(())
    } else {
        Err(LowerError::Invariant(message()))
    }
}
