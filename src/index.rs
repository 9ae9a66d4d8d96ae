//! Index algebra over row-major shapes.
//!
//! Plain linearization is row-major: the last dimension varies fastest.
//! The `_ordered` variants take a layout `order` (fastest dimension first)
//! and make `order[0]` the fastest-varying dimension instead.
//!
//! Rank mismatches are programming errors and panic.

use smallvec::SmallVec;

/// Per-dimension extents, indices or layout parameters.
pub type Shape = SmallVec<[u32; 4]>;

pub fn ceil_div(a: u32, b: u32) -> u32 {
    assert!(b > 0, "ceil_div by zero");
    a.div_ceil(b)
}

pub fn product(xs: &[u32]) -> u32 {
    xs.iter().product()
}

/// Whether `order` is a permutation of `0..rank`.
pub fn is_permutation(order: &[u32], rank: usize) -> bool {
    if order.len() != rank {
        return false;
    }
    let mut seen = vec![false; rank];
    for &d in order {
        let d = d as usize;
        if d >= rank || seen[d] {
            return false;
        }
        seen[d] = true;
    }
    true
}

/// Split `linear` into a multi-dimensional index under `shape`.
///
/// `result[i] = (linear / stride[i]) % shape[i]` with row-major strides.
pub fn delinearize(linear: u32, shape: &[u32]) -> Shape {
    let mut multi: Shape = SmallVec::from_elem(0, shape.len());
    let mut remaining = linear;
    for d in (0..shape.len()).rev() {
        multi[d] = remaining % shape[d];
        remaining /= shape[d];
    }
    multi
}

/// Inverse of [`delinearize`] for in-range indices.
pub fn linearize(multi: &[u32], shape: &[u32]) -> u32 {
    assert_eq!(
        multi.len(),
        shape.len(),
        "linearize: index rank {} does not match shape rank {}",
        multi.len(),
        shape.len()
    );
    let mut linear = 0u32;
    for (idx, extent) in multi.iter().zip(shape) {
        linear = linear * extent + idx;
    }
    linear
}

/// Arrange `values` so that `order[0]` lands in the last (fastest) position.
///
/// `result[rank - 1 - i] = values[order[i]]`.
pub fn reorder<T: Copy + Default>(values: &[T], order: &[u32]) -> SmallVec<[T; 4]> {
    assert_eq!(
        values.len(),
        order.len(),
        "reorder: {} values for an order of rank {}",
        values.len(),
        order.len()
    );
    let rank = order.len();
    let mut out: SmallVec<[T; 4]> = SmallVec::from_elem(T::default(), rank);
    for (i, &d) in order.iter().enumerate() {
        out[rank - 1 - i] = values[d as usize];
    }
    out
}

/// Inverse of [`reorder`].
pub fn unreorder<T: Copy + Default>(values: &[T], order: &[u32]) -> SmallVec<[T; 4]> {
    assert_eq!(values.len(), order.len(), "unreorder: rank mismatch");
    let rank = order.len();
    let mut out: SmallVec<[T; 4]> = SmallVec::from_elem(T::default(), rank);
    for (i, &d) in order.iter().enumerate() {
        out[d as usize] = values[rank - 1 - i];
    }
    out
}

/// Delinearize with `order[0]` as the fastest-varying dimension.
pub fn delinearize_ordered(linear: u32, shape: &[u32], order: &[u32]) -> Shape {
    assert_eq!(shape.len(), order.len(), "delinearize_ordered: rank mismatch");
    let permuted = reorder(shape, order);
    let multi = delinearize(linear, &permuted);
    unreorder(&multi, order)
}

/// Linearize with `order[0]` as the fastest-varying dimension.
pub fn linearize_ordered(multi: &[u32], shape: &[u32], order: &[u32]) -> u32 {
    linearize(&reorder(multi, order), &reorder(shape, order))
}
