//! Clamp

use num_traits::Num;

/// Clamps a value x to [min, max].
///
/// * `x` - The number to clamp.
/// * `min` - Minimum value.
/// * `max` - Maximum value.
#[inline(always)]
pub fn clamp<T>(x: T, min: T, max: T) -> T
where
    T: Num + PartialOrd + Copy,
{
    if x < min {
        min
    } else if x > max {
        max
    } else {
        x
    }
}

/// Clamps a continuous coordinate in [0, 1] to a cell index in [0, n).
///
/// * `u` - The coordinate.
/// * `n` - Number of cells.
#[inline(always)]
pub fn cell_index(u: super::Float, n: usize) -> usize {
    debug_assert!(n > 0);
    let i = (u * n as super::Float).floor();
    if i < 0.0 {
        0
    } else {
        clamp(i as usize, 0, n - 1)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
