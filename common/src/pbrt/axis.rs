//! Axis

use std::fmt;

/// Axis enumeration
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Axis {
    #[default]
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    /// All three axes in order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];
}

impl From<Axis> for usize {
    fn from(axis: Axis) -> usize {
        axis as usize
    }
}

impl From<Axis> for u32 {
    fn from(axis: Axis) -> u32 {
        axis as u32
    }
}

impl TryFrom<u32> for Axis {
    type Error = u32;

    /// Decode an axis from its buffer representation; returns the raw value
    /// back if it does not name an axis.
    ///
    /// * `i` - The raw value.
    fn try_from(i: u32) -> Result<Self, Self::Error> {
        match i {
            0 => Ok(Axis::X),
            1 => Ok(Axis::Y),
            2 => Ok(Axis::Z),
            _ => Err(i),
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
use proptest::prelude::*;

#[cfg(test)]
pub fn axis_3d_strategy() -> impl Strategy<Value = Axis> {
    prop_oneof![Just(Axis::X), Just(Axis::Y), Just(Axis::Z)]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn axis_survives_buffer_encoding(axis in axis_3d_strategy()) {
            prop_assert_eq!(Axis::try_from(u32::from(axis)), Ok(axis));
        }
    }

    #[test]
    fn unknown_axis_value_is_rejected() {
        assert_eq!(Axis::try_from(3), Err(3));
    }
}
