//! 3-D Axis Aligned Bounding Boxes.

use super::{Point3, Point3f, Vector3};
use crate::pbrt::*;
use num_traits::Num;
use std::fmt;

/// 3-D Axis Aligned Bounding Box.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Bounds3<T: Num> {
    /// Minimum bounds.
    pub p_min: Point3<T>,

    /// Maximum bounds.
    pub p_max: Point3<T>,
}

/// 3-D bounding box containing `Float` points.
pub type Bounds3f = Bounds3<Float>;

impl<T: Num + PartialOrd + Copy> Bounds3<T> {
    /// Creates a new 3-D bounding box from 2 points. The minimum and maximum
    /// bounds are used for each coordinate axis.
    ///
    /// * `p1` - First point.
    /// * `p2` - Second point.
    pub fn new(p1: Point3<T>, p2: Point3<T>) -> Self {
        Self {
            p_min: p1.min(&p2),
            p_max: p1.max(&p2),
        }
    }

    /// Returns the vector along the box diagonal from the minimum point to
    /// the maximum point.
    pub fn diagonal(&self) -> Vector3<T> {
        self.p_max - self.p_min
    }

    /// Returns the volume of the bounding box.
    pub fn volume(&self) -> T {
        let d = self.diagonal();
        d.x * d.y * d.z
    }

    /// Returns true if any extent is zero or negative.
    pub fn is_degenerate(&self) -> bool {
        self.p_max.x <= self.p_min.x || self.p_max.y <= self.p_min.y || self.p_max.z <= self.p_min.z
    }

    /// Returns the index of which of the axes is longest. Ties resolve to the
    /// lower axis.
    pub fn maximum_extent(&self) -> Axis {
        let d = self.diagonal();
        if d.x >= d.y && d.x >= d.z {
            Axis::X
        } else if d.y >= d.z {
            Axis::Y
        } else {
            Axis::Z
        }
    }

    /// Returns true if a point is inside the bounding box.
    ///
    /// * `p` - The point.
    pub fn contains(&self, p: &Point3<T>) -> bool {
        (p.x >= self.p_min.x && p.x <= self.p_max.x)
            && (p.y >= self.p_min.y && p.y <= self.p_max.y)
            && (p.z >= self.p_min.z && p.z <= self.p_max.z)
    }
}

impl Bounds3f {
    /// Returns the continuous position of a point relative to the corners of the
    /// box, where a point at the minimum corner has offset `(0, 0, 0)` and a
    /// point at the maximum corner has offset is `(1, 1, 1)`.
    ///
    /// * `p` - The point.
    pub fn offset(&self, p: &Point3f) -> Vector3<Float> {
        let mut o = *p - self.p_min;
        for axis in Axis::ALL {
            if self.p_max[axis] > self.p_min[axis] {
                o[axis] /= self.p_max[axis] - self.p_min[axis];
            }
        }
        o
    }

    /// Linearly interpolates between the corners of the box by the given amount
    /// in each dimension.
    ///
    /// * `t` - The interpolation parameter in each dimension.
    pub fn lerp(&self, t: &Point3f) -> Point3f {
        Point3f::new(
            lerp(t.x, self.p_min.x, self.p_max.x),
            lerp(t.y, self.p_min.y, self.p_max.y),
            lerp(t.z, self.p_min.z, self.p_max.z),
        )
    }

    /// Returns the center of the box.
    pub fn centroid(&self) -> Point3f {
        0.5 * (self.p_min + self.p_max)
    }

    /// Splits the box into two halves at the midpoint of an axis. The lower
    /// half is returned first.
    ///
    /// * `axis` - The split axis.
    pub fn split(&self, axis: Axis) -> (Self, Self) {
        let mid = 0.5 * (self.p_min[axis] + self.p_max[axis]);
        let mut lower = *self;
        let mut upper = *self;
        lower.p_max[axis] = mid;
        upper.p_min[axis] = mid;
        (lower, upper)
    }
}

impl<T: Num + fmt::Display> fmt::Display for Bounds3<T> {
    /// Formats the value using the given formatter.
    ///
    /// * `f` - Formatter.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.p_min, self.p_max)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
