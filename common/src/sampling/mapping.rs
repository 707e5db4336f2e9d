//! Direction Mappings
//!
//! Area-preserving parameterizations of the unit sphere used to discretize
//! directions. A uniform density on the unit square maps to a uniform density
//! on the sphere, so a region covering fraction `a` of the square always
//! subtends `4πa` steradians.

use super::{concentric_disk_to_square, concentric_sample_disk};
use crate::geometry::*;
use crate::pbrt::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Parameterization of directions by points on the unit square.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionalMapping {
    /// Octahedral equal-area mapping for the whole sphere; grids use two
    /// concentric equal-area hemispheres.
    #[default]
    EqualArea,

    /// Lambert cylindrical equal-area mapping: `u` is `cos θ`, `v` is `φ`.
    Cylindrical,
}

impl DirectionalMapping {
    /// Returns the buffer tag consumed by the external sampler.
    pub fn tag(&self) -> u32 {
        match self {
            Self::EqualArea => 0,
            Self::Cylindrical => 1,
        }
    }

    /// Returns the number of grid actions for `n_uv` cells along each side of
    /// the unit square.
    ///
    /// * `n_uv` - Grid resolution.
    pub fn grid_action_count(&self, n_uv: usize) -> usize {
        match self {
            Self::EqualArea => 2 * n_uv * n_uv,
            Self::Cylindrical => n_uv * n_uv,
        }
    }

    /// Maps a point on the unit square to a unit direction.
    ///
    /// * `p` - The point on the unit square.
    pub fn square_to_direction(&self, p: &Point2f) -> Vector3f {
        match self {
            Self::EqualArea => equal_area_square_to_sphere(p),
            Self::Cylindrical => cylindrical_square_to_sphere(p),
        }
    }

    /// Maps a unit direction to a point on the unit square.
    ///
    /// * `d` - The unit direction.
    pub fn direction_to_square(&self, d: &Vector3f) -> Point2f {
        match self {
            Self::EqualArea => equal_area_sphere_to_square(d),
            Self::Cylindrical => cylindrical_sphere_to_square(d),
        }
    }

    /// Returns the direction for a position inside a grid action's cell.
    ///
    /// * `action` - The grid action.
    /// * `offset` - Position within the cell; `(0.5, 0.5)` is the cell centre.
    /// * `n_uv`   - Grid resolution.
    pub fn grid_direction(&self, action: usize, offset: &Point2f, n_uv: usize) -> Vector3f {
        debug_assert!(action < self.grid_action_count(n_uv));
        let n = n_uv as Float;
        let cells = n_uv * n_uv;
        let local = action % cells;
        let p = Point2f::new(
            ((local % n_uv) as Float + offset.x) / n,
            ((local / n_uv) as Float + offset.y) / n,
        );
        match self {
            Self::EqualArea => {
                let d = hemisphere_square_to_direction(&p);
                if action >= cells {
                    Vector3f::new(d.x, d.y, -d.z)
                } else {
                    d
                }
            }
            Self::Cylindrical => cylindrical_square_to_sphere(&p),
        }
    }

    /// Returns the grid action whose cell contains a direction.
    ///
    /// * `d`    - The unit direction.
    /// * `n_uv` - Grid resolution.
    pub fn grid_action(&self, d: &Vector3f, n_uv: usize) -> usize {
        let (p, base) = match self {
            Self::EqualArea => {
                if d.z < 0.0 {
                    let mirrored = Vector3f::new(d.x, d.y, -d.z);
                    (hemisphere_direction_to_square(&mirrored), n_uv * n_uv)
                } else {
                    (hemisphere_direction_to_square(d), 0)
                }
            }
            Self::Cylindrical => (cylindrical_sphere_to_square(d), 0),
        };
        base + cell_index(p.y, n_uv) * n_uv + cell_index(p.x, n_uv)
    }

    /// Returns the grid image shape `(rows, columns)` used to display one
    /// state's directional values.
    ///
    /// * `n_uv` - Grid resolution.
    pub fn grid_image_shape(&self, n_uv: usize) -> (usize, usize) {
        match self {
            Self::EqualArea => (2 * n_uv, n_uv),
            Self::Cylindrical => (n_uv, n_uv),
        }
    }
}

impl TryFrom<u32> for DirectionalMapping {
    type Error = u32;

    /// Decode a mapping from its buffer tag.
    ///
    /// * `tag` - The raw tag.
    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::EqualArea),
            1 => Ok(Self::Cylindrical),
            _ => Err(tag),
        }
    }
}

impl fmt::Display for DirectionalMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EqualArea => write!(f, "equal_area"),
            Self::Cylindrical => write!(f, "cylindrical"),
        }
    }
}

/// Lambert cylindrical projection from the unit square to the sphere.
///
/// * `p` - The point on the unit square.
pub fn cylindrical_square_to_sphere(p: &Point2f) -> Vector3f {
    let cos_theta = 2.0 * p.x - 1.0;
    let sin_theta = safe_sqrt(1.0 - cos_theta * cos_theta);
    let phi = TWO_PI * p.y;
    Vector3f::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta)
}

/// Inverse of `cylindrical_square_to_sphere()`.
///
/// * `d` - The unit direction.
pub fn cylindrical_sphere_to_square(d: &Vector3f) -> Point2f {
    let cos_theta = clamp(d.z, -1.0, 1.0);
    let mut phi = d.y.atan2(d.x);
    if phi < 0.0 {
        phi += TWO_PI;
    }
    Point2f::new(0.5 * (cos_theta + 1.0), phi / TWO_PI).saturate()
}

/// Maps the unit square to the upper hemisphere through the concentric disk.
///
/// * `p` - The point on the unit square.
pub fn hemisphere_square_to_direction(p: &Point2f) -> Vector3f {
    let disk = concentric_sample_disk(p);
    let r2 = disk.x * disk.x + disk.y * disk.y;
    let scale = safe_sqrt(2.0 - r2);
    Vector3f::new(disk.x * scale, disk.y * scale, 1.0 - r2)
}

/// Inverse of `hemisphere_square_to_direction()`. Directions below the
/// horizon are treated as lying on it.
///
/// * `d` - The unit direction.
pub fn hemisphere_direction_to_square(d: &Vector3f) -> Point2f {
    let r2 = clamp(1.0 - d.z, 0.0, 1.0);
    let scale = safe_sqrt(2.0 - r2);
    if scale == 0.0 {
        return Point2f::new(0.5, 0.5);
    }
    concentric_disk_to_square(&Point2f::new(d.x / scale, d.y / scale))
}

/// Clarberg's octahedral equal-area mapping from the unit square to the sphere.
///
/// * `p` - The point on the unit square.
pub fn equal_area_square_to_sphere(p: &Point2f) -> Vector3f {
    // Transform to [-1,1]^2 and fold into the first quadrant.
    let u = 2.0 * p.x - 1.0;
    let v = 2.0 * p.y - 1.0;
    let up = abs(u);
    let vp = abs(v);

    // Signed distance from the diagonal determines the hemisphere.
    let signed_distance = 1.0 - (up + vp);
    let d = abs(signed_distance);
    let r = 1.0 - d;

    let phi = if r == 0.0 { 1.0 } else { (vp - up) / r + 1.0 } * PI_OVER_FOUR;
    let z = (1.0 - r * r).copysign(signed_distance);

    let cos_phi = phi.cos().copysign(u);
    let sin_phi = phi.sin().copysign(v);
    let s = r * safe_sqrt(2.0 - r * r);
    Vector3f::new(cos_phi * s, sin_phi * s, z)
}

/// Inverse of `equal_area_square_to_sphere()`.
///
/// * `d` - The unit direction.
pub fn equal_area_sphere_to_square(d: &Vector3f) -> Point2f {
    let x = abs(d.x);
    let y = abs(d.y);
    let z = abs(d.z);

    let r = safe_sqrt(1.0 - z);

    let a = max(x, y);
    let b = if a == 0.0 { 0.0 } else { min(x, y) / a };
    let mut phi = b.atan() * 2.0 * INV_PI;
    if x < y {
        phi = 1.0 - phi;
    }

    let mut v = phi * r;
    let mut u = r - v;
    if d.z < 0.0 {
        std::mem::swap(&mut u, &mut v);
        u = 1.0 - u;
        v = 1.0 - v;
    }

    let u = u.copysign(d.x);
    let v = v.copysign(d.y);
    Point2f::new(0.5 * (u + 1.0), 0.5 * (v + 1.0)).saturate()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
