//! Common

use crate::geometry::*;
use crate::pbrt::*;

/// Maps a point on the unit square to the unit disk with the concentric
/// mapping, which preserves relative areas.
///
/// * `u` - The point on the unit square.
pub fn concentric_sample_disk(u: &Point2f) -> Point2f {
    // Map uniform random numbers to [-1,1]^2.
    let u_offset = Point2f::new(2.0 * u.x - 1.0, 2.0 * u.y - 1.0);

    // Handle degeneracy at the origin.
    if u_offset.x == 0.0 && u_offset.y == 0.0 {
        return Point2f::zero();
    }

    // Apply concentric mapping to point
    let (r, theta) = if abs(u_offset.x) > abs(u_offset.y) {
        (u_offset.x, PI_OVER_FOUR * (u_offset.y / u_offset.x))
    } else {
        (
            u_offset.y,
            PI_OVER_TWO - PI_OVER_FOUR * (u_offset.x / u_offset.y),
        )
    };

    r * Point2f::new(theta.cos(), theta.sin())
}

/// Inverts `concentric_sample_disk()`, returning the point on the unit square
/// that maps to a point on the unit disk.
///
/// * `p` - The point on the unit disk.
pub fn concentric_disk_to_square(p: &Point2f) -> Point2f {
    let r = (p.x * p.x + p.y * p.y).sqrt();
    if r == 0.0 {
        return Point2f::new(0.5, 0.5);
    }

    let mut phi = p.y.atan2(p.x);
    if phi < -PI_OVER_FOUR {
        phi += TWO_PI;
    }

    let (a, b) = if phi < PI_OVER_FOUR {
        (r, phi * r / PI_OVER_FOUR)
    } else if phi < 3.0 * PI_OVER_FOUR {
        (-(phi - PI_OVER_TWO) * r / PI_OVER_FOUR, r)
    } else if phi < 5.0 * PI_OVER_FOUR {
        (-r, -(phi - PI) * r / PI_OVER_FOUR)
    } else {
        ((phi - 3.0 * PI_OVER_TWO) * r / PI_OVER_FOUR, -r)
    };

    Point2f::new(0.5 * (a + 1.0), 0.5 * (b + 1.0)).saturate()
}

/// Uniformly sample a direction on the unit sphere.
///
/// * `u` - The random sample point.
pub fn uniform_sample_sphere(u: &Point2f) -> Vector3f {
    let z = 1.0 - 2.0 * u.x;
    let r = safe_sqrt(1.0 - z * z);
    let phi = TWO_PI * u.y;
    Vector3f::new(r * phi.cos(), r * phi.sin(), z)
}

/// Returns the PDF for uniformly sampling a direction on the sphere.
#[inline(always)]
pub fn uniform_sphere_pdf() -> Float {
    INV_FOUR_PI
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
