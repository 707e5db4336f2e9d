//! Geometry

mod bounds3;
mod point2;
mod point3;
mod vector3;

// Re-export
pub use bounds3::*;
pub use point2::*;
pub use point3::*;
pub use vector3::*;
