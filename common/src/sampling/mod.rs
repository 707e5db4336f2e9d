//! Sampling

mod common;
mod distribution_1d;
mod mapping;

// Re-export
pub use common::*;
pub use distribution_1d::*;
pub use mapping::*;
