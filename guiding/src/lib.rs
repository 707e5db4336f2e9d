//! Path Guiding
//!
//! Maintains the radiance table that an external sampler uses to importance
//! sample outgoing directions, together with the adaptive directional and
//! spatial trees that discretize it.

#[macro_use]
extern crate log;

mod buffers;
mod config;
mod controller;
mod dtree;
mod error;
mod sampler;
mod spatial;
mod stree;
mod table;
mod update;

// Re-export.
pub use buffers::*;
pub use config::*;
pub use controller::*;
pub use dtree::*;
pub use error::*;
pub use sampler::*;
pub use spatial::*;
pub use stree::*;
pub use table::*;
pub use update::*;
