//! External Sampler

use crate::buffers::GuidingBuffers;
use crate::error::*;
use common::pbrt::Float;

/// The renderer side of the guiding cycle. It owns the sampling kernel and
/// exchanges statistics with the guiding core only through `GuidingBuffers`,
/// and never while an update is running.
pub trait ExternalSampler {
    /// Runs one sampling pass of `buffers.samples_per_pass` samples, reading
    /// the published distribution and recording visits and radiance.
    ///
    /// * `buffers` - The shared buffers.
    fn sample_pass(&mut self, buffers: &mut GuidingBuffers) -> Result<()>;

    /// Runs the directional tree update of every state on the sampler's own
    /// executor. The update must match `update_buffers()`.
    ///
    /// * `buffers`   - The shared buffers holding values, visits and layouts.
    /// * `threshold` - Energy share above which a leaf subdivides.
    /// * `max_depth` - Nodes at this depth never subdivide.
    fn update_directional_trees(&mut self, buffers: &mut GuidingBuffers, threshold: Float, max_depth: u32) -> Result<()> {
        let _ = (buffers, threshold, max_depth);
        Err(GuidingError::Configuration(
            "sampler does not provide a directional tree executor".to_string(),
        ))
    }
}
