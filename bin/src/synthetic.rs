//! Procedural Sampler
//!
//! A CPU stand-in for the renderer: every sample fires rays from random
//! points in the scene bounds and gathers radiance from a single directional
//! light, drawing directions from the published guiding distribution mixed
//! with uniform sphere sampling.

use common::geometry::*;
use common::pbrt::*;
use common::rng::RNG;
use common::sampling::*;
use guiding::*;
use serde::Deserialize;

/// A directional light with a smooth falloff towards the edge of its cone.
#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SyntheticLight {
    /// Direction towards the light.
    pub direction: [Float; 3],

    /// Cosine of the cone half angle.
    pub cos_radius: Float,

    /// Radiance along the cone axis.
    pub radiance: Float,

    /// Radiance from every other direction.
    pub ambient: Float,
}

impl Default for SyntheticLight {
    fn default() -> Self {
        Self {
            direction: [0.3, 0.8, 0.5],
            cos_radius: 0.95,
            radiance: 10.0,
            ambient: 0.05,
        }
    }
}

impl SyntheticLight {
    /// Returns the normalized light direction.
    pub fn axis(&self) -> Vector3f {
        let [x, y, z] = self.direction;
        Vector3f::new(x, y, z).normalize()
    }

    /// Returns the radiance arriving from direction `d`.
    ///
    /// * `d` - Unit direction.
    pub fn radiance(&self, d: &Vector3f) -> Float {
        let c = d.dot(&self.axis());
        if c <= self.cos_radius {
            return self.ambient;
        }
        let t = (c - self.cos_radius) / (1.0 - self.cos_radius);
        self.ambient + self.radiance * t
    }
}

/// CPU implementation of the external sampler.
pub struct ProceduralSampler {
    light: SyntheticLight,
    bounds: Bounds3f,
    rays_per_sample: usize,
    uniform_fraction: Float,
    rng: RNG,
}

impl ProceduralSampler {
    /// Creates a new sampler.
    ///
    /// * `light`            - The light.
    /// * `bounds`           - Scene bounds ray origins are drawn from.
    /// * `rays_per_sample`  - Rays traced per sample per pixel.
    /// * `uniform_fraction` - Probability of sampling the sphere uniformly.
    /// * `seed`             - RNG sequence.
    pub fn new(
        light: SyntheticLight,
        bounds: Bounds3f,
        rays_per_sample: usize,
        uniform_fraction: Float,
        seed: u64,
    ) -> Self {
        Self {
            light,
            bounds,
            rays_per_sample,
            uniform_fraction: clamp(uniform_fraction, 0.0, 1.0),
            rng: RNG::new(seed),
        }
    }

    fn random_point(&mut self) -> Point3f {
        let t = Point3f::new(
            self.rng.uniform_float(),
            self.rng.uniform_float(),
            self.rng.uniform_float(),
        );
        Point3f::new(
            lerp(t.x, self.bounds.p_min.x, self.bounds.p_max.x),
            lerp(t.y, self.bounds.p_min.y, self.bounds.p_max.y),
            lerp(t.z, self.bounds.p_min.z, self.bounds.p_max.z),
        )
    }

    /// Traces one ray and records its radiance estimate.
    fn trace(&mut self, buffers: &mut GuidingBuffers) {
        let p = self.random_point();
        let state = buffers.locate_state(&p);
        let u = self.rng.uniform_point2f();
        let d = if self.rng.uniform_float() < self.uniform_fraction {
            uniform_sample_sphere(&u)
        } else {
            buffers.sample_direction(state, &u).direction
        };

        let pdf = self.uniform_fraction * uniform_sphere_pdf()
            + (1.0 - self.uniform_fraction) * buffers.direction_pdf(state, &d);
        let radiance = self.light.radiance(&d);
        if d.has_nans() || !(pdf > 0.0) || !radiance.is_finite() {
            buffers.record_invalid(state);
            return;
        }
        let action = buffers.action_of(state, &d);
        buffers.record(state, action, radiance);
    }

    /// Returns the guided density towards the light relative to uniform
    /// sampling, averaged over the states containing a few probe points.
    ///
    /// * `buffers` - The published buffers.
    pub fn concentration(&mut self, buffers: &GuidingBuffers) -> Float {
        const PROBES: usize = 64;
        let axis = self.light.axis();
        let total: Float = (0..PROBES)
            .map(|_| {
                let state = buffers.locate_state(&self.random_point());
                buffers.direction_pdf(state, &axis) / uniform_sphere_pdf()
            })
            .sum();
        total / PROBES as Float
    }
}

impl ExternalSampler for ProceduralSampler {
    fn sample_pass(&mut self, buffers: &mut GuidingBuffers) -> Result<()> {
        if buffers.state_count() == 0 {
            return Err(GuidingError::SamplingPass("no guiding buffers registered".to_string()));
        }
        let rays = buffers.samples_per_pass as usize * self.rays_per_sample;
        for _ in 0..rays {
            self.trace(buffers);
        }
        Ok(())
    }

    fn update_directional_trees(&mut self, buffers: &mut GuidingBuffers, threshold: Float, max_depth: u32) -> Result<()> {
        let stats = update_buffers(buffers, threshold, max_depth)?;
        debug!("Procedural sampler updated {} directional nodes", stats.nodes);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
