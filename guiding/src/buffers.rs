//! Sampler Buffers
//!
//! The flat buffers shared with the external sampler. Every buffer is present
//! for every configuration; the ones an active configuration does not use
//! stay zero-sized. Statistics flow in through `read()` and results flow out
//! through `write()`, both of which check the shape first.

use crate::config::*;
use crate::dtree::*;
use crate::error::*;
use crate::spatial::*;
use crate::stree::*;
use common::geometry::*;
use common::pbrt::*;
use common::sampling::{DirectionalMapping, Distribution1D};

/// A named, shaped, dense buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer<T> {
    name: &'static str,
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Copy + Default> Buffer<T> {
    /// Returns a zero-sized buffer.
    ///
    /// * `name` - Buffer name.
    pub fn empty(name: &'static str) -> Self {
        Self {
            name,
            shape: vec![0],
            data: Vec::new(),
        }
    }

    /// Returns a buffer of the given shape filled with `T::default()`.
    ///
    /// * `name`  - Buffer name.
    /// * `shape` - Dimensions.
    pub fn zeros(name: &'static str, shape: &[usize]) -> Self {
        Self::filled(name, shape, T::default())
    }

    /// Returns a buffer of the given shape filled with a value.
    ///
    /// * `name`  - Buffer name.
    /// * `shape` - Dimensions.
    /// * `value` - Fill value.
    pub fn filled(name: &'static str, shape: &[usize], value: T) -> Self {
        Self {
            name,
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    /// Returns a buffer wrapping existing data.
    ///
    /// * `name`  - Buffer name.
    /// * `shape` - Dimensions.
    /// * `data`  - Row-major contents.
    pub fn from_vec(name: &'static str, shape: &[usize], data: Vec<T>) -> Result<Self> {
        let n: usize = shape.iter().product();
        if data.len() != n {
            return Err(GuidingError::ShapeMismatch {
                name,
                expected: shape.to_vec(),
                found: vec![data.len()],
            });
        }
        Ok(Self {
            name,
            shape: shape.to_vec(),
            data,
        })
    }

    /// Returns the buffer name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the dimensions.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the contents.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Returns the contents for modification.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Returns row `i` of a 2-D buffer.
    ///
    /// * `i` - Row index.
    pub fn row(&self, i: usize) -> &[T] {
        let cols = self.shape.get(1).copied().unwrap_or(1);
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Returns row `i` of a 2-D buffer for modification.
    ///
    /// * `i` - Row index.
    pub fn row_mut(&mut self, i: usize) -> &mut [T] {
        let cols = self.shape.get(1).copied().unwrap_or(1);
        &mut self.data[i * cols..(i + 1) * cols]
    }

    /// Fails unless the buffer has the expected shape.
    ///
    /// * `expected` - Expected dimensions.
    pub fn check_shape(&self, expected: &[usize]) -> Result<()> {
        if self.shape == expected {
            Ok(())
        } else if self.data.is_empty() && expected.iter().product::<usize>() > 0 {
            Err(GuidingError::MissingBuffer(self.name))
        } else {
            Err(GuidingError::ShapeMismatch {
                name: self.name,
                expected: expected.to_vec(),
                found: self.shape.clone(),
            })
        }
    }

    /// Copies the whole buffer into host memory.
    ///
    /// * `expected` - Expected dimensions.
    /// * `dst`      - Destination with as many elements as `expected` describes.
    pub fn read(&self, expected: &[usize], dst: &mut [T]) -> Result<()> {
        self.check_shape(expected)?;
        debug_assert_eq!(dst.len(), self.data.len());
        dst.copy_from_slice(&self.data);
        Ok(())
    }

    /// Overwrites the whole buffer from host memory.
    ///
    /// * `expected` - Expected dimensions.
    /// * `src`      - Source with as many elements as `expected` describes.
    pub fn write(&mut self, expected: &[usize], src: &[T]) -> Result<()> {
        self.check_shape(expected)?;
        debug_assert_eq!(src.len(), self.data.len());
        self.data.copy_from_slice(src);
        Ok(())
    }
}

/// The buffer set exchanged with the external sampler at pass boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct GuidingBuffers {
    /// `SpatialType` tag.
    pub spatial_table_type: u32,

    /// `DirectionalType` tag.
    pub directional_table_type: u32,

    /// `DirectionalMapping` tag.
    pub directional_mapping_method: u32,

    /// Samples are summed into `q_table_accumulated` instead of averaged
    /// into `q_table`.
    pub accumulative: bool,

    /// `q_table_pdf` holds cumulative rows.
    pub pdf_is_cdf: bool,

    /// Voxels along each axis of the spatial grid.
    pub unit_cube_number: [u32; 3],

    /// Cells along each side of the directional grid.
    pub unit_uv_number: [u32; 2],

    /// Scene bounds covered by the spatial discretization.
    pub scene_bounds: Bounds3f,

    /// Octree first children.
    pub stree_index: Buffer<u32>,

    /// Octree octants.
    pub stree_rank: Buffer<u32>,

    /// Binary tree visit counters.
    pub stree_visit_count: Buffer<u32>,

    /// Binary tree first children.
    pub stree_child: Buffer<u32>,

    /// Binary tree parents.
    pub stree_parent: Buffer<u32>,

    /// Binary tree split axes.
    pub stree_axis: Buffer<u32>,

    /// Binary tree node count.
    pub stree_current_size: u32,

    /// Unit direction at the centre of every grid action.
    pub unit_uv_vectors: Buffer<Float>,

    /// Directional tree first children, one row per state.
    pub dtree_index: Buffer<u32>,

    /// Directional tree quadrants, one row per state.
    pub dtree_rank: Buffer<u32>,

    /// Directional tree depths, one row per state.
    pub dtree_depth: Buffer<u32>,

    /// Directional tree parents, one row per state.
    pub dtree_select: Buffer<u32>,

    /// Directional tree node counts.
    pub dtree_current_size: Buffer<u32>,

    /// Current values.
    pub q_table: Buffer<Float>,

    /// Radiance summed since the last update.
    pub q_table_accumulated: Buffer<Float>,

    /// Sampling distribution.
    pub q_table_pdf: Buffer<Float>,

    /// Samples summed into `q_table_accumulated`.
    pub q_table_visit_counts: Buffer<u32>,

    /// Diagnostic sample counter.
    pub q_table_normal_counts: Buffer<u32>,

    /// Per-state samples that produced a usable estimate.
    pub valid_sample_counts: Buffer<u32>,

    /// Per-state samples that were rejected.
    pub invalid_sample_counts: Buffer<u32>,

    /// Quota of the current sampling pass.
    pub samples_per_pass: u32,

    /// Samples completed before the current pass.
    pub completed_sample_number: u32,
}

impl Default for GuidingBuffers {
    fn default() -> Self {
        Self::empty()
    }
}

impl GuidingBuffers {
    /// Returns the buffer set with every buffer registered at zero size.
    pub fn empty() -> Self {
        Self {
            spatial_table_type: SpatialType::Grid.tag(),
            directional_table_type: DirectionalType::Grid.tag(),
            directional_mapping_method: DirectionalMapping::EqualArea.tag(),
            accumulative: false,
            pdf_is_cdf: false,
            unit_cube_number: [0; 3],
            unit_uv_number: [0; 2],
            scene_bounds: Bounds3f::default(),
            stree_index: Buffer::empty("stree_index"),
            stree_rank: Buffer::empty("stree_rank"),
            stree_visit_count: Buffer::empty("stree_visit_count"),
            stree_child: Buffer::empty("stree_child"),
            stree_parent: Buffer::empty("stree_parent"),
            stree_axis: Buffer::empty("stree_axis"),
            stree_current_size: 0,
            unit_uv_vectors: Buffer::empty("unit_uv_vectors"),
            dtree_index: Buffer::empty("dtree_index"),
            dtree_rank: Buffer::empty("dtree_rank"),
            dtree_depth: Buffer::empty("dtree_depth"),
            dtree_select: Buffer::empty("dtree_select"),
            dtree_current_size: Buffer::empty("dtree_current_size"),
            q_table: Buffer::empty("q_table"),
            q_table_accumulated: Buffer::empty("q_table_accumulated"),
            q_table_pdf: Buffer::empty("q_table_pdf"),
            q_table_visit_counts: Buffer::empty("q_table_visit_counts"),
            q_table_normal_counts: Buffer::empty("q_table_normal_counts"),
            valid_sample_counts: Buffer::empty("valid_sample_counts"),
            invalid_sample_counts: Buffer::empty("invalid_sample_counts"),
            samples_per_pass: 0,
            completed_sample_number: 0,
        }
    }

    /// Returns the number of states.
    pub fn state_count(&self) -> usize {
        self.valid_sample_counts.len()
    }

    /// Returns the number of actions per state.
    pub fn action_count(&self) -> usize {
        match self.state_count() {
            0 => 0,
            n_s => self.q_table.len() / n_s,
        }
    }

    fn spatial_type(&self) -> SpatialType {
        SpatialType::try_from(self.spatial_table_type).unwrap_or_default()
    }

    fn directional_type(&self) -> DirectionalType {
        DirectionalType::try_from(self.directional_table_type).unwrap_or_default()
    }

    fn mapping(&self) -> DirectionalMapping {
        DirectionalMapping::try_from(self.directional_mapping_method).unwrap_or_default()
    }

    /// Returns the state containing a world position.
    ///
    /// * `p` - The position.
    pub fn locate_state(&self, p: &Point3f) -> usize {
        match self.spatial_type() {
            SpatialType::Grid => grid_state_index(&self.scene_bounds, self.unit_cube_number[0] as usize, p),
            SpatialType::Octree => octree_locate(self.stree_index.data(), &self.scene_bounds, p),
            SpatialType::BinaryTree => {
                binary_tree_locate(self.stree_child.data(), self.stree_axis.data(), &self.scene_bounds, p)
            }
        }
    }

    /// Returns the grid sampling weights of a state; cumulative rows are
    /// turned back into probabilities.
    fn grid_weights(&self, state: usize) -> Vec<Float> {
        let row = self.q_table_pdf.row(state);
        if self.pdf_is_cdf {
            let mut prev = 0.0;
            row.iter()
                .map(|&c| {
                    let w = max(c - prev, 0.0);
                    prev = c;
                    w
                })
                .collect()
        } else {
            row.to_vec()
        }
    }

    /// Draws a direction from the guiding distribution of a state.
    ///
    /// * `state` - The state.
    /// * `u`     - Uniform sample.
    pub fn sample_direction(&self, state: usize, u: &Point2f) -> GuidedSample {
        let mapping = self.mapping();
        match self.directional_type() {
            DirectionalType::Grid => {
                let n_uv = self.unit_uv_number[0] as usize;
                let n_a = self.action_count();
                let distrib = Distribution1D::new(&self.grid_weights(state));
                let (action, prob, ux) = distrib.sample_discrete(u.x);
                GuidedSample {
                    action,
                    direction: mapping.grid_direction(action, &Point2f::new(ux, u.y), n_uv),
                    pdf: prob * n_a as Float * INV_FOUR_PI,
                }
            }
            DirectionalType::Quadtree => quadtree_sample(
                self.dtree_index.row(state),
                self.dtree_depth.row(state),
                self.q_table.row(state),
                mapping,
                u,
            ),
        }
    }

    /// Returns the action of a state containing a direction.
    ///
    /// * `state` - The state.
    /// * `d`     - The unit direction.
    pub fn action_of(&self, state: usize, d: &Vector3f) -> usize {
        let mapping = self.mapping();
        match self.directional_type() {
            DirectionalType::Grid => mapping.grid_action(d, self.unit_uv_number[0] as usize),
            DirectionalType::Quadtree => quadtree_leaf(self.dtree_index.row(state), &mapping.direction_to_square(d)).0,
        }
    }

    /// Returns the solid angle density with which `sample_direction()` draws
    /// a direction.
    ///
    /// * `state` - The state.
    /// * `d`     - The unit direction.
    pub fn direction_pdf(&self, state: usize, d: &Vector3f) -> Float {
        let action = self.action_of(state, d);
        match self.directional_type() {
            DirectionalType::Grid => {
                let weights = self.grid_weights(state);
                let total = sum(&weights);
                let prob = if total > 0.0 {
                    weights[action] / total
                } else {
                    1.0 / weights.len() as Float
                };
                prob * weights.len() as Float * INV_FOUR_PI
            }
            DirectionalType::Quadtree => quadtree_density(self.dtree_depth.row(state), self.q_table.row(state), action),
        }
    }

    /// Records one radiance estimate for a state and action. Accumulative
    /// buffers sum the estimate; otherwise the value is updated as a running
    /// mean.
    ///
    /// * `state`    - The state.
    /// * `action`   - The action.
    /// * `radiance` - The estimate.
    pub fn record(&mut self, state: usize, action: usize, radiance: Float) {
        let i = state * self.action_count() + action;
        let visits = {
            let v = &mut self.q_table_visit_counts.data_mut()[i];
            *v = v.saturating_add(1);
            *v
        };
        let normal = &mut self.q_table_normal_counts.data_mut()[i];
        *normal = normal.saturating_add(1);
        if self.accumulative {
            self.q_table_accumulated.data_mut()[i] += radiance;
        } else {
            let q = &mut self.q_table.data_mut()[i];
            *q += (radiance - *q) / visits as Float;
        }
        let valid = &mut self.valid_sample_counts.data_mut()[state];
        *valid = valid.saturating_add(1);
        if let Some(v) = self.stree_visit_count.data_mut().get_mut(state) {
            *v = v.saturating_add(1);
        }
    }

    /// Records a rejected sample for a state.
    ///
    /// * `state` - The state.
    pub fn record_invalid(&mut self, state: usize) {
        let invalid = &mut self.invalid_sample_counts.data_mut()[state];
        *invalid = invalid.saturating_add(1);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
