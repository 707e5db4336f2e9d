//! Radiance Table
//!
//! The state × action arrays learned from the sampler's statistics and the
//! sampling distribution derived from them. States come from the spatial
//! discretization (grid, octree or binary tree) and actions from the
//! directional one (grid or per-state quadtree).

use crate::buffers::*;
use crate::config::*;
use crate::dtree::*;
use crate::error::*;
use crate::sampler::*;
use crate::spatial::*;
use crate::stree::*;
use crate::update::*;
use common::app::resolve_threads;
use common::geometry::*;
use common::pbrt::*;
use std::fmt;

/// Floor added to every value before normalizing a row.
const PDF_FLOOR: Float = 1e-6;

/// Diagnostics of one `compute_pdf()` call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateReport {
    /// Samples that produced a usable estimate.
    pub valid_samples: u64,

    /// Samples that were rejected.
    pub invalid_samples: u64,

    /// `invalid / (valid + invalid)`, 0 without samples.
    pub invalid_rate: Float,

    /// Mean of the values.
    pub value_mean: Float,

    /// Maximum of the values.
    pub value_max: Float,

    /// Directional tree counters.
    pub directional: TreeUpdateStats,

    /// Spatial leaves split.
    pub spatial_splits: usize,

    /// Spatial splits skipped because the tree was full.
    pub spatial_clamped: usize,
}

impl fmt::Display for UpdateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "valid {} invalid {} ({:.4}), value mean {:.6} max {:.6}",
            self.valid_samples, self.invalid_samples, self.invalid_rate, self.value_mean, self.value_max
        )?;
        if self.directional.nodes > 0 {
            write!(
                f,
                ", dtree nodes {} splits {} merges {} clamped {}",
                self.directional.nodes, self.directional.splits, self.directional.merges, self.directional.clamped
            )?;
        }
        if self.spatial_splits > 0 || self.spatial_clamped > 0 {
            write!(f, ", stree splits {} clamped {}", self.spatial_splits, self.spatial_clamped)?;
        }
        Ok(())
    }
}

/// The directional values of one grid cell laid out as an image.
#[derive(Clone, Debug, PartialEq)]
pub struct RadianceMap {
    /// Image rows.
    pub rows: usize,

    /// Image columns.
    pub columns: usize,

    /// Row-major values.
    pub data: Vec<Float>,
}

/// The learned radiance table.
#[derive(Clone, Debug)]
pub struct RadianceTable {
    config: GuidingConfig,
    n_s: usize,
    n_a: usize,

    value: Vec<Float>,
    value_accumulated: Vec<Float>,
    pdf: Vec<Float>,
    visit_count: Vec<u32>,
    normal_count: Vec<u32>,
    valid_sample_count: Vec<u32>,
    invalid_sample_count: Vec<u32>,

    octree: Option<OctreeLayout>,
    spatial_tree: Option<SpatialTree>,
    directional_trees: Vec<DirectionalTree>,
}

impl RadianceTable {
    /// Allocates the table for a configuration. Values and statistics start
    /// at zero and every PDF row is uniform.
    ///
    /// * `config` - The discretization; fixed for the table's lifetime.
    /// * `octree` - Scene octree, required by `SpatialType::Octree`.
    pub fn new(config: GuidingConfig, octree: Option<OctreeLayout>) -> Result<Self> {
        config.validate()?;
        let octree = match config.spatial_type {
            SpatialType::Octree => {
                let layout = octree.ok_or_else(|| config_error("octree spatial type requires an octree layout"))?;
                layout.validate()?;
                Some(layout)
            }
            _ => None,
        };
        let n_s = config.state_count(octree.as_ref().map(OctreeLayout::node_count))?;
        let n_a = config.action_count();
        if n_s == 0 || n_a == 0 {
            return Err(config_error(format!(
                "table needs at least one state and action, got {n_s} x {n_a}"
            )));
        }

        let spatial_tree = match config.spatial_type {
            SpatialType::BinaryTree => Some(SpatialTree::new(config.bounds(), n_s, config.binary_tree_k)?),
            _ => None,
        };
        let directional_trees = match config.directional_type {
            DirectionalType::Quadtree => (0..n_s)
                .map(|_| DirectionalTree::new(n_a, config.quadtree_max_depth))
                .collect(),
            DirectionalType::Grid => Vec::new(),
        };

        info!(
            "Radiance table {} x {} ({:?} states, {:?} actions, {} mapping)",
            n_s, n_a, config.spatial_type, config.directional_type, config.directional_mapping_method
        );

        let n = n_s * n_a;
        Ok(Self {
            config,
            n_s,
            n_a,
            value: vec![0.0; n],
            value_accumulated: vec![0.0; n],
            pdf: vec![1.0 / n_a as Float; n],
            visit_count: vec![0; n],
            normal_count: vec![0; n],
            valid_sample_count: vec![0; n_s],
            invalid_sample_count: vec![0; n_s],
            octree,
            spatial_tree,
            directional_trees,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GuidingConfig {
        &self.config
    }

    /// Returns the number of states.
    pub fn state_count(&self) -> usize {
        self.n_s
    }

    /// Returns the number of actions per state.
    pub fn action_count(&self) -> usize {
        self.n_a
    }

    /// Returns all values, row-major.
    pub fn value(&self) -> &[Float] {
        &self.value
    }

    /// Returns the values of a state.
    ///
    /// * `state` - The state.
    pub fn value_row(&self, state: usize) -> &[Float] {
        &self.value[state * self.n_a..(state + 1) * self.n_a]
    }

    /// Returns the radiance summed since the last update, row-major.
    pub fn value_accumulated(&self) -> &[Float] {
        &self.value_accumulated
    }

    /// Returns the sampling distribution, row-major. Rows always hold
    /// probabilities even when cumulative rows are published.
    pub fn pdf(&self) -> &[Float] {
        &self.pdf
    }

    /// Returns the sampling distribution of a state.
    ///
    /// * `state` - The state.
    pub fn pdf_row(&self, state: usize) -> &[Float] {
        &self.pdf[state * self.n_a..(state + 1) * self.n_a]
    }

    /// Returns the visits of the current window, row-major.
    pub fn visit_count(&self) -> &[u32] {
        &self.visit_count
    }

    /// Returns the diagnostic sample counters, row-major.
    pub fn normal_count(&self) -> &[u32] {
        &self.normal_count
    }

    /// Returns the per-state usable sample counters.
    pub fn valid_sample_count(&self) -> &[u32] {
        &self.valid_sample_count
    }

    /// Returns the per-state rejected sample counters.
    pub fn invalid_sample_count(&self) -> &[u32] {
        &self.invalid_sample_count
    }

    /// Returns the directional tree of a state, if directions use quadtrees.
    ///
    /// * `state` - The state.
    pub fn directional_tree(&self, state: usize) -> Option<&DirectionalTree> {
        self.directional_trees.get(state)
    }

    /// Returns the spatial tree, if states use the binary tree.
    pub fn spatial_tree(&self) -> Option<&SpatialTree> {
        self.spatial_tree.as_ref()
    }

    /// Returns the state containing a world position.
    ///
    /// * `p` - The position.
    pub fn state_index(&self, p: &Point3f) -> usize {
        let bounds = self.config.bounds();
        match self.config.spatial_type {
            SpatialType::Grid => grid_state_index(&bounds, self.config.n_cube, p),
            SpatialType::Octree => self.octree.as_ref().map_or(0, |o| o.locate(&bounds, p)),
            SpatialType::BinaryTree => self.spatial_tree.as_ref().map_or(0, |t| t.locate(p)),
        }
    }

    /// Replaces `buffers` with a buffer set sized for this table and filled
    /// with its current contents. Buffers the configuration does not use stay
    /// zero-sized.
    ///
    /// * `buffers` - The sampler buffers.
    pub fn register(&self, buffers: &mut GuidingBuffers) -> Result<()> {
        let (n_s, n_a) = (self.n_s, self.n_a);
        let table = [n_s, n_a];
        let config = &self.config;

        let mut b = GuidingBuffers::empty();
        b.spatial_table_type = config.spatial_type.tag();
        b.directional_table_type = config.directional_type.tag();
        b.directional_mapping_method = config.directional_mapping_method.tag();
        b.accumulative = config.accumulative_q_table_update;
        b.pdf_is_cdf = self.publishes_cdf();
        b.scene_bounds = config.bounds();

        match config.spatial_type {
            SpatialType::Grid => b.unit_cube_number = [config.n_cube as u32; 3],
            SpatialType::Octree => {
                if let Some(octree) = &self.octree {
                    let n = octree.node_count();
                    b.stree_index = Buffer::from_vec("stree_index", &[n], octree.index.clone())?;
                    b.stree_rank = Buffer::from_vec("stree_rank", &[n], octree.rank.clone())?;
                }
            }
            SpatialType::BinaryTree => {
                b.stree_visit_count = Buffer::zeros("stree_visit_count", &[n_s]);
                b.stree_child = Buffer::zeros("stree_child", &[n_s]);
                b.stree_parent = Buffer::zeros("stree_parent", &[n_s]);
                b.stree_axis = Buffer::zeros("stree_axis", &[n_s]);
                if let Some(tree) = &self.spatial_tree {
                    tree.copy_to_external(&mut b)?;
                }
            }
        }

        match config.directional_type {
            DirectionalType::Grid => {
                let mapping = config.directional_mapping_method;
                let center = Point2f::new(0.5, 0.5);
                let mut vectors = Vec::with_capacity(3 * n_a);
                for action in 0..n_a {
                    let d = mapping.grid_direction(action, &center, config.n_uv);
                    vectors.extend_from_slice(&[d.x, d.y, d.z]);
                }
                b.unit_uv_vectors = Buffer::from_vec("unit_uv_vectors", &[n_a, 3], vectors)?;
                b.unit_uv_number = [config.n_uv as u32; 2];
            }
            DirectionalType::Quadtree => {
                b.dtree_index = Buffer::zeros("dtree_index", &table);
                b.dtree_rank = Buffer::zeros("dtree_rank", &table);
                b.dtree_depth = Buffer::zeros("dtree_depth", &table);
                b.dtree_select = Buffer::zeros("dtree_select", &table);
                b.dtree_current_size = Buffer::zeros("dtree_current_size", &[n_s]);
                self.write_directional_layout(&mut b)?;
            }
        }

        b.q_table = Buffer::from_vec("q_table", &table, self.value.clone())?;
        b.q_table_accumulated = Buffer::from_vec("q_table_accumulated", &table, self.value_accumulated.clone())?;
        b.q_table_pdf = Buffer::from_vec("q_table_pdf", &table, self.published_pdf())?;
        b.q_table_visit_counts = Buffer::from_vec("q_table_visit_counts", &table, self.visit_count.clone())?;
        b.q_table_normal_counts = Buffer::from_vec("q_table_normal_counts", &table, self.normal_count.clone())?;
        b.valid_sample_counts = Buffer::from_vec("valid_sample_counts", &[n_s], self.valid_sample_count.clone())?;
        b.invalid_sample_counts =
            Buffer::from_vec("invalid_sample_counts", &[n_s], self.invalid_sample_count.clone())?;

        b.samples_per_pass = buffers.samples_per_pass;
        b.completed_sample_number = buffers.completed_sample_number;
        *buffers = b;
        Ok(())
    }

    /// Ingests the statistics of the last sampling pass and publishes the
    /// next sampling distribution.
    ///
    /// Accumulative tables first recompute every value as the mean radiance
    /// of the window, 0 where nothing was recorded. Quadtree directions then
    /// refine their trees and stop. Grid directions derive each PDF row from
    /// the floored, normalized values blended with `epsilon` of the uniform
    /// distribution, and binary tree states may split. Accumulative tables
    /// start a new window afterwards.
    ///
    /// * `buffers`  - The sampler buffers registered by `register()`.
    /// * `external` - The sampler, needed for `QuadTreeUpdateType::ExternalParallel`.
    pub fn compute_pdf(
        &mut self,
        buffers: &mut GuidingBuffers,
        external: Option<&mut dyn ExternalSampler>,
    ) -> Result<UpdateReport> {
        let (n_s, n_a) = (self.n_s, self.n_a);
        let table = [n_s, n_a];
        let states = [n_s];
        let mut report = UpdateReport::default();

        // Stage every buffer read so a failed sync leaves the table untouched.
        let mut normal_count = vec![0; n_s * n_a];
        let mut valid_sample_count = vec![0; n_s];
        let mut invalid_sample_count = vec![0; n_s];
        let mut visit_count = vec![0; n_s * n_a];
        let mut value_accumulated = vec![0.0; n_s * n_a];
        let mut value = vec![0.0; n_s * n_a];
        buffers.q_table_normal_counts.read(&table, &mut normal_count)?;
        buffers.valid_sample_counts.read(&states, &mut valid_sample_count)?;
        buffers.invalid_sample_counts.read(&states, &mut invalid_sample_count)?;
        buffers.q_table_visit_counts.read(&table, &mut visit_count)?;
        if self.config.accumulative_q_table_update {
            buffers.q_table_accumulated.read(&table, &mut value_accumulated)?;
            for ((v, &acc), &n) in value.iter_mut().zip(&value_accumulated).zip(&visit_count) {
                *v = if n > 0 { acc / n as Float } else { 0.0 };
            }
        } else {
            buffers.q_table.read(&table, &mut value)?;
        }
        if let Some(tree) = self.spatial_tree.as_mut() {
            tree.copy_from_external(buffers)?;
        }

        self.normal_count = normal_count;
        self.valid_sample_count = valid_sample_count;
        self.invalid_sample_count = invalid_sample_count;
        self.visit_count = visit_count;
        self.value = value;
        if self.config.accumulative_q_table_update {
            self.value_accumulated = value_accumulated;
            buffers.q_table.write(&table, &self.value)?;
        }

        // Diagnostics.
        report.valid_samples = self.valid_sample_count.iter().map(|&c| c as u64).sum();
        report.invalid_samples = self.invalid_sample_count.iter().map(|&c| c as u64).sum();
        let total = report.valid_samples + report.invalid_samples;
        if total > 0 {
            report.invalid_rate = report.invalid_samples as Float / total as Float;
        }
        info!(
            "Total valid / invalid {} {} {}",
            report.valid_samples, report.invalid_samples, report.invalid_rate
        );

        report.value_mean = (self.value.iter().map(|&v| v as f64).sum::<f64>() / self.value.len() as f64) as Float;
        report.value_max = self.value.iter().copied().fold(0.0, max);
        debug!("Value mean {} max {}", report.value_mean, report.value_max);

        if self.config.directional_type == DirectionalType::Quadtree {
            report.directional = self.update_directional_trees(buffers, external)?;
            // Node slots were renumbered, so per-node statistics restart.
            self.reset_window(buffers)?;
            return Ok(report);
        }

        self.update_grid_pdf();

        if let Some(tree) = self.spatial_tree.as_mut() {
            let refined = tree.refine(self.config.binary_tree_threshold);
            for split in &refined.splits {
                let parent = split.parent * n_a;
                for child in split.children {
                    let child = child * n_a;
                    self.value.copy_within(parent..parent + n_a, child);
                    self.pdf.copy_within(parent..parent + n_a, child);
                }
            }
            report.spatial_splits = refined.splits.len();
            report.spatial_clamped = refined.clamped;
            if self.config.accumulative_q_table_update {
                tree.reset_visits();
            }
            tree.copy_to_external(buffers)?;
            if report.spatial_splits > 0 {
                info!("Spatial tree split {} leaves, {} nodes", report.spatial_splits, tree.len());
            }
        }

        buffers.q_table.write(&table, &self.value)?;
        buffers.q_table_pdf.write(&table, &self.published_pdf())?;

        if self.config.accumulative_q_table_update {
            self.reset_window(buffers)?;
        }
        Ok(report)
    }

    /// Returns the directional values of one cell of a spatial grid with
    /// directional grid, laid out as an image.
    ///
    /// * `x` - Cell along x.
    /// * `y` - Cell along y.
    /// * `z` - Cell along z.
    pub fn radiance_map(&self, x: usize, y: usize, z: usize) -> Result<RadianceMap> {
        let config = &self.config;
        if config.spatial_type != SpatialType::Grid || config.directional_type != DirectionalType::Grid {
            return Err(config_error("radiance maps need grid states and grid directions"));
        }
        let n = config.n_cube;
        if x >= n || y >= n || z >= n {
            return Err(config_error(format!("cell ({x}, {y}, {z}) outside {n}³ grid")));
        }
        let (rows, columns) = config.directional_mapping_method.grid_image_shape(config.n_uv);
        Ok(RadianceMap {
            rows,
            columns,
            data: self.value_row((x * n + y) * n + z).to_vec(),
        })
    }

    /// Derives every PDF row from the values: floor, normalize, blend.
    fn update_grid_pdf(&mut self) {
        let n_a = self.n_a;
        let epsilon = self.config.epsilon;
        let uniform = 1.0 / n_a as Float;
        for (values, pdf) in self.value.chunks(n_a).zip(self.pdf.chunks_mut(n_a)) {
            let floored = |v: Float| -> f64 {
                let v = if v.is_finite() && v > 0.0 { v } else { 0.0 };
                (v + PDF_FLOOR) as f64
            };
            let total: f64 = values.iter().map(|&v| floored(v)).sum();
            for (p, &v) in pdf.iter_mut().zip(values) {
                let normalized = (floored(v) / total) as Float;
                *p = normalized * (1.0 - epsilon) + uniform * epsilon;
            }
        }
    }

    /// Returns true if the published rows are cumulative.
    fn publishes_cdf(&self) -> bool {
        self.config.use_cdf && self.config.directional_type == DirectionalType::Grid
    }

    /// Returns the rows handed to the sampler: the PDF, or its running sum
    /// ending exactly at 1.
    fn published_pdf(&self) -> Vec<Float> {
        if !self.publishes_cdf() {
            return self.pdf.clone();
        }
        let mut cdf = self.pdf.clone();
        for row in cdf.chunks_mut(self.n_a) {
            let mut running = 0.0;
            for c in row.iter_mut() {
                running += *c;
                *c = running;
            }
            if let Some(last) = row.last_mut() {
                *last = 1.0;
            }
        }
        cdf
    }

    /// Runs the configured directional tree update and publishes the new
    /// layouts and values.
    fn update_directional_trees(
        &mut self,
        buffers: &mut GuidingBuffers,
        external: Option<&mut dyn ExternalSampler>,
    ) -> Result<TreeUpdateStats> {
        let table = [self.n_s, self.n_a];
        let threshold = self.config.quadtree_threshold;
        let stats = match self.config.quad_tree_update_type {
            QuadTreeUpdateType::Sequential => {
                update_sequential(&mut self.directional_trees, &mut self.value, &self.visit_count, threshold)
            }
            QuadTreeUpdateType::ParallelCpu => update_parallel(
                &mut self.directional_trees,
                &mut self.value,
                &self.visit_count,
                threshold,
                resolve_threads(self.config.n_threads),
            )?,
            QuadTreeUpdateType::ExternalParallel => {
                let external = external
                    .ok_or_else(|| config_error("external_parallel directional updates need an external sampler"))?;
                buffers.q_table.write(&table, &self.value)?;
                external.update_directional_trees(buffers, threshold, self.config.quadtree_max_depth)?;
                let mut value = vec![0.0; self.value.len()];
                buffers.q_table.read(&table, &mut value)?;
                let stats = self.read_directional_layout(buffers)?;
                self.value = value;
                stats
            }
        };

        self.write_directional_layout(buffers)?;
        buffers.q_table.write(&table, &self.value)?;
        info!(
            "Directional trees updated ({}): {} nodes, {} splits, {} merges",
            self.config.quad_tree_update_type, stats.nodes, stats.splits, stats.merges
        );
        if stats.clamped > 0 {
            warn!("{} directional splits skipped at capacity {}", stats.clamped, self.n_a);
        }
        Ok(stats)
    }

    /// Copies every directional tree layout into the buffers.
    fn write_directional_layout(&self, buffers: &mut GuidingBuffers) -> Result<()> {
        let table = [self.n_s, self.n_a];
        buffers.dtree_index.check_shape(&table)?;
        buffers.dtree_rank.check_shape(&table)?;
        buffers.dtree_depth.check_shape(&table)?;
        buffers.dtree_select.check_shape(&table)?;
        buffers.dtree_current_size.check_shape(&[self.n_s])?;
        for (s, tree) in self.directional_trees.iter().enumerate() {
            tree.write_layout(
                buffers.dtree_index.row_mut(s),
                buffers.dtree_rank.row_mut(s),
                buffers.dtree_depth.row_mut(s),
                buffers.dtree_select.row_mut(s),
            )?;
            buffers.dtree_current_size.data_mut()[s] = tree.size() as u32;
        }
        Ok(())
    }

    /// Replaces every directional tree with the layout held by the buffers.
    fn read_directional_layout(&mut self, buffers: &GuidingBuffers) -> Result<TreeUpdateStats> {
        let table = [self.n_s, self.n_a];
        buffers.dtree_index.check_shape(&table)?;
        buffers.dtree_current_size.check_shape(&[self.n_s])?;
        let trees = (0..self.n_s)
            .map(|s| {
                DirectionalTree::from_layout(
                    buffers.dtree_index.row(s),
                    buffers.dtree_rank.row(s),
                    buffers.dtree_depth.row(s),
                    buffers.dtree_select.row(s),
                    buffers.dtree_current_size.data()[s] as usize,
                    self.config.quadtree_max_depth,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let stats = TreeUpdateStats {
            nodes: trees.iter().map(|t| t.size()).sum(),
            ..Default::default()
        };
        self.directional_trees = trees;
        Ok(stats)
    }

    /// Clears the window accumulators and visits here and in the buffers.
    fn reset_window(&mut self, buffers: &mut GuidingBuffers) -> Result<()> {
        let table = [self.n_s, self.n_a];
        self.value_accumulated.iter_mut().for_each(|v| *v = 0.0);
        self.visit_count.iter_mut().for_each(|v| *v = 0);
        buffers.q_table_accumulated.write(&table, &self.value_accumulated)?;
        buffers.q_table_visit_counts.write(&table, &self.visit_count)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
