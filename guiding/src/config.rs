//! Guiding Configuration

use crate::error::*;
use common::geometry::*;
use common::pbrt::*;
use common::sampling::DirectionalMapping;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spatial discretization of the scene volume into states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialType {
    /// Regular `n_cube`³ voxel grid over the scene bounds.
    #[default]
    Grid,

    /// Externally precomputed octree.
    Octree,

    /// Adaptive binary partition refined from visit counts.
    BinaryTree,
}

impl SpatialType {
    /// Returns the buffer tag consumed by the external sampler.
    pub fn tag(&self) -> u32 {
        match self {
            Self::Grid => 0,
            Self::Octree => 1,
            Self::BinaryTree => 2,
        }
    }
}

impl TryFrom<u32> for SpatialType {
    type Error = u32;

    fn try_from(tag: u32) -> std::result::Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Grid),
            1 => Ok(Self::Octree),
            2 => Ok(Self::BinaryTree),
            _ => Err(tag),
        }
    }
}

/// Directional discretization of each state into actions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionalType {
    /// Regular grid over the mapped unit square.
    #[default]
    Grid,

    /// One adaptive quadtree per state.
    Quadtree,
}

impl DirectionalType {
    /// Returns the buffer tag consumed by the external sampler.
    pub fn tag(&self) -> u32 {
        match self {
            Self::Grid => 0,
            Self::Quadtree => 1,
        }
    }
}

impl TryFrom<u32> for DirectionalType {
    type Error = u32;

    fn try_from(tag: u32) -> std::result::Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Grid),
            1 => Ok(Self::Quadtree),
            _ => Err(tag),
        }
    }
}

/// Where the per-state directional quadtree updates run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadTreeUpdateType {
    /// One tree after another on the calling thread.
    #[default]
    #[serde(alias = "cpu_single")]
    Sequential,

    /// Trees distributed over a pool of worker threads.
    #[serde(alias = "cpu_multi")]
    ParallelCpu,

    /// Delegated to the external sampler's executor.
    #[serde(alias = "gpu")]
    ExternalParallel,
}

impl fmt::Display for QuadTreeUpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::ParallelCpu => write!(f, "parallel_cpu"),
            Self::ExternalParallel => write!(f, "external_parallel"),
        }
    }
}

/// Axis aligned scene bounds as plain arrays so they can be read from
/// configuration files.
#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SceneBounds {
    /// Minimum corner.
    pub min: [Float; 3],

    /// Maximum corner.
    pub max: [Float; 3],
}

impl Default for SceneBounds {
    fn default() -> Self {
        Self {
            min: [0.0; 3],
            max: [1.0; 3],
        }
    }
}

impl From<SceneBounds> for Bounds3f {
    fn from(b: SceneBounds) -> Self {
        Bounds3f::new(
            Point3f::new(b.min[0], b.min[1], b.min[2]),
            Point3f::new(b.max[0], b.max[1], b.max[2]),
        )
    }
}

/// Immutable description of one render configuration's guiding tables.
/// Changing any field requires building a new `RadianceTable`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GuidingConfig {
    /// Spatial discretization.
    pub spatial_type: SpatialType,

    /// Directional discretization.
    pub directional_type: DirectionalType,

    /// Mapping between directions and the unit square.
    pub directional_mapping_method: DirectionalMapping,

    /// Grid cells per axis for grid spatial discretization.
    pub n_cube: usize,

    /// Grid cells per side of the unit square for grid directional discretization.
    pub n_uv: usize,

    /// Node capacity of each directional quadtree.
    pub max_quadtree_count: usize,

    /// Maximum depth of a directional quadtree node.
    pub quadtree_max_depth: u32,

    /// Energy share above which a directional leaf subdivides.
    pub quadtree_threshold: Float,

    /// Node capacity of the spatial binary tree.
    pub binary_tree_max_size: usize,

    /// Fitting exponent `k` of the spatial split criterion.
    pub binary_tree_k: Float,

    /// Base visit threshold `c` of the spatial split criterion.
    pub binary_tree_threshold: Float,

    /// Recompute values from windowed sums instead of reading them as-is.
    pub accumulative_q_table_update: bool,

    /// Exploration floor blended into every PDF row.
    pub epsilon: Float,

    /// Publish cumulative rows instead of PDF rows.
    pub use_cdf: bool,

    /// Execution strategy for directional quadtree updates.
    pub quad_tree_update_type: QuadTreeUpdateType,

    /// Worker threads for parallel updates; 0 selects all logical CPUs.
    pub n_threads: usize,

    /// Scene bounding volume.
    pub scene_bounds: SceneBounds,
}

impl Default for GuidingConfig {
    fn default() -> Self {
        Self {
            spatial_type: SpatialType::Grid,
            directional_type: DirectionalType::Grid,
            directional_mapping_method: DirectionalMapping::EqualArea,
            n_cube: 8,
            n_uv: 16,
            max_quadtree_count: 512,
            quadtree_max_depth: 12,
            quadtree_threshold: 0.01,
            binary_tree_max_size: 10000,
            binary_tree_k: 2.0,
            binary_tree_threshold: 12000.0,
            accumulative_q_table_update: true,
            epsilon: 0.0,
            use_cdf: false,
            quad_tree_update_type: QuadTreeUpdateType::Sequential,
            n_threads: 0,
            scene_bounds: SceneBounds::default(),
        }
    }
}

impl GuidingConfig {
    /// Returns the scene bounds.
    pub fn bounds(&self) -> Bounds3f {
        self.scene_bounds.into()
    }

    /// Validates parameters that do not depend on the state count.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(config_error(format!(
                "epsilon must be in [0, 1], got {}",
                self.epsilon
            )));
        }
        if self.bounds().is_degenerate() {
            return Err(config_error(format!(
                "scene bounds {} have no volume",
                self.bounds()
            )));
        }
        match self.directional_type {
            DirectionalType::Grid if self.n_uv == 0 => {
                return Err(config_error("n_uv must be positive for grid directions"));
            }
            DirectionalType::Quadtree => {
                if self.max_quadtree_count == 0 {
                    return Err(config_error("max_quadtree_count must be positive"));
                }
                if !(self.quadtree_threshold > 0.0 && self.quadtree_threshold <= 1.0) {
                    return Err(config_error(format!(
                        "quadtree_threshold must be in (0, 1], got {}",
                        self.quadtree_threshold
                    )));
                }
                if self.quadtree_max_depth > MAX_QUADTREE_DEPTH {
                    return Err(config_error(format!(
                        "quadtree_max_depth must not exceed {MAX_QUADTREE_DEPTH}"
                    )));
                }
            }
            _ => {}
        }
        match self.spatial_type {
            SpatialType::Grid if self.n_cube == 0 => {
                return Err(config_error("n_cube must be positive for grid states"));
            }
            SpatialType::BinaryTree => {
                if self.binary_tree_max_size == 0 {
                    return Err(config_error("binary_tree_max_size must be positive"));
                }
                if !self.binary_tree_k.is_finite() || !(self.binary_tree_threshold >= 0.0) {
                    return Err(config_error(
                        "binary tree threshold and k must be finite and non-negative",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns the number of actions `n_a` per state.
    pub fn action_count(&self) -> usize {
        match self.directional_type {
            DirectionalType::Grid => self.directional_mapping_method.grid_action_count(self.n_uv),
            DirectionalType::Quadtree => self.max_quadtree_count,
        }
    }

    /// Returns the number of states `n_s` given the number of nodes of an
    /// external octree, if one is used.
    ///
    /// * `octree_nodes` - Node count of the external octree.
    pub fn state_count(&self, octree_nodes: Option<usize>) -> Result<usize> {
        match self.spatial_type {
            SpatialType::Grid => Ok(self.n_cube * self.n_cube * self.n_cube),
            SpatialType::Octree => {
                octree_nodes.ok_or_else(|| config_error("octree spatial type requires an octree layout"))
            }
            SpatialType::BinaryTree => Ok(self.binary_tree_max_size),
        }
    }
}

/// Depth limit that keeps quadtree node areas representable in `Float`.
pub const MAX_QUADTREE_DEPTH: u32 = 20;

/// Shorthand for a configuration error.
///
/// * `msg` - The message.
pub(crate) fn config_error<S: Into<String>>(msg: S) -> GuidingError {
    GuidingError::Configuration(msg.into())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_settings() {
        let c = GuidingConfig::default();
        assert_eq!(c.state_count(None).unwrap(), 512);
        assert_eq!(c.action_count(), 512);
        assert!(c.accumulative_q_table_update);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn cylindrical_grid_has_square_action_count() {
        let c = GuidingConfig {
            directional_mapping_method: DirectionalMapping::Cylindrical,
            n_uv: 4,
            ..Default::default()
        };
        assert_eq!(c.action_count(), 16);
    }

    #[test]
    fn config_reads_from_json_with_legacy_names() {
        let c: GuidingConfig = serde_json::from_str(
            r#"{
                "spatial_type": "binary_tree",
                "directional_type": "quadtree",
                "directional_mapping_method": "cylindrical",
                "quad_tree_update_type": "cpu_multi",
                "max_quadtree_count": 64,
                "epsilon": 0.1
            }"#,
        )
        .unwrap();
        assert_eq!(c.spatial_type, SpatialType::BinaryTree);
        assert_eq!(c.directional_type, DirectionalType::Quadtree);
        assert_eq!(c.quad_tree_update_type, QuadTreeUpdateType::ParallelCpu);
        assert_eq!(c.action_count(), 64);
        assert_eq!(c.state_count(None).unwrap(), 10000);
        assert_eq!(c.n_cube, 8);
    }

    #[test]
    fn epsilon_outside_unit_interval_is_rejected() {
        let c = GuidingConfig {
            epsilon: 1.5,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(GuidingError::Configuration(_))));
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let c = GuidingConfig {
            n_uv: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
        let c = GuidingConfig {
            n_cube: 0,
            ..Default::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn octree_without_layout_is_rejected() {
        let c = GuidingConfig {
            spatial_type: SpatialType::Octree,
            ..Default::default()
        };
        assert!(c.state_count(None).is_err());
        assert_eq!(c.state_count(Some(9)).unwrap(), 9);
    }
}
