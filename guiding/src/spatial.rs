//! Spatial Lookup
//!
//! Maps world positions to states for the regular grid and for an externally
//! precomputed octree. The adaptive binary tree is in `stree`.

use crate::error::*;
use common::geometry::*;
use common::pbrt::*;

/// Returns the state of the voxel containing a point in a regular `n`³ grid
/// over `bounds`. Points outside the bounds are clamped to the nearest voxel.
///
/// * `bounds` - Scene bounds.
/// * `n`      - Voxels along each axis.
/// * `p`      - The point.
pub fn grid_state_index(bounds: &Bounds3f, n: usize, p: &Point3f) -> usize {
    let o = bounds.offset(p);
    let x = cell_index(o.x, n);
    let y = cell_index(o.y, n);
    let z = cell_index(o.z, n);
    (x * n + y) * n + z
}

/// Returns the octant of `p` relative to the centre of `bounds` and the
/// bounds of that octant.
///
/// * `bounds` - The parent bounds.
/// * `p`      - The point.
fn octant(bounds: &Bounds3f, p: &Point3f) -> (usize, Bounds3f) {
    let mid = bounds.centroid();
    let mut child = *bounds;
    let mut o = 0;
    for (bit, axis) in Axis::ALL.into_iter().enumerate() {
        if p[axis] >= mid[axis] {
            o |= 1 << bit;
            child.p_min[axis] = mid[axis];
        } else {
            child.p_max[axis] = mid[axis];
        }
    }
    (o, child)
}

/// Flattened octree layout supplied by the scene. Every node is a state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OctreeLayout {
    /// Index of the first of a node's 8 contiguous children, or 0 for a leaf.
    pub index: Vec<u32>,

    /// Octant of a node within its parent.
    pub rank: Vec<u32>,
}

impl OctreeLayout {
    /// Returns a layout consisting of the root only.
    pub fn root() -> Self {
        Self {
            index: vec![0],
            rank: vec![0],
        }
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    /// Checks that the layout forms a tree with children stored after their
    /// parent.
    pub fn validate(&self) -> Result<()> {
        let n = self.index.len();
        if n == 0 {
            return Err(GuidingError::InvalidTopology("octree has no root".to_string()));
        }
        if self.rank.len() != n {
            return Err(GuidingError::ShapeMismatch {
                name: "stree_rank",
                expected: vec![n],
                found: vec![self.rank.len()],
            });
        }
        for (node, &first) in self.index.iter().enumerate() {
            if first == 0 {
                continue;
            }
            let first = first as usize;
            if first <= node || first + 8 > n {
                return Err(GuidingError::InvalidTopology(format!(
                    "octree node {node} has children at {first}..{} of {n} nodes",
                    first + 8
                )));
            }
            for o in 0..8 {
                if self.rank[first + o] as usize != o {
                    return Err(GuidingError::InvalidTopology(format!(
                        "octree node {} has rank {}, expected {o}",
                        first + o,
                        self.rank[first + o]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns the leaf node containing a point.
    ///
    /// * `bounds` - Scene bounds covered by the root.
    /// * `p`      - The point.
    pub fn locate(&self, bounds: &Bounds3f, p: &Point3f) -> usize {
        octree_locate(&self.index, bounds, p)
    }
}

/// Returns the leaf of a flattened octree containing a point. Descent stops
/// at a leaf, at a backward child link or at a child index outside the array.
///
/// * `index`  - First child of each node, or 0 for a leaf.
/// * `bounds` - Scene bounds covered by the root.
/// * `p`      - The point.
pub fn octree_locate(index: &[u32], bounds: &Bounds3f, p: &Point3f) -> usize {
    let mut node = 0;
    let mut b = *bounds;
    while let Some(&first) = index.get(node) {
        if first == 0 || first as usize <= node {
            break;
        }
        let (o, child) = octant(&b, p);
        let next = first as usize + o;
        if next >= index.len() {
            break;
        }
        node = next;
        b = child;
    }
    node
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
