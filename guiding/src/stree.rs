//! Spatial Binary Tree
//!
//! Adaptive binary partition of the scene volume. Every node is a state; the
//! sampler records into leaves and the tree grows where samples concentrate.
//! Children are stored in pairs after their parent, the lower half of the
//! split first.

use crate::buffers::*;
use crate::error::*;
use common::geometry::*;
use common::pbrt::*;

/// `stree_axis` value of a leaf.
pub const LEAF_AXIS: u32 = 3;

/// `stree_parent` value of the root and of unused slots.
pub const NO_NODE: u32 = u32::MAX;

/// Returns the leaf of a flat binary tree containing a point. Descent only
/// follows valid child links.
///
/// * `child`  - First child of each node.
/// * `axis`   - Split axis of each node, `LEAF_AXIS` for leaves.
/// * `bounds` - Scene bounds covered by the root.
/// * `p`      - The point.
pub fn binary_tree_locate(child: &[u32], axis: &[u32], bounds: &Bounds3f, p: &Point3f) -> usize {
    let mut node = 0;
    let mut b = *bounds;
    while let (Some(&a), Some(&first)) = (axis.get(node), child.get(node)) {
        let Ok(a) = Axis::try_from(a) else {
            break;
        };
        let first = first as usize;
        if first <= node || first + 1 >= child.len() {
            break;
        }
        let (lower, upper) = b.split(a);
        if p[a] >= lower.p_max[a] {
            node = first + 1;
            b = upper;
        } else {
            node = first;
            b = lower;
        }
    }
    node
}

/// A node of the spatial tree.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpatialNode {
    /// Extent of the node.
    pub bounds: Bounds3f,

    /// Split axis, or `None` for a leaf.
    pub axis: Option<Axis>,

    /// Index of the lower child; the upper child follows it.
    pub child: u32,

    /// Index of the parent, `NO_NODE` for the root.
    pub parent: u32,

    /// Samples recorded in the node.
    pub visits: u32,
}

impl SpatialNode {
    fn leaf(bounds: Bounds3f, parent: u32, visits: u32) -> Self {
        Self {
            bounds,
            axis: None,
            child: 0,
            parent,
            visits,
        }
    }

    /// Returns true if the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.axis.is_none()
    }
}

/// One leaf split performed by `SpatialTree::refine()`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Split {
    /// The leaf that was split.
    pub parent: usize,

    /// Lower and upper child.
    pub children: [usize; 2],

    /// Visits of the parent when it was split.
    pub parent_visits: u32,

    /// Visits handed to each child.
    pub child_visits: [u32; 2],
}

/// Outcome of `SpatialTree::refine()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefineReport {
    /// Splits in the order they were made.
    pub splits: Vec<Split>,

    /// Splits skipped because the tree was full.
    pub clamped: usize,
}

/// Adaptive binary partition of the scene volume.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialTree {
    bounds: Bounds3f,
    nodes: Vec<SpatialNode>,
    capacity: usize,
    k: Float,
}

impl SpatialTree {
    /// Returns a tree whose root covers the scene.
    ///
    /// * `bounds`   - Scene bounds.
    /// * `capacity` - Maximum number of nodes.
    /// * `k`        - Fitting exponent of the split criterion.
    pub fn new(bounds: Bounds3f, capacity: usize, k: Float) -> Result<Self> {
        if capacity == 0 {
            return Err(GuidingError::Configuration(
                "spatial tree capacity must be positive".to_string(),
            ));
        }
        if bounds.is_degenerate() {
            return Err(GuidingError::Configuration(format!(
                "spatial tree bounds {bounds} have no volume"
            )));
        }
        let mut nodes = Vec::with_capacity(capacity);
        nodes.push(SpatialNode::leaf(bounds, NO_NODE, 0));
        Ok(Self {
            bounds,
            nodes,
            capacity,
            k,
        })
    }

    /// Returns the scene bounds.
    pub fn bounds(&self) -> &Bounds3f {
        &self.bounds
    }

    /// Returns the maximum number of nodes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree has no nodes; never the case once built.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the nodes.
    pub fn nodes(&self) -> &[SpatialNode] {
        &self.nodes
    }

    /// Returns the indices of the leaves.
    pub fn leaves(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.iter().enumerate().filter(|(_, n)| n.is_leaf()).map(|(i, _)| i)
    }

    /// Returns the leaf containing a point; points outside the scene land in
    /// the nearest leaf.
    ///
    /// * `p` - The point.
    pub fn locate(&self, p: &Point3f) -> usize {
        let mut node = 0;
        while let Some(axis) = self.nodes[node].axis {
            let lower = self.nodes[node].child as usize;
            node = if p[axis] >= self.nodes[lower].bounds.p_max[axis] {
                lower + 1
            } else {
                lower
            };
        }
        node
    }

    /// Adds visits to a node.
    ///
    /// * `node`  - The node.
    /// * `count` - Number of visits.
    pub fn add_visits(&mut self, node: usize, count: u32) {
        let v = &mut self.nodes[node].visits;
        *v = v.saturating_add(count);
    }

    /// Clears every visit counter.
    pub fn reset_visits(&mut self) {
        self.nodes.iter_mut().for_each(|n| n.visits = 0);
    }

    /// Splits every current leaf whose visits exceed `threshold · 2^(k/2)`
    /// at the midpoint of its longest axis. The children share the parent's
    /// visits; the parent keeps its own count. Leaves created here are not
    /// considered again until the next call.
    ///
    /// * `threshold` - Base visit threshold.
    pub fn refine(&mut self, threshold: Float) -> RefineReport {
        let limit = threshold * (2.0 as Float).powf(0.5 * self.k);
        let leaves: Vec<usize> = self.leaves().collect();
        let mut report = RefineReport::default();

        for leaf in leaves {
            let node = self.nodes[leaf];
            if node.visits as Float <= limit {
                continue;
            }
            if self.nodes.len() + 2 > self.capacity {
                report.clamped += 1;
                continue;
            }

            let axis = node.bounds.maximum_extent();
            let (lower, upper) = node.bounds.split(axis);
            let half = node.visits / 2;
            let child_visits = [half, node.visits - half];
            let first = self.nodes.len();
            self.nodes.push(SpatialNode::leaf(lower, leaf as u32, child_visits[0]));
            self.nodes.push(SpatialNode::leaf(upper, leaf as u32, child_visits[1]));
            self.nodes[leaf].axis = Some(axis);
            self.nodes[leaf].child = first as u32;

            debug!(
                "Split spatial node {} along {}: {} visits -> {} + {}",
                leaf, axis, node.visits, child_visits[0], child_visits[1]
            );
            report.splits.push(Split {
                parent: leaf,
                children: [first, first + 1],
                parent_visits: node.visits,
                child_visits,
            });
        }

        if report.clamped > 0 {
            warn!(
                "Spatial tree full at {} nodes; skipped {} splits",
                self.capacity, report.clamped
            );
        }
        report
    }

    /// Writes the whole tree into the sampler buffers. Slots beyond the
    /// current size are written as unused leaves.
    ///
    /// * `buffers` - The sampler buffers.
    pub fn copy_to_external(&self, buffers: &mut GuidingBuffers) -> Result<()> {
        let shape = [self.capacity];
        let mut visits = vec![0; self.capacity];
        let mut child = vec![0; self.capacity];
        let mut parent = vec![NO_NODE; self.capacity];
        let mut axis = vec![LEAF_AXIS; self.capacity];
        for (i, n) in self.nodes.iter().enumerate() {
            visits[i] = n.visits;
            child[i] = n.child;
            parent[i] = n.parent;
            axis[i] = n.axis.map_or(LEAF_AXIS, u32::from);
        }
        buffers.stree_visit_count.write(&shape, &visits)?;
        buffers.stree_child.write(&shape, &child)?;
        buffers.stree_parent.write(&shape, &parent)?;
        buffers.stree_axis.write(&shape, &axis)?;
        buffers.stree_current_size = self.nodes.len() as u32;
        Ok(())
    }

    /// Replaces the tree with the one held by the sampler buffers, rebuilding
    /// node bounds from the split axes.
    ///
    /// * `buffers` - The sampler buffers.
    pub fn copy_from_external(&mut self, buffers: &GuidingBuffers) -> Result<()> {
        let shape = [self.capacity];
        let mut visits = vec![0; self.capacity];
        let mut child = vec![0; self.capacity];
        let mut parent = vec![0; self.capacity];
        let mut axis = vec![0; self.capacity];
        buffers.stree_visit_count.read(&shape, &mut visits)?;
        buffers.stree_child.read(&shape, &mut child)?;
        buffers.stree_parent.read(&shape, &mut parent)?;
        buffers.stree_axis.read(&shape, &mut axis)?;

        let size = buffers.stree_current_size as usize;
        if size == 0 || size > self.capacity {
            return Err(GuidingError::InvalidTopology(format!(
                "spatial tree size {size} outside 1..={}",
                self.capacity
            )));
        }

        let mut nodes: Vec<SpatialNode> = Vec::with_capacity(self.capacity);
        nodes.push(SpatialNode::leaf(self.bounds, NO_NODE, visits[0]));
        for i in 1..size {
            nodes.push(SpatialNode::leaf(Bounds3f::default(), NO_NODE, visits[i]));
        }
        let mut reached = vec![false; size];
        reached[0] = true;

        for i in 0..size {
            if !reached[i] {
                return Err(GuidingError::InvalidTopology(format!(
                    "spatial node {i} is not reachable from the root"
                )));
            }
            if axis[i] == LEAF_AXIS {
                continue;
            }
            let a = Axis::try_from(axis[i])
                .map_err(|raw| GuidingError::InvalidTopology(format!("spatial node {i} has axis {raw}")))?;
            let first = child[i] as usize;
            if first <= i || first + 1 >= size {
                return Err(GuidingError::InvalidTopology(format!(
                    "spatial node {i} has children at {first}..{} of {size} nodes",
                    first.saturating_add(2)
                )));
            }
            if parent[first] as usize != i || parent[first + 1] as usize != i {
                return Err(GuidingError::InvalidTopology(format!(
                    "spatial nodes {first} and {} do not name {i} as parent",
                    first + 1
                )));
            }
            let (lower, upper) = nodes[i].bounds.split(a);
            nodes[i].axis = Some(a);
            nodes[i].child = first as u32;
            for (c, b) in [(first, lower), (first + 1, upper)] {
                nodes[c].bounds = b;
                nodes[c].parent = i as u32;
                reached[c] = true;
            }
        }

        self.nodes = nodes;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::*;
    use proptest::prelude::*;

    fn unit() -> Bounds3f {
        Bounds3f::new(Point3f::zero(), Point3f::new(1.0, 1.0, 1.0))
    }

    fn buffers_for(capacity: usize) -> GuidingBuffers {
        let mut b = GuidingBuffers::empty();
        b.stree_visit_count = Buffer::zeros("stree_visit_count", &[capacity]);
        b.stree_child = Buffer::zeros("stree_child", &[capacity]);
        b.stree_parent = Buffer::zeros("stree_parent", &[capacity]);
        b.stree_axis = Buffer::zeros("stree_axis", &[capacity]);
        b
    }

    #[test]
    fn new_tree_is_single_leaf() {
        let t = SpatialTree::new(unit(), 16, 2.0).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.leaves().collect::<Vec<_>>(), vec![0]);
        assert_eq!(t.locate(&Point3f::new(0.9, 0.1, 0.4)), 0);
    }

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        assert!(matches!(
            SpatialTree::new(unit(), 0, 2.0),
            Err(GuidingError::Configuration(_))
        ));
    }

    #[test]
    fn split_requires_visits_above_scaled_threshold() {
        // k = 2 doubles the threshold.
        let mut t = SpatialTree::new(unit(), 16, 2.0).unwrap();
        t.add_visits(0, 200);
        assert!(t.refine(100.0).splits.is_empty());
        t.add_visits(0, 1);
        let r = t.refine(100.0);
        assert_eq!(r.splits.len(), 1);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn split_halves_visits_and_longest_axis() {
        let b = Bounds3f::new(Point3f::zero(), Point3f::new(1.0, 4.0, 2.0));
        let mut t = SpatialTree::new(b, 16, 0.0).unwrap();
        t.add_visits(0, 7);
        let r = t.refine(1.0);
        let s = r.splits[0];
        assert_eq!(s.parent_visits, 7);
        assert_eq!(s.child_visits, [3, 4]);
        assert_eq!(t.nodes()[0].axis, Some(Axis::Y));
        assert_eq!(t.nodes()[0].visits, 7);
        assert!(approx_eq!(f32, t.nodes()[1].bounds.p_max.y, 2.0, ulps = 2));
        assert!(approx_eq!(f32, t.nodes()[2].bounds.p_min.y, 2.0, ulps = 2));
        assert_eq!(t.locate(&Point3f::new(0.5, 1.0, 1.0)), 1);
        assert_eq!(t.locate(&Point3f::new(0.5, 3.0, 1.0)), 2);
    }

    #[test]
    fn new_children_wait_for_the_next_refine() {
        let mut t = SpatialTree::new(unit(), 16, 0.0).unwrap();
        t.add_visits(0, 100);
        assert_eq!(t.refine(1.0).splits.len(), 1);
        assert_eq!(t.refine(1.0).splits.len(), 2);
    }

    #[test]
    fn full_tree_clamps() {
        let mut t = SpatialTree::new(unit(), 2, 0.0).unwrap();
        t.add_visits(0, 100);
        let r = t.refine(1.0);
        assert!(r.splits.is_empty());
        assert_eq!(r.clamped, 1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn tree_round_trips_through_buffers() {
        let mut t = SpatialTree::new(unit(), 8, 0.0).unwrap();
        t.add_visits(0, 100);
        t.refine(1.0);
        t.refine(1.0);
        let mut b = buffers_for(8);
        t.copy_to_external(&mut b).unwrap();
        assert_eq!(b.stree_current_size, 7);
        assert_eq!(b.stree_parent.data()[0], NO_NODE);
        assert_eq!(b.stree_axis.data()[3], LEAF_AXIS);

        let mut back = SpatialTree::new(unit(), 8, 0.0).unwrap();
        back.copy_from_external(&b).unwrap();
        assert_eq!(back, t);
        for &p in &[Point3f::new(0.1, 0.2, 0.3), Point3f::new(0.8, 0.9, 0.1), Point3f::new(0.6, 0.1, 0.9)] {
            let leaf = back.locate(&p);
            assert_eq!(binary_tree_locate(b.stree_child.data(), b.stree_axis.data(), &unit(), &p), leaf);
        }
    }

    #[test]
    fn copy_to_unsized_buffers_fails() {
        let t = SpatialTree::new(unit(), 8, 0.0).unwrap();
        let mut b = GuidingBuffers::empty();
        assert!(matches!(
            t.copy_to_external(&mut b),
            Err(GuidingError::MissingBuffer("stree_visit_count"))
        ));
    }

    #[test]
    fn backward_child_link_is_rejected() {
        let mut t = SpatialTree::new(unit(), 8, 0.0).unwrap();
        t.add_visits(0, 100);
        t.refine(1.0);
        t.refine(1.0);
        let mut b = buffers_for(8);
        t.copy_to_external(&mut b).unwrap();
        b.stree_child.data_mut()[1] = 0;
        assert!(matches!(
            t.copy_from_external(&b),
            Err(GuidingError::InvalidTopology(_))
        ));
    }

    proptest! {
        #[test]
        fn splits_conserve_mass_and_leaves_tile_the_scene(
            rounds in prop::collection::vec(prop::collection::vec(0u32..500, 32), 1..5),
        ) {
            let mut t = SpatialTree::new(unit(), 32, 2.0).unwrap();
            for visits in rounds {
                let leaves: Vec<usize> = t.leaves().collect();
                for (leaf, v) in leaves.into_iter().zip(visits) {
                    t.add_visits(leaf, v);
                }
                let r = t.refine(50.0);
                for s in &r.splits {
                    prop_assert_eq!(s.child_visits[0] + s.child_visits[1], s.parent_visits);
                    prop_assert!(s.children[0] > s.parent);
                }
                prop_assert!(t.len() <= 32);

                let volume: Float = t.leaves().map(|l| t.nodes()[l].bounds.volume()).sum();
                prop_assert!(approx_eq!(f32, volume, 1.0, epsilon = 1e-4));
                for l in t.leaves() {
                    let c = t.nodes()[l].bounds.centroid();
                    prop_assert_eq!(t.locate(&c), l);
                }
                t.reset_visits();
            }
        }
    }
}
