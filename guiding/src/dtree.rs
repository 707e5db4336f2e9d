//! Directional Quadtree
//!
//! A piecewise-constant approximation of the radiance arriving at one spatial
//! state, stored as an adaptive quadtree over the unit square of a direction
//! mapping. The tree lives in four flat fixed-capacity arrays so it can be
//! copied to and from the external sampler unchanged:
//!
//! * `index`  - First of the node's 4 contiguous children, or `LEAF`.
//! * `rank`   - Quadrant of the node within its parent,
//!              `(x >= 0.5) | (y >= 0.5) << 1`.
//! * `depth`  - Depth of the node; the root has depth 0.
//! * `select` - Parent of the node; the root is its own parent.
//!
//! Nodes are stored breadth first so children always follow their parent.
//! Entries at or beyond the current size hold `INVALID_NODE`. The matching
//! row of the radiance table holds, after each update, every node's share of
//! the total energy.

use crate::error::*;
use common::geometry::*;
use common::pbrt::*;
use common::rng::ONE_MINUS_EPSILON;
use common::sampling::DirectionalMapping;
use std::collections::VecDeque;
use std::ops::AddAssign;

/// Marks array entries beyond the current size of a tree.
pub const INVALID_NODE: u32 = u32::MAX;

/// `index` value of a leaf.
pub const LEAF: u32 = 0;

/// Floor added to leaf values so that every leaf keeps some energy.
const VALUE_FLOOR: Float = 1e-6;

/// Returns the fraction of the unit square covered by a node at `depth`.
///
/// * `depth` - Node depth.
#[inline]
pub fn node_area(depth: u32) -> Float {
    (0.25 as Float).powi(depth as i32)
}

/// Counters describing one or more directional tree updates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeUpdateStats {
    /// Total nodes across the updated trees.
    pub nodes: usize,

    /// Leaves subdivided.
    pub splits: usize,

    /// Sibling groups collapsed into their parent.
    pub merges: usize,

    /// Splits skipped because the tree was full.
    pub clamped: usize,
}

impl AddAssign for TreeUpdateStats {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.splits += other.splits;
        self.merges += other.merges;
        self.clamped += other.clamped;
    }
}

/// A direction drawn from a guiding distribution.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GuidedSample {
    /// Action (grid cell or quadtree leaf) containing the direction.
    pub action: usize,

    /// Unit direction.
    pub direction: Vector3f,

    /// Solid angle density of the direction.
    pub pdf: Float,
}

/// Adaptive quadtree over directions for one spatial state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectionalTree {
    index: Vec<u32>,
    rank: Vec<u32>,
    depth: Vec<u32>,
    select: Vec<u32>,
    size: usize,
    max_depth: u32,
}

impl DirectionalTree {
    /// Returns a tree holding only the root.
    ///
    /// * `capacity`  - Fixed number of node slots; at least 1.
    /// * `max_depth` - Nodes at this depth never subdivide.
    pub fn new(capacity: usize, max_depth: u32) -> Self {
        debug_assert!(capacity > 0);
        let mut tree = Self {
            index: vec![INVALID_NODE; capacity],
            rank: vec![INVALID_NODE; capacity],
            depth: vec![INVALID_NODE; capacity],
            select: vec![INVALID_NODE; capacity],
            size: 1,
            max_depth,
        };
        tree.index[0] = LEAF;
        tree.rank[0] = 0;
        tree.depth[0] = 0;
        tree.select[0] = 0;
        tree
    }

    /// Returns a tree read from flat layout arrays, checking that they form a
    /// breadth-first quadtree of `size` nodes.
    ///
    /// * `index`     - First child of each node.
    /// * `rank`      - Quadrant of each node.
    /// * `depth`     - Depth of each node.
    /// * `select`    - Parent of each node.
    /// * `size`      - Number of valid nodes.
    /// * `max_depth` - Nodes at this depth never subdivide.
    pub fn from_layout(
        index: &[u32],
        rank: &[u32],
        depth: &[u32],
        select: &[u32],
        size: usize,
        max_depth: u32,
    ) -> Result<Self> {
        let capacity = index.len();
        for (name, len) in [("dtree_rank", rank.len()), ("dtree_depth", depth.len()), ("dtree_select", select.len())] {
            if len != capacity {
                return Err(GuidingError::ShapeMismatch {
                    name,
                    expected: vec![capacity],
                    found: vec![len],
                });
            }
        }
        if size == 0 || size > capacity {
            return Err(GuidingError::InvalidTopology(format!(
                "quadtree size {size} outside 1..={capacity}"
            )));
        }
        if depth[0] != 0 {
            return Err(GuidingError::InvalidTopology("quadtree root has non-zero depth".to_string()));
        }
        let mut reached = vec![false; size];
        reached[0] = true;
        for node in 0..size {
            if !reached[node] {
                return Err(GuidingError::InvalidTopology(format!(
                    "quadtree node {node} has no parent linking to it"
                )));
            }
            let first = index[node];
            if first == LEAF {
                continue;
            }
            let first = first as usize;
            if first <= node || first + 4 > size {
                return Err(GuidingError::InvalidTopology(format!(
                    "quadtree node {node} has children at {first}..{} of {size} nodes",
                    first.saturating_add(4)
                )));
            }
            for q in 0..4 {
                let child = first + q;
                if select[child] as usize != node || rank[child] as usize != q || depth[child] != depth[node] + 1 {
                    return Err(GuidingError::InvalidTopology(format!(
                        "quadtree node {child} does not match its parent {node}"
                    )));
                }
                reached[child] = true;
            }
        }

        let mut tree = Self {
            index: index.to_vec(),
            rank: rank.to_vec(),
            depth: depth.to_vec(),
            select: select.to_vec(),
            size,
            max_depth,
        };
        tree.invalidate_tail();
        Ok(tree)
    }

    /// Copies the layout into flat arrays of the same capacity.
    ///
    /// * `index`  - Receives the first child of each node.
    /// * `rank`   - Receives the quadrant of each node.
    /// * `depth`  - Receives the depth of each node.
    /// * `select` - Receives the parent of each node.
    pub fn write_layout(&self, index: &mut [u32], rank: &mut [u32], depth: &mut [u32], select: &mut [u32]) -> Result<()> {
        for (name, dst, src) in [
            ("dtree_index", index, &self.index),
            ("dtree_rank", rank, &self.rank),
            ("dtree_depth", depth, &self.depth),
            ("dtree_select", select, &self.select),
        ] {
            if dst.len() != src.len() {
                return Err(GuidingError::ShapeMismatch {
                    name,
                    expected: vec![src.len()],
                    found: vec![dst.len()],
                });
            }
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    /// Returns the fixed number of node slots.
    pub fn capacity(&self) -> usize {
        self.index.len()
    }

    /// Returns the number of valid nodes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the first child of every node slot.
    pub fn index(&self) -> &[u32] {
        &self.index
    }

    /// Returns the quadrant of every node slot.
    pub fn rank(&self) -> &[u32] {
        &self.rank
    }

    /// Returns the depth of every node slot.
    pub fn depth(&self) -> &[u32] {
        &self.depth
    }

    /// Returns the parent of every node slot.
    pub fn select(&self) -> &[u32] {
        &self.select
    }

    /// Returns true if `node` is a valid leaf.
    ///
    /// * `node` - Node slot.
    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.size && self.index[node] == LEAF
    }

    /// Recomputes node energies from leaf values, merges sibling groups whose
    /// share of the energy fell below a quarter of `threshold`, subdivides
    /// visited leaves whose share exceeds `threshold` and writes the new
    /// breadth-first layout. `values` is rewritten with every node's share of
    /// the total energy; entries beyond the new size are set to 0.
    ///
    /// * `values`    - Per-node values; only leaves are read.
    /// * `visits`    - Per-node visit counts of the last window.
    /// * `threshold` - Energy share above which a leaf subdivides.
    pub fn update(&mut self, values: &mut [Float], visits: &[u32], threshold: Float) -> TreeUpdateStats {
        debug_assert_eq!(values.len(), self.capacity());
        debug_assert_eq!(visits.len(), self.capacity());
        let n = self.size;

        // Children follow parents, so a reverse walk sees children first.
        let mut energy = vec![0.0 as Float; n];
        for node in (0..n).rev() {
            let first = self.index[node];
            energy[node] = if first == LEAF {
                let v = values[node];
                let v = if v.is_finite() && v > 0.0 { v } else { 0.0 };
                (v + VALUE_FLOOR) * node_area(self.depth[node])
            } else {
                let first = first as usize;
                energy[first..first + 4].iter().sum()
            };
        }
        let total = energy[0];

        let mut stats = TreeUpdateStats::default();

        // Merge sibling groups of leaves that carry too little energy.
        let mut collapse = vec![false; n];
        for node in 0..n {
            let first = self.index[node];
            if first == LEAF {
                continue;
            }
            let first = first as usize;
            let children_are_leaves = (first..first + 4).all(|c| self.index[c] == LEAF);
            if children_are_leaves && energy[node] / total < 0.25 * threshold {
                collapse[node] = true;
                stats.merges += 1;
            }
        }

        // Split leaves that carry too much, shallowest first.
        let mut split = vec![false; n];
        let mut retained = n - 4 * stats.merges;
        for node in 0..n {
            if self.index[node] != LEAF || (node > 0 && collapse[self.select[node] as usize]) {
                continue;
            }
            if energy[node] / total <= threshold || self.depth[node] >= self.max_depth || visits[node] == 0 {
                continue;
            }
            if retained + 4 > self.capacity() {
                stats.clamped += 1;
                continue;
            }
            split[node] = true;
            retained += 4;
            stats.splits += 1;
        }
        if stats.clamped > 0 {
            debug!(
                "Directional tree full at {} nodes; skipped {} splits",
                self.capacity(),
                stats.clamped
            );
        }

        // Rebuild breadth first. Slots are handed out in queue order, so each
        // group of children lands on the next 4 free slots.
        struct Pending {
            old: Option<usize>,
            energy: Float,
            depth: u32,
            parent: u32,
            rank: u32,
        }

        let capacity = self.capacity();
        let mut index = vec![INVALID_NODE; capacity];
        let mut rank = vec![INVALID_NODE; capacity];
        let mut depth = vec![INVALID_NODE; capacity];
        let mut select = vec![INVALID_NODE; capacity];

        let mut queue = VecDeque::with_capacity(retained);
        queue.push_back(Pending {
            old: Some(0),
            energy: total,
            depth: 0,
            parent: 0,
            rank: 0,
        });
        let mut slot = 0;
        let mut next_free = 1;
        while let Some(p) = queue.pop_front() {
            let me = slot;
            slot += 1;
            rank[me] = p.rank;
            depth[me] = p.depth;
            select[me] = p.parent;
            values[me] = p.energy / total;

            let children: Option<[(Option<usize>, Float); 4]> = match p.old {
                Some(old) if self.index[old] != LEAF && !collapse[old] => {
                    let first = self.index[old] as usize;
                    Some([0, 1, 2, 3].map(|q| (Some(first + q), energy[first + q])))
                }
                Some(old) if self.index[old] == LEAF && split[old] => Some([(None, 0.25 * p.energy); 4]),
                _ => None,
            };

            match children {
                Some(children) => {
                    index[me] = next_free as u32;
                    next_free += 4;
                    for (q, (old, e)) in children.into_iter().enumerate() {
                        queue.push_back(Pending {
                            old,
                            energy: e,
                            depth: p.depth + 1,
                            parent: me as u32,
                            rank: q as u32,
                        });
                    }
                }
                None => index[me] = LEAF,
            }
        }
        debug_assert_eq!(slot, retained);

        for v in values.iter_mut().skip(slot) {
            *v = 0.0;
        }
        self.index = index;
        self.rank = rank;
        self.depth = depth;
        self.select = select;
        self.size = slot;

        stats.nodes = slot;
        stats
    }

    /// Returns the leaf containing a direction.
    ///
    /// * `mapping` - Direction mapping of the tree's unit square.
    /// * `d`       - The unit direction.
    pub fn leaf_index(&self, mapping: DirectionalMapping, d: &Vector3f) -> usize {
        quadtree_leaf(&self.index, &mapping.direction_to_square(d)).0
    }

    /// Returns the solid angle density of a direction given the tree's
    /// energy shares.
    ///
    /// * `mapping` - Direction mapping of the tree's unit square.
    /// * `d`       - The unit direction.
    /// * `values`  - Per-node energy shares.
    pub fn query(&self, mapping: DirectionalMapping, d: &Vector3f, values: &[Float]) -> Float {
        let leaf = self.leaf_index(mapping, d);
        quadtree_density(&self.depth, values, leaf)
    }

    /// Samples a direction proportionally to node energy, uniformly within the
    /// selected leaf.
    ///
    /// * `mapping` - Direction mapping of the tree's unit square.
    /// * `u`       - Uniform sample.
    /// * `values`  - Per-node energy shares.
    pub fn sample(&self, mapping: DirectionalMapping, u: &Point2f, values: &[Float]) -> GuidedSample {
        quadtree_sample(&self.index, &self.depth, values, mapping, u)
    }

    /// Overwrites entries at or beyond the current size with `INVALID_NODE`.
    fn invalidate_tail(&mut self) {
        let size = self.size;
        for array in [&mut self.index, &mut self.rank, &mut self.depth, &mut self.select] {
            for v in array.iter_mut().skip(size) {
                *v = INVALID_NODE;
            }
        }
    }
}

/// Returns the leaf of a flat quadtree containing a point on the unit square
/// and the point's position within that leaf. Descent only follows valid
/// child links.
///
/// * `index` - First child of each node.
/// * `p`     - Point on the unit square.
pub fn quadtree_leaf(index: &[u32], p: &Point2f) -> (usize, Point2f) {
    let mut node = 0;
    let mut p = p.saturate();
    while let Some(&first) = index.get(node) {
        if first == LEAF || first == INVALID_NODE {
            break;
        }
        if first as usize <= node {
            break;
        }
        let qx = usize::from(p.x >= 0.5);
        let qy = usize::from(p.y >= 0.5);
        let child = first as usize + (qx | qy << 1);
        if child >= index.len() {
            break;
        }
        p = Point2f::new(2.0 * p.x - qx as Float, 2.0 * p.y - qy as Float).saturate();
        node = child;
    }
    (node, p)
}

/// Returns the solid angle density of a node given per-node energy shares.
/// A tree without energy is uniform over the sphere.
///
/// * `depth`  - Depth of each node.
/// * `values` - Per-node energy shares.
/// * `node`   - A leaf.
pub fn quadtree_density(depth: &[u32], values: &[Float], node: usize) -> Float {
    let root = values.first().copied().unwrap_or(0.0);
    if !(root > 0.0 && root.is_finite()) {
        return INV_FOUR_PI;
    }
    match (values.get(node), depth.get(node)) {
        (Some(&v), Some(&d)) if d != INVALID_NODE => max(v, 0.0) / root / node_area(d) * INV_FOUR_PI,
        _ => INV_FOUR_PI,
    }
}

/// Chooses between two weights and remaps the sample into the chosen part.
fn pick(a: Float, b: Float, u: Float) -> (usize, Float) {
    let total = a + b;
    let p = if total > 0.0 { a / total } else { 0.5 };
    if u < p {
        (0, min(u / p, ONE_MINUS_EPSILON))
    } else {
        (1, min((u - p) / (1.0 - p), ONE_MINUS_EPSILON))
    }
}

/// Samples a flat quadtree. Each level first picks a column by the energy of
/// its two quadrants and then a quadrant within the column.
///
/// * `index`   - First child of each node.
/// * `depth`   - Depth of each node.
/// * `values`  - Per-node energy shares.
/// * `mapping` - Direction mapping of the tree's unit square.
/// * `u`       - Uniform sample.
pub fn quadtree_sample(
    index: &[u32],
    depth: &[u32],
    values: &[Float],
    mapping: DirectionalMapping,
    u: &Point2f,
) -> GuidedSample {
    let mut node = 0;
    let mut u = *u;
    let mut origin = Point2f::zero();
    let mut scale: Float = 1.0;
    while let Some(&first) = index.get(node) {
        if first == LEAF || first == INVALID_NODE {
            break;
        }
        let first = first as usize;
        if first <= node || first + 4 > index.len() || first + 4 > values.len() {
            break;
        }
        let e = |q: usize| max(values[first + q], 0.0);
        let (qx, ux) = pick(e(0) + e(2), e(1) + e(3), u.x);
        let (qy, uy) = pick(e(qx), e(qx + 2), u.y);

        origin = origin + (0.5 * scale) * Point2f::new(qx as Float, qy as Float);
        scale *= 0.5;
        u = Point2f::new(ux, uy);
        node = first + (qx | qy << 1);
    }

    let direction = mapping.square_to_direction(&(origin + scale * u));
    GuidedSample {
        action: node,
        direction,
        pdf: quadtree_density(depth, values, node),
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

    const MAPPING: DirectionalMapping = DirectionalMapping::EqualArea;

    /// Root with 4 children; the last child split once more.
    fn two_level(capacity: usize) -> DirectionalTree {
        let mut index = vec![INVALID_NODE; capacity];
        let mut rank = vec![INVALID_NODE; capacity];
        let mut depth = vec![INVALID_NODE; capacity];
        let mut select = vec![INVALID_NODE; capacity];
        let layout = [
            (1, 0, 0, 0),
            (LEAF, 0, 1, 0),
            (LEAF, 1, 1, 0),
            (LEAF, 2, 1, 0),
            (5, 3, 1, 0),
            (LEAF, 0, 2, 4),
            (LEAF, 1, 2, 4),
            (LEAF, 2, 2, 4),
            (LEAF, 3, 2, 4),
        ];
        for (n, &(i, r, d, s)) in layout.iter().enumerate() {
            index[n] = i;
            rank[n] = r;
            depth[n] = d;
            select[n] = s;
        }
        DirectionalTree::from_layout(&index, &rank, &depth, &select, 9, 12).unwrap()
    }

    fn leaf_share_sum(tree: &DirectionalTree, values: &[Float]) -> Float {
        (0..tree.size()).filter(|&n| tree.is_leaf(n)).map(|n| values[n]).sum()
    }

    #[test]
    fn new_tree_is_root_only_at_full_capacity() {
        let t = DirectionalTree::new(16, 12);
        assert_eq!(t.capacity(), 16);
        assert_eq!(t.size(), 1);
        assert!(t.is_leaf(0));
        for array in [t.index(), t.rank(), t.depth(), t.select()] {
            assert_eq!(array.len(), 16);
            assert!(array[1..].iter().all(|&v| v == INVALID_NODE));
        }
    }

    #[test]
    fn visited_root_splits_into_quarters() {
        let mut t = DirectionalTree::new(16, 12);
        let mut values = vec![0.0; 16];
        let mut visits = vec![0; 16];
        values[0] = 2.0;
        visits[0] = 5;
        let stats = t.update(&mut values, &visits, 0.01);
        assert_eq!(stats.splits, 1);
        assert_eq!(t.size(), 5);
        assert_eq!(t.index()[0], 1);
        assert!(approx_eq!(f32, values[0], 1.0, epsilon = 1e-6));
        for q in 0..4 {
            assert_eq!(t.rank()[1 + q], q as u32);
            assert_eq!(t.depth()[1 + q], 1);
            assert_eq!(t.select()[1 + q], 0);
            assert!(approx_eq!(f32, values[1 + q], 0.25, epsilon = 1e-6));
        }
        assert!(values[5..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn unvisited_leaves_do_not_split() {
        let mut t = DirectionalTree::new(16, 12);
        let mut values = vec![1.0; 16];
        let stats = t.update(&mut values, &[0; 16], 0.01);
        assert_eq!(stats.splits, 0);
        assert_eq!(t.size(), 1);
    }

    #[test]
    fn max_depth_bounds_subdivision() {
        let mut t = DirectionalTree::new(16, 0);
        let mut values = vec![1.0; 16];
        t.update(&mut values, &[1; 16], 0.01);
        assert_eq!(t.size(), 1);
    }

    #[test]
    fn full_tree_clamps_instead_of_growing() {
        let mut t = DirectionalTree::new(5, 12);
        let mut values = vec![1.0; 5];
        t.update(&mut values, &[1; 5], 0.01);
        assert_eq!(t.size(), 5);

        let mut values = vec![1.0; 5];
        let stats = t.update(&mut values, &[1; 5], 0.01);
        assert_eq!(t.size(), 5);
        assert_eq!(stats.splits, 0);
        assert_eq!(stats.clamped, 4);
    }

    #[test]
    fn dark_sibling_group_merges_into_parent() {
        let mut t = two_level(16);
        let mut values = vec![0.0; 16];
        values[1] = 10.0;
        values[2] = 10.0;
        values[3] = 10.0;
        let stats = t.update(&mut values, &[0; 16], 0.01);
        assert_eq!(stats.merges, 1);
        assert_eq!(t.size(), 5);
        assert!(t.is_leaf(4));
        assert!(t.index()[5..].iter().all(|&v| v == INVALID_NODE));
        assert!(approx_eq!(f32, leaf_share_sum(&t, &values), 1.0, epsilon = 1e-5));
    }

    #[test]
    fn layout_round_trips_through_flat_arrays() {
        let t = two_level(12);
        let mut index = vec![0; 12];
        let mut rank = vec![0; 12];
        let mut depth = vec![0; 12];
        let mut select = vec![0; 12];
        t.write_layout(&mut index, &mut rank, &mut depth, &mut select).unwrap();
        let back = DirectionalTree::from_layout(&index, &rank, &depth, &select, 9, 12).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn layout_with_wrong_parent_is_rejected() {
        let t = two_level(12);
        let mut select = t.select().to_vec();
        select[6] = 2;
        let r = DirectionalTree::from_layout(t.index(), t.rank(), t.depth(), &select, 9, 12);
        assert!(matches!(r, Err(GuidingError::InvalidTopology(_))));
    }

    #[test]
    fn layout_with_unreachable_slot_is_rejected() {
        let mut t = DirectionalTree::new(8, 12);
        let mut values = vec![1.0; 8];
        t.update(&mut values, &[1; 8], 0.01);
        assert_eq!(t.size(), 5);

        // Slot 5 claims the root as parent but the root links only to 1..=4.
        let mut index = t.index().to_vec();
        let mut rank = t.rank().to_vec();
        let mut depth = t.depth().to_vec();
        let mut select = t.select().to_vec();
        index[5] = LEAF;
        rank[5] = 0;
        depth[5] = 1;
        select[5] = 0;
        let r = DirectionalTree::from_layout(&index, &rank, &depth, &select, 6, 12);
        assert!(matches!(r, Err(GuidingError::InvalidTopology(_))));
    }

    #[test]
    fn write_layout_rejects_short_arrays() {
        let t = DirectionalTree::new(8, 12);
        let mut short = vec![0; 4];
        let mut rank = vec![0; 8];
        let mut depth = vec![0; 8];
        let mut select = vec![0; 8];
        let r = t.write_layout(&mut short, &mut rank, &mut depth, &mut select);
        assert!(matches!(r, Err(GuidingError::ShapeMismatch { .. })));
    }

    #[test]
    fn query_of_root_only_tree_is_uniform() {
        let t = DirectionalTree::new(8, 12);
        let values = vec![1.0; 8];
        let d = Vector3f::new(0.0, 0.0, 1.0);
        assert!(approx_eq!(f32, t.query(MAPPING, &d, &values), INV_FOUR_PI, epsilon = 1e-6));
        let zeros = vec![0.0; 8];
        assert!(approx_eq!(f32, t.query(MAPPING, &d, &zeros), INV_FOUR_PI, epsilon = 1e-6));
    }

    #[test]
    fn query_follows_bright_quadrant() {
        let mut t = DirectionalTree::new(16, 12);
        let mut values = vec![1.0; 16];
        t.update(&mut values, &[1; 16], 0.01);
        // Quadrant 0 carries 70% of the energy.
        values[1] = 0.7;
        values[2] = 0.1;
        values[3] = 0.1;
        values[4] = 0.1;
        let bright = MAPPING.square_to_direction(&Point2f::new(0.25, 0.25));
        let dim = MAPPING.square_to_direction(&Point2f::new(0.75, 0.75));
        assert_eq!(t.leaf_index(MAPPING, &bright), 1);
        assert_eq!(t.leaf_index(MAPPING, &dim), 4);
        assert!(approx_eq!(f32, t.query(MAPPING, &bright, &values), 0.7 * 4.0 * INV_FOUR_PI, epsilon = 1e-5));
        assert!(approx_eq!(f32, t.query(MAPPING, &dim, &values), 0.1 * 4.0 * INV_FOUR_PI, epsilon = 1e-5));
    }

    #[test]
    fn sample_returns_leaf_with_matching_density() {
        let mut t = DirectionalTree::new(16, 12);
        let mut values = vec![1.0; 16];
        t.update(&mut values, &[1; 16], 0.01);
        values[1] = 0.7;
        values[2] = 0.1;
        values[3] = 0.1;
        values[4] = 0.1;
        for &(x, y) in &[(0.1, 0.1), (0.5, 0.9), (0.95, 0.2), (0.99, 0.99)] {
            let s = t.sample(MAPPING, &Point2f::new(x, y), &values);
            assert!(t.is_leaf(s.action));
            assert_eq!(t.leaf_index(MAPPING, &s.direction), s.action);
            assert!(approx_eq!(f32, s.pdf, t.query(MAPPING, &s.direction, &values), epsilon = 1e-5));
        }
    }

    #[test]
    fn leaf_lookup_ignores_invalid_links() {
        let index = [1, LEAF, LEAF];
        assert_eq!(quadtree_leaf(&index, &Point2f::new(0.9, 0.9)).0, 0);
    }

    #[test]
    fn backward_child_links_stop_descent() {
        // Node 1 links back to the root, which would otherwise cycle.
        let index = [1, 0, LEAF, LEAF, LEAF];
        assert_eq!(quadtree_leaf(&index, &Point2f::new(0.1, 0.1)).0, 1);
        let depth = [0, 1, 1, 1, 1];
        let values = [1.0, 0.25, 0.25, 0.25, 0.25];
        let s = quadtree_sample(&index, &depth, &values, MAPPING, &Point2f::new(0.1, 0.1));
        assert_eq!(s.action, 1);
    }

    proptest! {
        #[test]
        fn repeated_updates_respect_capacity_and_order(
            capacity in 1usize..64,
            rows in prop::collection::vec(prop::collection::vec((0.0f32..10.0, 0u32..4), 64), 1..6),
        ) {
            let mut t = DirectionalTree::new(capacity, 6);
            let mut values = vec![0.0; capacity];
            for row in rows {
                for (n, &(v, _)) in row.iter().take(capacity).enumerate() {
                    values[n] = v;
                }
                let visits: Vec<u32> = row.iter().take(capacity).map(|&(_, c)| c).collect();
                t.update(&mut values, &visits, 0.01);

                prop_assert!(t.size() >= 1 && t.size() <= capacity);
                for n in 0..t.size() {
                    let first = t.index()[n];
                    if first != LEAF {
                        prop_assert!(first as usize > n);
                        prop_assert!(first as usize + 4 <= t.size());
                    }
                }
                for n in t.size()..capacity {
                    prop_assert_eq!(t.index()[n], INVALID_NODE);
                    prop_assert_eq!(t.depth()[n], INVALID_NODE);
                    prop_assert_eq!(values[n], 0.0);
                }
                prop_assert!(approx_eq!(f32, leaf_share_sum(&t, &values), 1.0, epsilon = 1e-4));
            }
        }
    }
}
