//! BSP tree construction and traversal

use std::cmp::Reverse;

use crate::bsp::node::{BspNode, LeafNode, SplitKind, SplitNode};
use crate::bsp::partitioner::SpacePartitioner;
use crate::bsp::visitor::LeafVisitor;
use crate::bsp::{TraversalOrder, TreeSpace};
use crate::core::types::{UVec3, Vec3};
use crate::core::{Error, Result};
use crate::math::{Aabb, Axis, VoxelBox};
use crate::volume::{Brick, VolumeDesc};

/// Allowed deviation of the weight sum from 1.0
pub const LOAD_BALANCE_EPSILON: f32 = 1e-5;

/// Equal shares for `count` leaves
pub fn default_load_balance(count: usize) -> Vec<f32> {
    vec![1.0 / count.max(1) as f32; count]
}

/// Check that weights are in (0, 1] and sum to 1 within tolerance.
pub fn validate_load_balance(weights: &[f32]) -> Result<()> {
    if weights.is_empty() {
        return Err(Error::NoLeaves);
    }
    let sum: f32 = weights.iter().sum();
    let in_range = weights.iter().all(|&w| w > 0.0 && w <= 1.0);
    if !in_range || (sum - 1.0).abs() > LOAD_BALANCE_EPSILON {
        return Err(Error::InvalidLoadBalance {
            sum,
            count: weights.len(),
        });
    }
    Ok(())
}

/// Node of the share hierarchy built before any bricks are split
#[derive(Debug)]
enum ShareNode {
    Leaf { id: usize, share: f32 },
    Split { share: f32, left: Box<ShareNode>, right: Box<ShareNode> },
}

impl ShareNode {
    /// Halve `ids` recursively, the left side taking `ceil(n / 2)`.
    fn build(weights: &[f32], first_id: usize) -> ShareNode {
        if weights.len() == 1 {
            return ShareNode::Leaf {
                id: first_id,
                share: weights[0],
            };
        }
        let mid = weights.len().div_ceil(2);
        let left = ShareNode::build(&weights[..mid], first_id);
        let right = ShareNode::build(&weights[mid..], first_id + mid);
        ShareNode::Split {
            share: left.share() + right.share(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn share(&self) -> f32 {
        match self {
            ShareNode::Leaf { share, .. } | ShareNode::Split { share, .. } => *share,
        }
    }
}

/// Binary space partitioning tree with one leaf per render worker
#[derive(Clone, Debug)]
pub struct BspTree {
    root: BspNode,
    leaf_count: usize,
    weights: Vec<f32>,
    space: TreeSpace,
}

impl BspTree {
    /// Balanced-leaf construction over a voxel grid.
    ///
    /// Leaf `i` is cut off the remaining box along its longest side with
    /// relative fraction `w[i] / sum(w[i..])`. `weights` defaults to equal
    /// shares.
    pub fn balanced(dims: UVec3, num_leaves: usize, weights: Option<&[f32]>) -> Result<Self> {
        Self::build_balanced_tree(dims, num_leaves, weights, None)
    }

    /// Balanced-leaf construction that keeps bricks whole.
    ///
    /// Split planes move to the brick boundary nearest the balanced
    /// position, so every brick lies entirely inside the leaf that holds
    /// it. When a box has no interior brick boundary its whole region goes
    /// to the left leaf and the rest of the subtree stays empty. Without
    /// bricks this is the same as [`BspTree::balanced`].
    pub fn balanced_for_bricks(
        dims: UVec3,
        num_leaves: usize,
        weights: Option<&[f32]>,
        bricks: Vec<Brick>,
    ) -> Result<Self> {
        let lines = (!bricks.is_empty()).then(|| grid_lines(&bricks));
        let mut tree = Self::build_balanced_tree(dims, num_leaves, weights, lines.as_ref())?;
        tree.assign_bricks(bricks);
        Ok(tree)
    }

    fn build_balanced_tree(
        dims: UVec3,
        num_leaves: usize,
        weights: Option<&[f32]>,
        grid: Option<&GridLines>,
    ) -> Result<Self> {
        if num_leaves == 0 {
            return Err(Error::NoLeaves);
        }
        let weights = match weights {
            Some(w) => w.to_vec(),
            None => default_load_balance(num_leaves),
        };
        validate_load_balance(&weights)?;
        if weights.len() != num_leaves {
            return Err(Error::InvalidLoadBalance {
                sum: weights.iter().sum(),
                count: weights.len(),
            });
        }

        let root = build_balanced(VoxelBox::from_dims(dims), &weights, 0, grid);
        log::info!(
            "Built balanced BSP tree: {} leaves over {}x{}x{} voxels{}",
            num_leaves,
            dims.x,
            dims.y,
            dims.z,
            if grid.is_some() { " (brick aligned)" } else { "" }
        );

        Ok(Self {
            root,
            leaf_count: num_leaves,
            weights,
            space: TreeSpace::Voxel,
        })
    }

    /// Hierarchical halving over a brick inventory.
    ///
    /// The weight list is halved recursively into a share hierarchy; the
    /// space partitioner then splits the bricks top-down by each node's
    /// relative child shares. Bounds live in object space.
    pub fn hierarchical(bricks: Vec<Brick>, weights: &[f32]) -> Result<Self> {
        validate_load_balance(weights)?;

        let shares = ShareNode::build(weights, 0);
        let partitioner = SpacePartitioner::new();
        let brick_count = bricks.len();
        let root = build_hierarchical(&shares, bricks, &partitioner);

        log::info!(
            "Built hierarchical BSP tree: {} leaves over {} bricks",
            weights.len(), brick_count
        );

        Ok(Self {
            root,
            leaf_count: weights.len(),
            weights: weights.to_vec(),
            space: TreeSpace::Object,
        })
    }

    pub fn root(&self) -> &BspNode {
        &self.root
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn space(&self) -> TreeSpace {
        self.space
    }

    /// Leaves in id order
    pub fn leaves(&self) -> Vec<&LeafNode> {
        self.root.leaves()
    }

    pub fn leaf(&self, id: usize) -> Option<&LeafNode> {
        self.root.leaves().into_iter().find(|l| l.id == id)
    }

    /// Leaf whose region contains `point` (tree space)
    pub fn locate_leaf(&self, point: Vec3) -> &LeafNode {
        self.root.locate(point)
    }

    /// Distribute a brick inventory over the leaves by brick center.
    /// Replaces any bricks the leaves held before.
    pub fn assign_bricks(&mut self, bricks: Vec<Brick>) {
        for leaf in self.root.leaves_mut() {
            leaf.bricks.clear();
        }
        let space = self.space;
        for brick in bricks {
            let point = match space {
                TreeSpace::Voxel => brick.voxels.center(),
                TreeSpace::Object => brick.center(),
            };
            self.root.locate_mut(point).bricks.push(brick);
        }
        for leaf in self.root.leaves() {
            log::debug!("Leaf {} holds {} bricks", leaf.id, leaf.bricks.len());
        }
    }

    /// Object-space bounds of a leaf
    pub fn leaf_object_bounds(&self, id: usize, volume: &VolumeDesc) -> Option<Aabb> {
        let leaf = self.leaf(id)?;
        Some(match (self.space, leaf.voxels) {
            (TreeSpace::Voxel, Some(voxels)) => volume.object_box(&voxels),
            _ => leaf.bounds,
        })
    }

    /// Convert an object-space eye position into this tree's space
    pub fn eye_in_tree_space(&self, eye: Vec3, volume: &VolumeDesc) -> Vec3 {
        match self.space {
            TreeSpace::Voxel => volume.voxel_coords(eye),
            TreeSpace::Object => eye,
        }
    }

    /// Visit every leaf in visibility order for `eye` (tree space)
    pub fn traverse(&self, eye: Vec3, order: TraversalOrder, visitor: &mut LeafVisitor<'_>) {
        self.for_each_leaf_ordered(eye, order, |leaf| visitor.visit(leaf));
    }

    /// Call `f` on every leaf in visibility order for `eye` (tree space)
    pub fn for_each_leaf_ordered<F>(&self, eye: Vec3, order: TraversalOrder, mut f: F)
    where
        F: FnMut(&LeafNode),
    {
        visit_node(&self.root, eye, order, &mut f);
    }

    /// Leaf ids in visibility order
    pub fn visit_order(&self, eye: Vec3, order: TraversalOrder) -> Vec<usize> {
        let mut ids = Vec::with_capacity(self.leaf_count);
        self.for_each_leaf_ordered(eye, order, |leaf| ids.push(leaf.id));
        ids
    }
}

/// Brick boundary coordinates per axis, sorted and deduplicated
type GridLines = [Vec<u32>; 3];

fn grid_lines(bricks: &[Brick]) -> GridLines {
    let mut lines = GridLines::default();
    for brick in bricks {
        for (i, axis_lines) in lines.iter_mut().enumerate() {
            axis_lines.push(brick.voxels.min[i]);
            axis_lines.push(brick.voxels.max[i]);
        }
    }
    for axis_lines in &mut lines {
        axis_lines.sort_unstable();
        axis_lines.dedup();
    }
    lines
}

/// Axis and absolute position of the plane cutting `fraction` off `voxels`
fn balanced_plane(voxels: &VoxelBox, fraction: f32, grid: Option<&GridLines>) -> (Axis, u32) {
    let size = voxels.size();
    let target = |axis: Axis| {
        let i = axis.index();
        voxels.min[i] + (size[i] as f32 * fraction).floor() as u32
    };
    let (longest, _) = voxels.longest_side();
    let Some(grid) = grid else {
        return (longest, target(longest));
    };

    let mut axes = Axis::ALL;
    axes.sort_by_key(|a| Reverse(size[a.index()]));
    for axis in axes {
        let i = axis.index();
        let nearest = grid[i]
            .iter()
            .copied()
            .filter(|&line| line > voxels.min[i] && line < voxels.max[i])
            .min_by_key(|&line| line.abs_diff(target(axis)));
        if let Some(position) = nearest {
            return (axis, position);
        }
    }
    (longest, voxels.max[longest.index()])
}

fn build_balanced(voxels: VoxelBox, weights: &[f32], id: usize, grid: Option<&GridLines>) -> BspNode {
    let share: f32 = weights.iter().sum();
    if weights.len() == 1 {
        let mut leaf = LeafNode::new(id, voxels.to_aabb(), share);
        leaf.voxels = Some(voxels);
        return BspNode::Leaf(leaf);
    }

    let fraction = weights[0] / share;
    let (axis, position) = balanced_plane(&voxels, fraction, grid);
    let (lower, upper) = voxels.split(axis, position);
    log::trace!("Leaf {id}: split {axis:?} at voxel {position} (fraction {fraction:.3})");

    let mut left = LeafNode::new(id, lower.to_aabb(), weights[0]);
    left.voxels = Some(lower);
    let right = build_balanced(upper, &weights[1..], id + 1, grid);

    BspNode::Split(SplitNode {
        kind: SplitKind::LoadBalance,
        axis,
        position: position as f32,
        bounds: voxels.to_aabb(),
        share,
        actual_percent: None,
        left: Box::new(BspNode::Leaf(left)),
        right: Box::new(right),
    })
}

fn build_hierarchical(shares: &ShareNode, bricks: Vec<Brick>, partitioner: &SpacePartitioner) -> BspNode {
    let bounds = bricks.iter().fold(Aabb::EMPTY, |acc, b| acc.union(&b.bounds));
    match shares {
        ShareNode::Leaf { id, share } => {
            let mut leaf = LeafNode::new(*id, bounds, *share);
            leaf.bricks = bricks;
            BspNode::Leaf(leaf)
        }
        ShareNode::Split { share, left, right } => {
            let percent = [100.0 * left.share() / share, 100.0 * right.share() / share];
            let result = partitioner.split(bricks, percent);
            let actual = result.actual_percent();
            BspNode::Split(SplitNode {
                kind: SplitKind::HalfSpace,
                axis: result.axis,
                position: result.position,
                bounds,
                share: *share,
                actual_percent: Some(actual),
                left: Box::new(build_hierarchical(left, result.first, partitioner)),
                right: Box::new(build_hierarchical(right, result.second, partitioner)),
            })
        }
    }
}

fn visit_node<F>(node: &BspNode, eye: Vec3, order: TraversalOrder, f: &mut F)
where
    F: FnMut(&LeafNode),
{
    match node {
        BspNode::Leaf(leaf) => {
            log::trace!("Visit leaf {}", leaf.id);
            f(leaf);
        }
        BspNode::Split(split) => {
            let near_is_left = split.eye_in_left(eye);
            let (first, second) = match (order, near_is_left) {
                (TraversalOrder::BackToFront, true) | (TraversalOrder::FrontToBack, false) => {
                    (&split.right, &split.left)
                }
                (TraversalOrder::BackToFront, false) | (TraversalOrder::FrontToBack, true) => {
                    (&split.left, &split.right)
                }
            };
            visit_node(first, eye, order, f);
            visit_node(second, eye, order, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::make_bricks;

    #[test]
    fn test_weights_validation() {
        assert!(validate_load_balance(&[0.5, 0.5]).is_ok());
        assert!(validate_load_balance(&[0.25, 0.25, 0.25, 0.25]).is_ok());
        assert!(matches!(validate_load_balance(&[]), Err(Error::NoLeaves)));
        assert!(matches!(
            validate_load_balance(&[0.5, 0.4]),
            Err(Error::InvalidLoadBalance { count: 2, .. })
        ));
        assert!(validate_load_balance(&[1.5, -0.5]).is_err());
        assert!(validate_load_balance(&[1.0, 0.0]).is_err());
    }

    #[test]
    fn test_balanced_leaf_ids() {
        let weights = [0.1, 0.2, 0.3, 0.4];
        let tree = BspTree::balanced(UVec3::new(64, 32, 16), 4, Some(&weights)).unwrap();
        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.root().leaf_count(), 4);
        let ids: Vec<usize> = tree.leaves().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);

        let total: u64 = tree
            .leaves()
            .iter()
            .filter_map(|l| l.voxels)
            .map(|v| v.voxel_count())
            .sum();
        assert_eq!(total, 64 * 32 * 16);
    }

    #[test]
    fn test_invalid_sum_fails() {
        let result = BspTree::balanced(UVec3::splat(8), 2, Some(&[0.5, 0.6]));
        assert!(matches!(result, Err(Error::InvalidLoadBalance { .. })));
        assert!(matches!(BspTree::balanced(UVec3::splat(8), 0, None), Err(Error::NoLeaves)));
        assert!(BspTree::balanced(UVec3::splat(8), 3, Some(&[0.5, 0.5])).is_err());
    }

    #[test]
    fn test_two_by_two_split() {
        let tree = BspTree::balanced(UVec3::splat(2), 2, None).unwrap();
        let leaves = tree.leaves();
        assert_eq!(
            leaves[0].voxels,
            Some(VoxelBox::new(UVec3::ZERO, UVec3::new(1, 2, 2)))
        );
        assert_eq!(
            leaves[1].voxels,
            Some(VoxelBox::new(UVec3::new(1, 0, 0), UVec3::splat(2)))
        );
    }

    #[test]
    fn test_back_to_front_two_leaves() {
        let tree = BspTree::balanced(UVec3::splat(2), 2, None).unwrap();
        // eye on the low-x side: leaf 0 is nearest, so it comes last
        let eye = Vec3::new(-5.0, 1.0, 1.0);
        assert_eq!(tree.visit_order(eye, TraversalOrder::BackToFront), vec![1, 0]);
        assert_eq!(tree.visit_order(eye, TraversalOrder::FrontToBack), vec![0, 1]);

        let eye = Vec3::new(7.0, 1.0, 1.0);
        assert_eq!(tree.visit_order(eye, TraversalOrder::BackToFront), vec![0, 1]);
    }

    #[test]
    fn test_traversal_is_repeatable() {
        let tree = BspTree::balanced(UVec3::new(40, 30, 20), 5, None).unwrap();
        let eye = Vec3::new(13.0, -4.0, 50.0);
        let first = tree.visit_order(eye, TraversalOrder::BackToFront);
        let second = tree.visit_order(eye, TraversalOrder::BackToFront);
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);

        let mut reversed = tree.visit_order(eye, TraversalOrder::FrontToBack);
        reversed.reverse();
        assert_eq!(first, reversed);
    }

    #[test]
    fn test_assign_bricks_partitions_inventory() {
        let volume = VolumeDesc::new(UVec3::new(32, 16, 16));
        let bricks = make_bricks(&volume, 8);
        let count = bricks.len();
        let mut tree = BspTree::balanced(volume.dims, 3, None).unwrap();
        tree.assign_bricks(bricks);

        let mut seen: Vec<usize> = tree
            .leaves()
            .iter()
            .flat_map(|l| l.bricks.iter().map(|b| b.index))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..count).collect::<Vec<_>>());
        for leaf in tree.leaves() {
            let voxels = leaf.voxels.unwrap();
            for brick in &leaf.bricks {
                assert!(voxels.to_aabb().contains(brick.voxels.center()));
            }
        }
    }

    #[test]
    fn test_brick_aligned_leaves_hold_whole_bricks() {
        let volume = VolumeDesc::new(UVec3::new(16, 8, 8));
        let bricks = make_bricks(&volume, 4);
        let count = bricks.len();
        let tree = BspTree::balanced_for_bricks(volume.dims, 3, None, bricks).unwrap();

        let boxes: Vec<VoxelBox> = tree.leaves().iter().filter_map(|l| l.voxels).collect();
        assert_eq!(boxes[0], VoxelBox::new(UVec3::ZERO, UVec3::new(4, 8, 8)));
        assert_eq!(boxes[1], VoxelBox::new(UVec3::new(4, 0, 0), UVec3::new(8, 8, 8)));
        assert_eq!(boxes[2], VoxelBox::new(UVec3::new(8, 0, 0), UVec3::new(16, 8, 8)));

        let mut held = 0;
        for leaf in tree.leaves() {
            let voxels = leaf.voxels.unwrap();
            for brick in &leaf.bricks {
                assert_eq!(voxels.intersect(&brick.voxels), brick.voxels, "brick {} leaks out of leaf {}", brick.index, leaf.id);
            }
            held += leaf.bricks.len();
        }
        assert_eq!(held, count);
    }

    #[test]
    fn test_brick_aligned_without_interior_boundary() {
        let volume = VolumeDesc::new(UVec3::new(12, 8, 4));
        let bricks = make_bricks(&volume, 16);
        assert_eq!(bricks.len(), 1);
        let tree = BspTree::balanced_for_bricks(volume.dims, 2, None, bricks).unwrap();
        let leaves = tree.leaves();
        assert_eq!(leaves[0].bricks.len(), 1);
        assert_eq!(leaves[0].voxels, Some(VoxelBox::from_dims(volume.dims)));
        assert!(leaves[1].is_empty());
        assert_eq!(leaves[1].voxels.map(|v| v.voxel_count()), Some(0));
    }

    #[test]
    fn test_hierarchical_tree() {
        let volume = VolumeDesc::new(UVec3::new(32, 32, 32));
        let bricks = make_bricks(&volume, 8);
        let count = bricks.len();
        let weights = default_load_balance(4);
        let tree = BspTree::hierarchical(bricks, &weights).unwrap();

        assert_eq!(tree.leaf_count(), 4);
        assert_eq!(tree.space(), TreeSpace::Object);
        let leaves = tree.leaves();
        let ids: Vec<usize> = leaves.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        for leaf in &leaves {
            assert_eq!(leaf.bricks.len(), count / 4);
        }
        if let BspNode::Split(root) = tree.root() {
            assert_eq!(root.kind, SplitKind::HalfSpace);
            let actual = root.actual_percent.unwrap();
            assert!((actual[0] - 50.0).abs() < 1e-3);
        } else {
            panic!("expected split root");
        }

        // every leaf holds the bricks on its side of the planes
        let eye = Vec3::new(100.0, 3.0, -7.0);
        let order = tree.visit_order(eye, TraversalOrder::BackToFront);
        assert_eq!(order.len(), 4);
        assert_eq!(*order.last().unwrap(), tree.locate_leaf(Vec3::new(15.0, 3.0, -7.0)).id);
    }

    #[test]
    fn test_hierarchical_odd_count() {
        let volume = VolumeDesc::new(UVec3::new(24, 8, 8));
        let bricks = make_bricks(&volume, 8);
        let tree = BspTree::hierarchical(bricks, &default_load_balance(3)).unwrap();
        let counts: Vec<usize> = tree.leaves().iter().map(|l| l.bricks.len()).collect();
        assert_eq!(counts, vec![1, 1, 1]);
    }

    #[test]
    fn test_single_leaf_and_empty_leaves() {
        let tree = BspTree::balanced(UVec3::splat(4), 1, None).unwrap();
        assert!(tree.root().is_leaf());
        assert_eq!(tree.visit_order(Vec3::ZERO, TraversalOrder::BackToFront), vec![0]);

        let tree = BspTree::hierarchical(Vec::new(), &[0.5, 0.5]).unwrap();
        assert!(tree.leaves().iter().all(|l| l.is_empty() && l.bounds.is_empty()));
    }

    #[test]
    fn test_leaf_object_bounds() {
        let volume = VolumeDesc::new(UVec3::splat(2));
        let tree = BspTree::balanced(volume.dims, 2, None).unwrap();
        let bounds = tree.leaf_object_bounds(0, &volume).unwrap();
        assert_eq!(bounds, Aabb::new(Vec3::splat(-1.0), Vec3::new(0.0, 1.0, 1.0)));
        assert_eq!(tree.eye_in_tree_space(Vec3::ZERO, &volume), Vec3::ONE);
        assert!(tree.leaf_object_bounds(9, &volume).is_none());
    }
}
