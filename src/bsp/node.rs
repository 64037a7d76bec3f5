//! BSP node types: one tagged node, leaves own bricks, splits own two children.

use crate::core::types::Vec3;
use crate::math::{Aabb, Axis, VoxelBox};
use crate::volume::Brick;

/// How a split node separates its children
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SplitKind {
    /// Geometric split at an absolute voxel coordinate (balanced-leaf trees)
    LoadBalance,
    /// Axis plane chosen by the space partitioner (hierarchical trees)
    HalfSpace,
}

/// Leaf: a group of bricks rendered by one worker
#[derive(Clone, Debug)]
pub struct LeafNode {
    /// Unique id, `0..leaf_count` from left to right
    pub id: usize,
    /// Extent in tree space
    pub bounds: Aabb,
    /// Voxel extent, for trees built in voxel space
    pub voxels: Option<VoxelBox>,
    /// Requested fraction of the total workload
    pub share: f32,
    /// Bricks owned by this leaf
    pub bricks: Vec<Brick>,
}

impl LeafNode {
    pub fn new(id: usize, bounds: Aabb, share: f32) -> Self {
        Self {
            id,
            bounds,
            voxels: None,
            share,
            bricks: Vec::new(),
        }
    }

    /// True if the leaf renders nothing
    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }

    /// Clip a probe box to this leaf's bounds. May be empty.
    pub fn clip_probe(&self, probe: &Aabb) -> Aabb {
        probe.intersect(&self.bounds)
    }
}

/// Internal node with exactly two children. `left` is the lower side.
#[derive(Clone, Debug)]
pub struct SplitNode {
    pub kind: SplitKind,
    pub axis: Axis,
    /// Plane coordinate along `axis`, in tree space
    pub position: f32,
    pub bounds: Aabb,
    /// Summed share of all leaves below
    pub share: f32,
    /// Shares the partitioner actually achieved, in percent (half-space only)
    pub actual_percent: Option<[f32; 2]>,
    pub left: Box<BspNode>,
    pub right: Box<BspNode>,
}

impl SplitNode {
    /// True if the eye lies in the left child's half-space.
    pub fn eye_in_left(&self, eye: Vec3) -> bool {
        match self.kind {
            SplitKind::LoadBalance => {
                // Grow the left box to infinity on every side it shares
                // with the parent; what remains is its half-space.
                let left = self.left.bounds();
                let mut half_space = left;
                for i in 0..3 {
                    if left.min[i] == self.bounds.min[i] {
                        half_space.min[i] = f32::NEG_INFINITY;
                    }
                    if left.max[i] == self.bounds.max[i] {
                        half_space.max[i] = f32::INFINITY;
                    }
                }
                half_space.contains(eye)
            }
            SplitKind::HalfSpace => eye[self.axis.index()] < self.position,
        }
    }
}

/// Node of the BSP tree
#[derive(Clone, Debug)]
pub enum BspNode {
    Leaf(LeafNode),
    Split(SplitNode),
}

impl BspNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self, BspNode::Leaf(_))
    }

    pub fn bounds(&self) -> Aabb {
        match self {
            BspNode::Leaf(leaf) => leaf.bounds,
            BspNode::Split(split) => split.bounds,
        }
    }

    pub fn share(&self) -> f32 {
        match self {
            BspNode::Leaf(leaf) => leaf.share,
            BspNode::Split(split) => split.share,
        }
    }

    /// Number of leaves in this subtree
    pub fn leaf_count(&self) -> usize {
        match self {
            BspNode::Leaf(_) => 1,
            BspNode::Split(split) => split.left.leaf_count() + split.right.leaf_count(),
        }
    }

    /// Depth of the subtree; a lone leaf has depth 1
    pub fn depth(&self) -> usize {
        match self {
            BspNode::Leaf(_) => 1,
            BspNode::Split(split) => 1 + split.left.depth().max(split.right.depth()),
        }
    }

    /// Leaves from left to right
    pub fn leaves(&self) -> Vec<&LeafNode> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a LeafNode>) {
        match self {
            BspNode::Leaf(leaf) => out.push(leaf),
            BspNode::Split(split) => {
                split.left.collect_leaves(out);
                split.right.collect_leaves(out);
            }
        }
    }

    /// Leaves from left to right, mutable
    pub fn leaves_mut(&mut self) -> Vec<&mut LeafNode> {
        let mut out = Vec::new();
        self.collect_leaves_mut(&mut out);
        out
    }

    fn collect_leaves_mut<'a>(&'a mut self, out: &mut Vec<&'a mut LeafNode>) {
        match self {
            BspNode::Leaf(leaf) => out.push(leaf),
            BspNode::Split(split) => {
                split.left.collect_leaves_mut(out);
                split.right.collect_leaves_mut(out);
            }
        }
    }

    /// Leaf whose region contains `point`, descending by split planes.
    /// Every point maps to exactly one leaf.
    pub fn locate_mut(&mut self, point: Vec3) -> &mut LeafNode {
        match self {
            BspNode::Leaf(leaf) => leaf,
            BspNode::Split(split) => {
                if point[split.axis.index()] < split.position {
                    split.left.locate_mut(point)
                } else {
                    split.right.locate_mut(point)
                }
            }
        }
    }

    /// Shared-reference version of [`BspNode::locate_mut`]
    pub fn locate(&self, point: Vec3) -> &LeafNode {
        match self {
            BspNode::Leaf(leaf) => leaf,
            BspNode::Split(split) => {
                if point[split.axis.index()] < split.position {
                    split.left.locate(point)
                } else {
                    split.right.locate(point)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_leaf_split(kind: SplitKind) -> SplitNode {
        let bounds = Aabb::new(Vec3::ZERO, Vec3::new(4.0, 2.0, 2.0));
        let (lo, hi) = bounds.split(Axis::X, 1.0);
        SplitNode {
            kind,
            axis: Axis::X,
            position: 1.0,
            bounds,
            share: 1.0,
            actual_percent: None,
            left: Box::new(BspNode::Leaf(LeafNode::new(0, lo, 0.25))),
            right: Box::new(BspNode::Leaf(LeafNode::new(1, hi, 0.75))),
        }
    }

    #[test]
    fn test_eye_side_agrees_between_kinds() {
        let lb = two_leaf_split(SplitKind::LoadBalance);
        let hs = two_leaf_split(SplitKind::HalfSpace);
        let eyes = [
            Vec3::new(0.5, 1.0, 1.0),
            Vec3::new(-10.0, 50.0, -3.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(3.0, -7.0, 9.0),
        ];
        for eye in eyes {
            assert_eq!(lb.eye_in_left(eye), hs.eye_in_left(eye), "eye {eye:?}");
        }
        assert!(lb.eye_in_left(eyes[1]));
        assert!(!lb.eye_in_left(eyes[2]));
    }

    #[test]
    fn test_leaf_bookkeeping() {
        let node = BspNode::Split(two_leaf_split(SplitKind::HalfSpace));
        assert!(!node.is_leaf());
        assert_eq!(node.leaf_count(), 2);
        assert_eq!(node.depth(), 2);
        let ids: Vec<usize> = node.leaves().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(node.locate(Vec3::new(0.2, 0.0, 0.0)).id, 0);
        assert_eq!(node.locate(Vec3::new(1.0, 0.0, 0.0)).id, 1);
    }

    #[test]
    fn test_clip_probe() {
        let leaf = LeafNode::new(0, Aabb::new(Vec3::ZERO, Vec3::ONE), 1.0);
        let probe = Aabb::new(Vec3::splat(0.5), Vec3::splat(3.0));
        assert_eq!(leaf.clip_probe(&probe), Aabb::new(Vec3::splat(0.5), Vec3::ONE));
        assert!(leaf.clip_probe(&Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0))).is_empty());
    }
}
