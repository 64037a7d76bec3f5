//! Binary space partitioning over bricks
//!
//! The tree assigns disjoint groups of bricks to leaves (one leaf per render
//! worker) and yields the leaves in visibility order for a given eye point,
//! which is what sort-last compositing needs.

pub mod node;
pub mod partitioner;
pub mod tree;
pub mod visitor;

pub use node::{BspNode, LeafNode, SplitKind, SplitNode};
pub use partitioner::{BrickGrid, PartitionResult, SpacePartitioner};
pub use tree::{BspTree, LOAD_BALANCE_EPSILON, default_load_balance, validate_load_balance};
pub use visitor::{DirectRenderer, LeafVisitor, OutlineCollector, SortLastCompositor};

/// Order in which leaves (or bricks) are visited relative to the eye
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TraversalOrder {
    /// Farthest first; the order for "over" compositing
    #[default]
    BackToFront,
    /// Nearest first; for "under" compositing and depth-only passes
    FrontToBack,
}

/// Coordinate space the tree's bounds and split planes live in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TreeSpace {
    /// Voxel coordinates of the volume (balanced-leaf trees)
    Voxel,
    /// Object coordinates of the bricks (hierarchical trees)
    Object,
}
