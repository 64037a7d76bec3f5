//! Geometric primitives for space partitioning

pub mod aabb;
pub mod voxel_box;
pub mod rect;

pub use aabb::Aabb;
pub use voxel_box::VoxelBox;
pub use rect::Rect;

use serde::{Deserialize, Serialize};

/// Coordinate axis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in tie-breaking order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Component index (x=0, y=1, z=2)
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Axis from component index
    pub fn from_index(index: usize) -> Option<Axis> {
        Self::ALL.get(index).copied()
    }
}
