//! Axis-aligned box in integer voxel coordinates

use serde::{Deserialize, Serialize};

use crate::core::types::{UVec3, Vec3};
use crate::math::{Aabb, Axis};

/// Voxel-space box, `min` inclusive and `max` exclusive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoxelBox {
    pub min: UVec3,
    pub max: UVec3,
}

impl VoxelBox {
    /// Create from two corners, ordering them per axis
    pub fn new(a: UVec3, b: UVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Box spanning a whole volume of the given dimensions
    pub fn from_dims(dims: UVec3) -> Self {
        Self::new(UVec3::ZERO, dims)
    }

    pub fn size(&self) -> UVec3 {
        self.max.saturating_sub(self.min)
    }

    pub fn center(&self) -> Vec3 {
        (self.min.as_vec3() + self.max.as_vec3()) * 0.5
    }

    /// Number of voxels covered
    pub fn voxel_count(&self) -> u64 {
        let s = self.size();
        s.x as u64 * s.y as u64 * s.z as u64
    }

    /// True if min exceeds max on any axis
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Half-open containment test
    pub fn contains(&self, p: UVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    /// Componentwise intersection; may be empty
    pub fn intersect(&self, other: &VoxelBox) -> VoxelBox {
        VoxelBox {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    pub fn union(&self, other: &VoxelBox) -> VoxelBox {
        VoxelBox {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Longest extent; ties go to the lowest axis
    pub fn longest_side(&self) -> (Axis, u32) {
        let size = self.size();
        let mut best = (Axis::X, size.x);
        for axis in [Axis::Y, Axis::Z] {
            if size[axis.index()] > best.1 {
                best = (axis, size[axis.index()]);
            }
        }
        best
    }

    /// Split at an absolute voxel coordinate, clamped to the box
    pub fn split(&self, axis: Axis, position: u32) -> (VoxelBox, VoxelBox) {
        let i = axis.index();
        let position = position.clamp(self.min[i], self.max[i]);

        let mut lower = *self;
        let mut upper = *self;
        lower.max[i] = position;
        upper.min[i] = position;
        (lower, upper)
    }

    /// Same box as floats, in voxel units
    pub fn to_aabb(&self) -> Aabb {
        Aabb {
            min: self.min.as_vec3(),
            max: self.max.as_vec3(),
        }
    }
}
