//! Volume descriptor: voxel grid and its placement in object space

use serde::{Deserialize, Serialize};

use crate::core::types::{UVec3, Vec3};
use crate::math::{Aabb, VoxelBox};

/// Voxel dimensions plus the voxel-to-object transform.
///
/// The volume is centered on `position`; each voxel spans `dist` object units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolumeDesc {
    /// Voxel count per axis
    pub dims: UVec3,
    /// Object-space size of one voxel
    pub dist: Vec3,
    /// Object-space center of the volume
    pub position: Vec3,
    /// Number of time steps
    pub frames: usize,
}

impl VolumeDesc {
    /// Unit voxels, centered at the origin, single frame
    pub fn new(dims: UVec3) -> Self {
        Self {
            dims,
            dist: Vec3::ONE,
            position: Vec3::ZERO,
            frames: 1,
        }
    }

    pub fn with_dist(mut self, dist: Vec3) -> Self {
        self.dist = dist;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames.max(1);
        self
    }

    /// Object-space size of the whole volume
    pub fn size(&self) -> Vec3 {
        self.dims.as_vec3() * self.dist
    }

    /// Voxel box covering the whole volume
    pub fn voxel_bounds(&self) -> VoxelBox {
        VoxelBox::from_dims(self.dims)
    }

    /// Object-space bounds of the whole volume
    pub fn object_bounds(&self) -> Aabb {
        self.object_box(&self.voxel_bounds())
    }

    /// Voxel coordinate (possibly fractional) to object space
    pub fn object_coords(&self, voxel: Vec3) -> Vec3 {
        self.position - self.size() * 0.5 + voxel * self.dist
    }

    /// Object-space point to voxel coordinates. Points outside the volume
    /// map to negative or out-of-range values; nothing is clamped.
    pub fn voxel_coords(&self, object: Vec3) -> Vec3 {
        (object - self.position + self.size() * 0.5) / self.dist
    }

    /// Object-space bounds of a voxel box
    pub fn object_box(&self, voxels: &VoxelBox) -> Aabb {
        Aabb::new(
            self.object_coords(voxels.min.as_vec3()),
            self.object_coords(voxels.max.as_vec3()),
        )
    }
}
