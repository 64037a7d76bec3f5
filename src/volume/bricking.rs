//! Brick generation: cut a volume into a regular grid of bricks.

use rayon::prelude::*;

use crate::core::types::UVec3;
use crate::math::VoxelBox;
use crate::volume::{Brick, VolumeDesc};

/// Number of bricks per axis for a given brick edge length (edge bricks are
/// truncated, so this rounds up).
pub fn brick_grid_dims(volume: &VolumeDesc, brick_size: u32) -> UVec3 {
    let size = brick_size.max(1);
    (volume.dims + UVec3::splat(size - 1)) / size
}

/// Cut `volume` into bricks of `brick_size` voxels per edge, x fastest.
pub fn make_bricks(volume: &VolumeDesc, brick_size: u32) -> Vec<Brick> {
    make_bricks_with(volume, brick_size, |_| (f32::NEG_INFINITY, f32::INFINITY))
}

/// Like [`make_bricks`], with a callback computing each brick's value range.
pub fn make_bricks_with<F>(volume: &VolumeDesc, brick_size: u32, value_range: F) -> Vec<Brick>
where
    F: Fn(&VoxelBox) -> (f32, f32) + Sync,
{
    let size = brick_size.max(1);
    let grid = brick_grid_dims(volume, size);
    let count = grid.x as usize * grid.y as usize * grid.z as usize;

    let bricks: Vec<Brick> = (0..count)
        .into_par_iter()
        .map(|index| {
            let cell = UVec3::new(
                (index % grid.x as usize) as u32,
                ((index / grid.x as usize) % grid.y as usize) as u32,
                (index / (grid.x as usize * grid.y as usize)) as u32,
            );
            let min = cell * size;
            let max = (min + UVec3::splat(size)).min(volume.dims);
            let voxels = VoxelBox::new(min, max);
            let (lo, hi) = value_range(&voxels);
            Brick::new(index, voxels, volume.object_box(&voxels)).with_value_range(lo, hi)
        })
        .collect();

    log::debug!(
        "Bricked {:?} volume into {} bricks ({}x{}x{}, size {})",
        volume.dims, bricks.len(), grid.x, grid.y, grid.z, size
    );
    bricks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dims_round_up() {
        let vd = VolumeDesc::new(UVec3::new(10, 8, 1));
        assert_eq!(brick_grid_dims(&vd, 4), UVec3::new(3, 2, 1));
    }

    #[test]
    fn test_bricks_cover_volume_exactly() {
        let vd = VolumeDesc::new(UVec3::new(10, 8, 3));
        let bricks = make_bricks(&vd, 4);
        assert_eq!(bricks.len(), 3 * 2 * 1);

        let total: u64 = bricks.iter().map(|b| b.voxels.voxel_count()).sum();
        assert_eq!(total, vd.voxel_bounds().voxel_count());

        for (i, brick) in bricks.iter().enumerate() {
            assert_eq!(brick.index, i);
            for other in &bricks[i + 1..] {
                assert_eq!(brick.voxels.intersect(&other.voxels).voxel_count(), 0);
            }
        }
    }

    #[test]
    fn test_value_range_callback() {
        let vd = VolumeDesc::new(UVec3::splat(4));
        let bricks = make_bricks_with(&vd, 2, |vb| (vb.min.x as f32, vb.max.x as f32));
        assert_eq!(bricks[0].value_range, (0.0, 2.0));
        assert_eq!(bricks[1].value_range, (2.0, 4.0));
    }
}
