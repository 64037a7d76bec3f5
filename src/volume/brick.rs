//! Brick - a disjoint rectangular sub-volume with its own texture.

use crate::bsp::TraversalOrder;
use crate::core::types::Vec3;
use crate::math::{Aabb, VoxelBox};

/// Opaque handle to a texture owned by the rendering collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Brick with rendering state.
#[derive(Clone, Debug, PartialEq)]
pub struct Brick {
    /// Position in the inventory the brick was generated in
    pub index: usize,
    /// Voxel-space extent
    pub voxels: VoxelBox,
    /// Object-space extent
    pub bounds: Aabb,
    /// Texture resource (None until uploaded)
    pub texture: Option<TextureHandle>,
    /// Min/max scalar value inside the brick
    pub value_range: (f32, f32),
    /// False when empty-space skipping culls the brick
    pub visible: bool,
    /// True if the brick overlaps the current probe
    pub inside_probe: bool,
    /// Distance from brick center to the eye, recomputed per frame
    pub distance: f32,
}

impl Brick {
    /// Create a visible brick with an unknown (full) value range.
    pub fn new(index: usize, voxels: VoxelBox, bounds: Aabb) -> Self {
        Self {
            index,
            voxels,
            bounds,
            texture: None,
            value_range: (f32::NEG_INFINITY, f32::INFINITY),
            visible: true,
            inside_probe: true,
            distance: 0.0,
        }
    }

    pub fn with_value_range(mut self, min: f32, max: f32) -> Self {
        self.value_range = (min.min(max), min.max(max));
        self
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    /// Recompute the sort key for a new eye position.
    pub fn update_distance(&mut self, eye: Vec3) {
        self.distance = (self.center() - eye).length();
    }

    /// True if any value in the brick falls into the opaque `range`.
    pub fn is_visible_for(&self, range: (f32, f32)) -> bool {
        self.value_range.0 <= range.1 && self.value_range.1 >= range.0
    }

    /// Update `inside_probe` for a probe box.
    pub fn mark_probe(&mut self, probe: &Aabb) {
        self.inside_probe = self.bounds.intersects(probe);
    }

    /// Brick bounds clipped to the probe. May be empty.
    pub fn clipped(&self, probe: &Aabb) -> Aabb {
        self.bounds.intersect(probe)
    }
}

/// Sort bricks by distance to `eye`. Back-to-front puts the farthest first.
pub fn sort_bricks(bricks: &mut [Brick], eye: Vec3, order: TraversalOrder) {
    for brick in bricks.iter_mut() {
        brick.update_distance(eye);
    }
    match order {
        TraversalOrder::BackToFront => {
            bricks.sort_by(|a, b| b.distance.total_cmp(&a.distance));
        }
        TraversalOrder::FrontToBack => {
            bricks.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        }
    }
}

/// Empty-space skipping: mark bricks whose value range misses the opaque
/// range invisible. Returns the number of visible bricks.
pub fn mark_visibility(bricks: &mut [Brick], opaque_range: (f32, f32)) -> usize {
    let mut visible = 0;
    for brick in bricks.iter_mut() {
        brick.visible = brick.is_visible_for(opaque_range);
        if brick.visible {
            visible += 1;
        }
    }
    visible
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::UVec3;

    fn unit_brick(index: usize, x: u32) -> Brick {
        let voxels = VoxelBox::new(UVec3::new(x, 0, 0), UVec3::new(x + 1, 1, 1));
        Brick::new(index, voxels, voxels.to_aabb())
    }

    #[test]
    fn test_sort_back_to_front() {
        let mut bricks: Vec<Brick> = (0..4).map(|i| unit_brick(i, i as u32)).collect();
        let eye = Vec3::new(-5.0, 0.5, 0.5);

        sort_bricks(&mut bricks, eye, TraversalOrder::BackToFront);
        let order: Vec<usize> = bricks.iter().map(|b| b.index).collect();
        assert_eq!(order, vec![3, 2, 1, 0]);

        sort_bricks(&mut bricks, eye, TraversalOrder::FrontToBack);
        let order: Vec<usize> = bricks.iter().map(|b| b.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_visibility() {
        let mut bricks = vec![
            unit_brick(0, 0).with_value_range(0.0, 0.1),
            unit_brick(1, 1).with_value_range(0.4, 0.9),
        ];
        let visible = mark_visibility(&mut bricks, (0.5, 1.0));
        assert_eq!(visible, 1);
        assert!(!bricks[0].visible);
        assert!(bricks[1].visible);
    }

    #[test]
    fn test_probe() {
        let mut brick = unit_brick(0, 2);
        brick.mark_probe(&Aabb::new(Vec3::ZERO, Vec3::ONE));
        assert!(!brick.inside_probe);

        let probe = Aabb::new(Vec3::new(2.5, 0.0, 0.0), Vec3::splat(4.0));
        brick.mark_probe(&probe);
        assert!(brick.inside_probe);
        assert_eq!(brick.clipped(&probe).min.x, 2.5);
    }
}
