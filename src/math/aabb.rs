//! Axis-aligned bounding box in object space

use crate::core::types::Vec3;
use crate::math::Axis;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Box that contains nothing; the identity for [`Aabb::union`]
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create AABB from two corners, ordering them per axis
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: Vec3, half_extent: Vec3) -> Self {
        Self::new(center - half_extent, center + half_extent)
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Get half-extents
    pub fn half_extent(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Volume of the box, zero when empty
    pub fn volume(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let s = self.size();
        s.x * s.y * s.z
    }

    /// True if min exceeds max on any axis
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Half-open containment test: `min <= p < max` on every axis
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x && p.x < self.max.x &&
        p.y >= self.min.y && p.y < self.max.y &&
        p.z >= self.min.z && p.z < self.max.z
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Componentwise intersection. Check [`Aabb::is_empty`] on the result.
    pub fn intersect(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Longest extent; ties go to the lowest axis
    pub fn longest_side(&self) -> (Axis, f32) {
        let size = self.size();
        let mut best = (Axis::X, size.x);
        for axis in [Axis::Y, Axis::Z] {
            if size[axis.index()] > best.1 {
                best = (axis, size[axis.index()]);
            }
        }
        best
    }

    /// Split into lower and upper halves at `position` along `axis`.
    ///
    /// Positions outside the box are clamped to its extent, so one half may
    /// be flat.
    pub fn split(&self, axis: Axis, position: f32) -> (Aabb, Aabb) {
        let i = axis.index();
        let position = position.clamp(self.min[i], self.max[i]);

        let mut lower = *self;
        let mut upper = *self;
        lower.max[i] = position;
        upper.min[i] = position;
        (lower, upper)
    }

    /// Split at a fraction in [0, 1] of the extent along `axis`
    pub fn split_fraction(&self, axis: Axis, fraction: f32) -> (Aabb, Aabb) {
        let i = axis.index();
        let position = self.min[i] + (self.max[i] - self.min[i]) * fraction.clamp(0.0, 1.0);
        self.split(axis, position)
    }

    /// The eight corners, bit 0 = x, bit 1 = y, bit 2 = z
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            )
        })
    }

    /// The twelve edges as line segments
    pub fn edges(&self) -> [[Vec3; 2]; 12] {
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (2, 3), (4, 5), (6, 7),
            (0, 2), (1, 3), (4, 6), (5, 7),
            (0, 4), (1, 5), (2, 6), (3, 7),
        ];
        let c = self.corners();
        EDGES.map(|(a, b)| [c[a], c[b]])
    }
}
