//! Integer screen-space rectangles

use serde::{Deserialize, Serialize};

/// Rectangle in window coordinates: origin at the lower left, size in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width: width.max(0), height: height.max(0) }
    }

    /// Rectangle spanning two corners (max exclusive)
    pub fn from_corners(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0.min(x1), y0.min(y1), (x1 - x0).abs(), (y1 - y0).abs())
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn top(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// True if `other` lies completely inside this rectangle
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x && other.y >= self.y &&
        other.right() <= self.right() && other.top() <= self.top()
    }

    pub fn contains_pixel(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.top()
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Intersection, clamped to an empty rectangle when disjoint
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.top().min(other.top());
        if x1 <= x0 || y1 <= y0 {
            return Rect::new(x0, y0, 0, 0);
        }
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect() {
        let viewport = Rect::new(0, 0, 100, 50);
        let r = Rect::new(-10, 20, 40, 100);
        assert_eq!(r.intersect(&viewport), Rect::new(0, 20, 30, 30));

        let outside = Rect::new(200, 200, 5, 5);
        assert!(outside.intersect(&viewport).is_empty());
        assert!(!outside.overlaps(&viewport));
    }

    #[test]
    fn test_contains() {
        let viewport = Rect::new(0, 0, 100, 50);
        assert!(viewport.contains(&Rect::new(10, 10, 10, 10)));
        assert!(!viewport.contains(&Rect::new(95, 10, 10, 10)));
        assert!(viewport.contains_pixel(99, 49));
        assert!(!viewport.contains_pixel(100, 0));
    }

    #[test]
    fn test_from_corners() {
        assert_eq!(Rect::from_corners(10, 8, 2, 4), Rect::new(2, 4, 8, 4));
    }
}
