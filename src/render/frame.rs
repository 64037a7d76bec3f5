//! Pixel buffers: per-worker tiles and the composited frame

use std::path::Path;

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::core::Result;
use crate::math::Rect;

/// Premultiplied RGBA color
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Premultiply a straight-alpha color
    pub fn premultiplied(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self::new(r * a, g * a, b * a, a)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.r * s, self.g * s, self.b * s, self.a * s)
    }

    /// `self` in front of `dst`
    pub fn over(self, dst: Rgba) -> Rgba {
        let t = 1.0 - self.a;
        Rgba::new(
            self.r + t * dst.r,
            self.g + t * dst.g,
            self.b + t * dst.b,
            self.a + t * dst.a,
        )
    }

    /// `self` behind `dst`
    pub fn under(self, dst: Rgba) -> Rgba {
        dst.over(self)
    }

    /// 8-bit straight-alpha color for image export
    pub fn to_rgba8(self) -> [u8; 4] {
        let (r, g, b) = if self.a > 0.0 {
            (self.r / self.a, self.g / self.a, self.b / self.a)
        } else {
            (0.0, 0.0, 0.0)
        };
        [r, g, b, self.a].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

/// Pixels one worker read back for its screen rectangle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tile {
    /// Window-space rectangle the pixels cover
    pub rect: Rect,
    /// Row-major, bottom row first
    pub pixels: Vec<Rgba>,
    /// Frame number the pixels belong to
    pub frame: u64,
}

impl Tile {
    /// Resize to `rect` and clear to transparent
    pub fn reset(&mut self, rect: Rect) {
        self.rect = rect;
        self.pixels.clear();
        self.pixels.resize(rect.area(), Rgba::TRANSPARENT);
    }

    /// Drop all pixels
    pub fn clear(&mut self) {
        self.reset(Rect::new(self.rect.x, self.rect.y, 0, 0));
    }

    pub fn is_empty(&self) -> bool {
        self.rect.is_empty() || self.pixels.is_empty()
    }

    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.rect.contains_pixel(x, y) {
            return None;
        }
        Some(((y - self.rect.y) * self.rect.width + (x - self.rect.x)) as usize)
    }

    /// Pixel at window coordinates; transparent outside the tile
    pub fn get(&self, x: i32, y: i32) -> Rgba {
        self.offset(x, y)
            .and_then(|i| self.pixels.get(i).copied())
            .unwrap_or(Rgba::TRANSPARENT)
    }

    pub fn set(&mut self, x: i32, y: i32, color: Rgba) {
        if let Some(i) = self.offset(x, y) {
            if let Some(px) = self.pixels.get_mut(i) {
                *px = color;
            }
        }
    }

    /// Pixel storage as flat floats (r, g, b, a per pixel)
    pub fn as_floats(&self) -> &[f32] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Rebuild a tile from flat floats. Returns `None` on a size mismatch.
    pub fn from_floats(rect: Rect, frame: u64, floats: &[f32]) -> Option<Tile> {
        if floats.len() != rect.area() * 4 {
            return None;
        }
        let pixels: &[Rgba] = bytemuck::try_cast_slice(floats).ok()?;
        Some(Tile {
            rect,
            pixels: pixels.to_vec(),
            frame,
        })
    }
}

/// Final composited image covering the viewport, origin at (0, 0)
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Rgba>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba::TRANSPARENT; width as usize * height as usize],
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn clear(&mut self) {
        self.pixels.fill(Rgba::TRANSPARENT);
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.resize(width as usize * height as usize, Rgba::TRANSPARENT);
    }

    pub fn get(&self, x: u32, y: u32) -> Rgba {
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .unwrap_or(Rgba::TRANSPARENT)
    }

    /// Composite a tile in front of the frame (back-to-front order)
    pub fn blend_over(&mut self, tile: &Tile) {
        self.blend(tile, Rgba::over);
    }

    /// Composite a tile behind the frame (front-to-back order)
    pub fn blend_under(&mut self, tile: &Tile) {
        self.blend(tile, Rgba::under);
    }

    fn blend(&mut self, tile: &Tile, op: fn(Rgba, Rgba) -> Rgba) {
        let area = tile.rect.intersect(&self.rect());
        if area.is_empty() || self.width == 0 {
            return;
        }
        let (x0, x1) = (area.x as usize, area.right() as usize);
        self.pixels
            .par_chunks_mut(self.width as usize)
            .enumerate()
            .skip(area.y as usize)
            .take(area.height as usize)
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate().take(x1).skip(x0) {
                    *px = op(tile.get(x as i32, y as i32), *px);
                }
            });
    }

    /// 8-bit RGBA bytes, top row first
    pub fn to_rgba8(&self) -> Vec<u8> {
        let width = self.width as usize;
        let mut out = Vec::with_capacity(self.pixels.len() * 4);
        for row in self.pixels.chunks(width.max(1)).rev() {
            for px in row {
                out.extend_from_slice(&px.to_rgba8());
            }
        }
        out
    }

    /// Write the frame as PNG
    pub fn save_png(&self, path: &Path) -> Result<()> {
        let img = image::RgbaImage::from_raw(self.width, self.height, self.to_rgba8())
            .ok_or_else(|| crate::core::Error::Renderer("frame buffer size mismatch".into()))?;
        img.save(path)
            .map_err(|e| crate::core::Error::Renderer(format!("failed to write {}: {}", path.display(), e)))?;
        log::info!("Saved {}x{} frame to {}", self.width, self.height, path.display());
        Ok(())
    }
}
