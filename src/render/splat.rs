//! Reference CPU renderer: one translucent quad per brick.
//!
//! Each visible brick's screen rectangle is filled with the transfer-function
//! color of its mean value and blended back-to-front.

use crate::bsp::TraversalOrder;
use crate::core::Result;
use crate::core::camera::CameraState;
use crate::core::types::Vec3;
use crate::math::{Aabb, VoxelBox};
use crate::render::factory::{RendererContext, RendererFactory, RendererOptions};
use crate::render::frame::{Rgba, Tile};
use crate::render::params::{ParamValue, ParameterId, TransferFunction};
use crate::render::renderer::BrickRenderer;
use crate::volume::{Brick, mark_visibility, sort_bricks};

/// Opacity applied to one brick quad at quality 1.0
const BASE_OPACITY: f32 = 0.5;

pub struct SplatRenderer {
    bricks: Vec<Brick>,
    transfer_function: TransferFunction,
    visible_region: Option<VoxelBox>,
    probe: Option<Aabb>,
    probe_position: Option<Vec3>,
    probe_size: Option<Vec3>,
    quality: f32,
    viewport: (u32, u32),
}

/// Registry constructor
pub fn create(
    _factory: &RendererFactory,
    ctx: &RendererContext,
    _options: &RendererOptions,
) -> Result<Box<dyn BrickRenderer>> {
    let mut renderer = SplatRenderer::new(ctx.bricks.clone());
    for (id, value) in &ctx.state {
        renderer.set_parameter(*id, value)?;
    }
    renderer.update_transfer_function(&ctx.transfer_function)?;
    Ok(Box::new(renderer))
}

impl SplatRenderer {
    pub fn new(bricks: Vec<Brick>) -> Self {
        Self {
            bricks,
            transfer_function: TransferFunction::default(),
            visible_region: None,
            probe: None,
            probe_position: None,
            probe_size: None,
            quality: 1.0,
            viewport: (0, 0),
        }
    }

    pub fn bricks(&self) -> &[Brick] {
        &self.bricks
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    fn update_probe(&mut self) {
        self.probe = match (self.probe_position, self.probe_size) {
            (Some(center), Some(size)) => Some(Aabb::from_center_half_extent(center, size * 0.5)),
            _ => None,
        };
        for brick in &mut self.bricks {
            match &self.probe {
                Some(probe) => brick.mark_probe(probe),
                None => brick.inside_probe = true,
            }
        }
    }

    fn in_region(&self, brick: &Brick) -> bool {
        self.visible_region
            .is_none_or(|region| region.intersect(&brick.voxels).voxel_count() > 0)
    }

    fn brick_color(&self, brick: &Brick) -> Rgba {
        let lo = brick.value_range.0.clamp(0.0, 1.0);
        let hi = brick.value_range.1.clamp(0.0, 1.0);
        let opacity = (BASE_OPACITY * self.quality).clamp(0.0, 1.0);
        self.transfer_function.lookup((lo + hi) * 0.5).scale(opacity)
    }
}

impl BrickRenderer for SplatRenderer {
    fn name(&self) -> &str {
        "splat"
    }

    fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()> {
        if tile.rect.is_empty() {
            return Ok(());
        }
        let eye = camera.eye_position();
        sort_bricks(&mut self.bricks, eye, TraversalOrder::BackToFront);

        let mut drawn = 0;
        for brick in &self.bricks {
            if !brick.visible || !brick.inside_probe || !self.in_region(brick) {
                continue;
            }
            let bounds = match &self.probe {
                Some(probe) => brick.clipped(probe),
                None => brick.bounds,
            };
            if bounds.is_empty() {
                continue;
            }
            let rect = camera.bounding_rect(&bounds).intersect(&tile.rect);
            if rect.is_empty() {
                continue;
            }
            let color = self.brick_color(brick);
            for y in rect.y..rect.top() {
                for x in rect.x..rect.right() {
                    tile.set(x, y, color.over(tile.get(x, y)));
                }
            }
            drawn += 1;
        }
        log::trace!("Splatted {} of {} bricks", drawn, self.bricks.len());
        Ok(())
    }

    fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()> {
        match id {
            ParameterId::VisibleRegion => self.visible_region = value.as_box(),
            ParameterId::ProbePosition => {
                self.probe_position = value.as_vec3();
                self.update_probe();
            }
            ParameterId::ProbeSize => {
                self.probe_size = value.as_vec3();
                self.update_probe();
            }
            ParameterId::Quality => self.quality = value.as_f32().unwrap_or(1.0).max(0.0),
            _ => log::trace!("splat renderer ignores {:?}", id),
        }
        Ok(())
    }

    fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()> {
        self.transfer_function = tf.clone();
        match tf.opaque_range() {
            Some(range) => {
                let visible = mark_visibility(&mut self.bricks, range);
                log::debug!("{} of {} bricks visible", visible, self.bricks.len());
            }
            None => {
                for brick in &mut self.bricks {
                    brick.visible = false;
                }
            }
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.viewport = (width, height);
        Ok(())
    }
}
