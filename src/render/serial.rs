//! Serial brick renderer: partitions its bricks over several sub-renderers
//! and draws them one after another on the calling thread.

use std::sync::Arc;

use crate::bsp::{BspTree, DirectRenderer, LeafVisitor, TraversalOrder};
use crate::core::Result;
use crate::core::camera::CameraState;
use crate::math::Aabb;
use crate::render::factory::{RendererContext, RendererFactory, RendererOptions};
use crate::render::frame::{Frame, Tile};
use crate::render::params::{ParamValue, ParameterId, TransferFunction};
use crate::render::renderer::BrickRenderer;
use crate::volume::VolumeDesc;

pub struct SerialBrickRenderer {
    volume: Arc<VolumeDesc>,
    tree: BspTree,
    renderers: Vec<Box<dyn BrickRenderer>>,
    leaf_bounds: Vec<Aabb>,
    frame: Frame,
}

/// Registry constructor. Options: `bricks` (leaf count, default 1),
/// `brickrenderer` (sub-renderer type, default `default`).
pub fn create(
    factory: &RendererFactory,
    ctx: &RendererContext,
    options: &RendererOptions,
) -> Result<Box<dyn BrickRenderer>> {
    let leaves = options.get_usize("bricks").unwrap_or(1).max(1);
    let brick_renderer = options.get("brickrenderer").unwrap_or("default");
    Ok(Box::new(SerialBrickRenderer::new(factory, ctx, leaves, brick_renderer)?))
}

impl SerialBrickRenderer {
    pub fn new(
        factory: &RendererFactory,
        ctx: &RendererContext,
        leaves: usize,
        brick_renderer: &str,
    ) -> Result<Self> {
        if factory.resolve(brick_renderer)? == "serbrick" {
            return Err(crate::core::Error::Renderer(
                "serbrick cannot render its own leaves".into(),
            ));
        }

        let tree = BspTree::balanced_for_bricks(ctx.volume.dims, leaves, None, ctx.bricks.clone())?;

        let mut renderers = Vec::with_capacity(leaves);
        let mut leaf_bounds = Vec::with_capacity(leaves);
        for leaf in tree.leaves() {
            let bounds = tree
                .leaf_object_bounds(leaf.id, &ctx.volume)
                .unwrap_or(leaf.bounds);
            let mut sub = ctx.clone();
            sub.bricks = leaf.bricks.clone();
            sub.region = bounds;
            if let Some(voxels) = leaf.voxels {
                sub.state.insert(ParameterId::VisibleRegion, ParamValue::Box(voxels));
            }
            renderers.push(factory.create(brick_renderer, &sub, &RendererOptions::new())?);
            leaf_bounds.push(bounds);
        }
        log::info!("Serial brick renderer with {} leaves", leaves);

        Ok(Self {
            volume: ctx.volume.clone(),
            tree,
            renderers,
            leaf_bounds,
            frame: Frame::default(),
        })
    }

    pub fn tree(&self) -> &BspTree {
        &self.tree
    }
}

impl BrickRenderer for SerialBrickRenderer {
    fn name(&self) -> &str {
        "serbrick"
    }

    fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()> {
        let vp = camera.viewport;
        let (w, h) = (vp.right().max(0) as u32, vp.top().max(0) as u32);
        if self.frame.width != w || self.frame.height != h {
            self.frame.resize(w, h);
        } else {
            self.frame.clear();
        }

        let eye = self.tree.eye_in_tree_space(camera.eye_position(), &self.volume);
        let mut visitor = LeafVisitor::DirectRender(DirectRenderer::new(
            &mut self.renderers,
            &self.leaf_bounds,
            camera,
            &mut self.frame,
        ));
        self.tree.traverse(eye, TraversalOrder::BackToFront, &mut visitor);

        for y in tile.rect.y..tile.rect.top() {
            for x in tile.rect.x..tile.rect.right() {
                if x >= 0 && y >= 0 {
                    tile.set(x, y, self.frame.get(x as u32, y as u32));
                }
            }
        }
        Ok(())
    }

    fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()> {
        // each leaf keeps its own visible region
        if id == ParameterId::VisibleRegion {
            return Ok(());
        }
        for renderer in &mut self.renderers {
            renderer.set_parameter(id, value)?;
        }
        Ok(())
    }

    fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()> {
        for renderer in &mut self.renderers {
            renderer.update_transfer_function(tf)?;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.frame.resize(width, height);
        for renderer in &mut self.renderers {
            renderer.resize(width, height)?;
        }
        Ok(())
    }
}
