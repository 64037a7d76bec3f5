//! Parallel brick renderer: one worker per BSP leaf, sort-last compositing
//!
//! Every frame the coordinator queues `Render` for all workers, passes the
//! start barrier, lets the workers render their leaves into private tiles,
//! passes the finish barrier and finally blends the tiles in visibility
//! order for the current eye.

use std::sync::Arc;

use crate::bsp::{BspTree, LeafVisitor, OutlineCollector, SortLastCompositor, TraversalOrder, default_load_balance};
use crate::config::{PartitionMode, RendererConfig};
use crate::core::camera::CameraState;
use crate::core::types::{UVec3, Vec3};
use crate::core::{Error, Result};
use crate::math::{Aabb, VoxelBox};
use crate::parallel::event::{WorkerEvent, WorkerState};
use crate::parallel::pool::{PoolTimeouts, WorkerPool};
use crate::parallel::worker::WorkerSpec;
use crate::render::factory::{RendererContext, RendererFactory, RendererOptions};
use crate::render::frame::{Frame, Tile};
use crate::render::params::{ParamValue, ParameterId, RenderState, TransferFunction};
use crate::render::renderer::BrickRenderer;
use crate::volume::{Brick, VolumeDesc};

pub struct ParallelBrickRenderer {
    volume: Arc<VolumeDesc>,
    tree: BspTree,
    pool: WorkerPool,
    frame: Frame,
    frame_number: u64,
    order: TraversalOrder,
    state: RenderState,
    transfer_function: TransferFunction,
    show_bricks: bool,
    outlines: Vec<[Vec3; 2]>,
    last_leaf_order: Vec<usize>,
}

/// Registry constructor. Reads the worker layout from the options
/// (`bricks`, `displays`, `sockets`, `filenames`, `brickrenderer`).
pub fn create(
    factory: &RendererFactory,
    ctx: &RendererContext,
    options: &RendererOptions,
) -> Result<Box<dyn BrickRenderer>> {
    let config = RendererConfig::from_options(options);
    let mut renderer = ParallelBrickRenderer::new(
        (*ctx.volume).clone(),
        ctx.bricks.clone(),
        &config,
        Arc::new(factory.clone()),
    )?;
    for (id, value) in &ctx.state {
        renderer.set_parameter(*id, value)?;
    }
    renderer.update_transfer_function(&ctx.transfer_function)?;
    Ok(Box::new(renderer))
}

/// Voxel region a leaf renders: its own voxel box, or the bricks it holds
fn leaf_region(voxels: Option<VoxelBox>, bricks: &[Brick]) -> Option<VoxelBox> {
    voxels.or_else(|| bricks.iter().map(|b| b.voxels).reduce(|a, b| a.union(&b)))
}

/// `region` grown by one voxel for interpolation, clamped to the volume
fn padding_region(region: &VoxelBox, dims: UVec3) -> VoxelBox {
    VoxelBox::new(region.min.saturating_sub(UVec3::ONE), (region.max + UVec3::ONE).min(dims))
}

impl ParallelBrickRenderer {
    /// Partition `bricks` over the configured workers and start them.
    pub fn new(
        volume: VolumeDesc,
        bricks: Vec<Brick>,
        config: &RendererConfig,
        factory: Arc<RendererFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let leaves = config.leaf_count();
        let resolved = factory.resolve(&config.brick_renderer)?;
        if resolved == "parbrick" {
            return Err(Error::Config("parbrick cannot render its own leaves".into()));
        }

        let volume = Arc::new(volume);
        let weights = config.load_balance.clone().unwrap_or_else(|| default_load_balance(leaves));
        let tree = match config.partition {
            PartitionMode::Balanced => BspTree::balanced_for_bricks(volume.dims, leaves, Some(&weights), bricks)?,
            PartitionMode::Hierarchical => BspTree::hierarchical(bricks, &weights)?,
        };

        let mut local = None;
        let mut specs = Vec::with_capacity(leaves);
        for id in 0..leaves {
            let worker = config.worker(id);
            let leaf = tree.leaf(id).ok_or(Error::NoLeaves)?;
            let bounds = tree.leaf_object_bounds(id, &volume).unwrap_or(leaf.bounds);

            let mut context = RendererContext::new(volume.clone(), leaf.bricks.clone());
            context.region = bounds;
            context
                .state
                .insert(ParameterId::BrickSize, ParamValue::Int(i64::from(config.brick_size)));
            if let Some(region) = leaf_region(leaf.voxels, &leaf.bricks) {
                context.state.insert(ParameterId::VisibleRegion, ParamValue::Box(region));
                context
                    .state
                    .insert(ParameterId::PaddingRegion, ParamValue::Box(padding_region(&region, volume.dims)));
            }

            let mut options = config.renderer_options();
            if let Some(filename) = &worker.filename {
                options.set("filename", filename.as_str());
            }
            let renderer_type = match &worker.remote {
                Some(addr) => {
                    options.set("remote", addr.as_str());
                    "remote".to_string()
                }
                None => config.brick_renderer.clone(),
            };

            if local.is_none()
                && worker.reuse_main_context
                && worker.remote.is_none()
                && worker.display == config.main_display
            {
                local = Some(id);
            }
            log::debug!(
                "Worker {}: '{}' on display '{}', {} bricks",
                id,
                renderer_type,
                worker.display,
                leaf.bricks.len()
            );
            specs.push(WorkerSpec {
                id,
                renderer_type,
                options,
                context,
                leaf_bounds: bounds,
            });
        }

        let timeouts = PoolTimeouts {
            startup: config.startup_timeout(),
            frame: config.frame_timeout(),
        };
        let pool = WorkerPool::start(specs, local, factory, timeouts)?;
        log::info!("Parallel brick renderer ready: {} leaves, '{}' bricks", leaves, resolved);

        Ok(Self {
            volume,
            tree,
            pool,
            frame: Frame::new(config.viewport[0], config.viewport[1]),
            frame_number: 0,
            order: TraversalOrder::BackToFront,
            state: RenderState::new(),
            transfer_function: TransferFunction::default(),
            show_bricks: false,
            outlines: Vec::new(),
            last_leaf_order: Vec::new(),
        })
    }

    /// Render one frame and composite it. In show-bricks mode only the leaf
    /// outlines are collected and the frame stays clear.
    pub fn render_frame(&mut self, camera: &CameraState) -> Result<&Frame> {
        let vp = camera.viewport;
        let (width, height) = (vp.right().max(0) as u32, vp.top().max(0) as u32);
        if self.frame.width != width || self.frame.height != height {
            self.frame.resize(width, height);
            self.pool.broadcast(&WorkerEvent::Resize { width, height });
        } else {
            self.frame.clear();
        }

        let eye = self.tree.eye_in_tree_space(camera.eye_position(), &self.volume);
        self.last_leaf_order = self.tree.visit_order(eye, self.order);

        if self.show_bricks {
            let mut visitor = LeafVisitor::Outline(OutlineCollector::new(Some((*self.volume).clone()), self.probe()));
            self.tree.traverse(eye, self.order, &mut visitor);
            if let LeafVisitor::Outline(collector) = visitor {
                self.outlines = collector.lines;
            }
            return Ok(&self.frame);
        }

        self.frame_number += 1;
        let frame = self.frame_number;
        log::debug!("Frame {}: leaf order {:?}", frame, self.last_leaf_order);
        self.pool.broadcast(&WorkerEvent::Render { camera: *camera, frame });
        self.pool.complete_frame(camera, frame)?;

        let tiles = self.pool.lock_tiles();
        let current: Vec<Option<&Tile>> = tiles
            .iter()
            .map(|tile| (tile.frame == frame).then_some(&**tile))
            .collect();
        let mut visitor = LeafVisitor::SortLast(SortLastCompositor::new(&mut self.frame, current, self.order));
        self.tree.traverse(eye, self.order, &mut visitor);
        if let LeafVisitor::SortLast(compositor) = visitor {
            let blended = compositor.into_composited();
            if blended.len() < self.tree.leaf_count() {
                log::trace!("Frame {}: {} of {} tiles blended", frame, blended.len(), self.tree.leaf_count());
            }
        }
        drop(tiles);

        Ok(&self.frame)
    }

    fn probe(&self) -> Option<Aabb> {
        let position = self.state.get(&ParameterId::ProbePosition)?.as_vec3()?;
        let size = self.state.get(&ParameterId::ProbeSize)?.as_vec3()?;
        Some(Aabb::from_center_half_extent(position, size * 0.5))
    }

    /// Record a parameter and forward it to every worker. Visible and
    /// padding regions belong to single leaves and are not forwarded.
    pub fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()> {
        match id {
            ParameterId::ShowBricks => {
                self.show_bricks = value.as_bool().unwrap_or(false);
            }
            ParameterId::VisibleRegion | ParameterId::PaddingRegion => {
                log::debug!("Ignoring {} for the whole renderer", id.name());
                return Ok(());
            }
            _ => self.pool.broadcast(&WorkerEvent::NewParameter(id, *value)),
        }
        self.state.insert(id, *value);
        Ok(())
    }

    pub fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()> {
        self.transfer_function = tf.clone();
        self.pool.broadcast(&WorkerEvent::UpdateTransferFunction(tf.clone()));
        Ok(())
    }

    pub fn set_show_bricks(&mut self, show: bool) {
        self.show_bricks = show;
        self.state.insert(ParameterId::ShowBricks, ParamValue::Bool(show));
    }

    pub fn show_bricks(&self) -> bool {
        self.show_bricks
    }

    /// Leaf outlines from the last show-bricks frame, in object space
    pub fn outlines(&self) -> &[[Vec3; 2]] {
        &self.outlines
    }

    pub fn set_traversal_order(&mut self, order: TraversalOrder) {
        self.order = order;
    }

    pub fn tree(&self) -> &BspTree {
        &self.tree
    }

    pub fn volume(&self) -> &VolumeDesc {
        &self.volume
    }

    pub fn parameters(&self) -> &RenderState {
        &self.state
    }

    pub fn transfer_function(&self) -> &TransferFunction {
        &self.transfer_function
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.states()
    }

    /// Workers that could not create their renderer
    pub fn failed_workers(&self) -> &[usize] {
        self.pool.failed()
    }

    /// Leaf ids of the last frame, in compositing order
    pub fn last_leaf_order(&self) -> &[usize] {
        &self.last_leaf_order
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame_number
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stop all workers. Also happens on drop.
    pub fn shutdown(&mut self) {
        self.pool.shutdown();
    }
}

impl BrickRenderer for ParallelBrickRenderer {
    fn name(&self) -> &str {
        "parbrick"
    }

    fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()> {
        let frame = self.render_frame(camera)?;
        let rect = tile.rect.intersect(&frame.rect());
        for y in rect.y..rect.top() {
            for x in rect.x..rect.right() {
                tile.set(x, y, frame.get(x as u32, y as u32));
            }
        }
        Ok(())
    }

    fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()> {
        ParallelBrickRenderer::set_parameter(self, id, value)
    }

    fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()> {
        ParallelBrickRenderer::update_transfer_function(self, tf)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.frame.resize(width, height);
        self.pool.broadcast(&WorkerEvent::Resize { width, height });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::core::camera::Camera;
    use crate::math::Rect;
    use crate::render::factory::RendererRegistry;
    use crate::render::splat::SplatRenderer;
    use crate::volume::make_bricks_with;

    fn factory() -> Arc<RendererFactory> {
        crate::core::logging::init();
        Arc::new(RendererFactory::new(RendererRegistry::with_builtin()).with_env_default(None))
    }

    fn scene() -> (VolumeDesc, Vec<Brick>) {
        let volume = VolumeDesc::new(UVec3::new(16, 8, 8));
        let bricks = make_bricks_with(&volume, 4, |_| (0.9, 0.9));
        (volume, bricks)
    }

    fn camera() -> CameraState {
        Camera::look_at(Vec3::new(12.0, 6.0, 30.0), Vec3::ZERO, Vec3::Y).state(Rect::new(0, 0, 48, 48))
    }

    fn config(workers: usize) -> RendererConfig {
        RendererConfig {
            brick_renderer: "splat".into(),
            brick_size: 4,
            viewport: [48, 48],
            ..RendererConfig::with_workers(workers)
        }
    }

    fn assert_same_image(frame: &Frame, tile: &Tile) -> usize {
        let mut covered = 0;
        for y in 0..48 {
            for x in 0..48 {
                let a = frame.get(x, y);
                let b = tile.get(x as i32, y as i32);
                for (channel, (ca, cb)) in [(a.r, b.r), (a.g, b.g), (a.b, b.b), (a.a, b.a)].into_iter().enumerate() {
                    assert!((ca - cb).abs() < 1e-4, "channel {channel} differs at {x},{y}: {ca} vs {cb}");
                }
                if a.a > 0.0 {
                    covered += 1;
                }
            }
        }
        covered
    }

    #[test]
    fn test_parallel_matches_single_renderer() {
        for workers in [3, 4] {
            let (volume, bricks) = scene();
            let mut renderer = ParallelBrickRenderer::new(volume, bricks.clone(), &config(workers), factory()).unwrap();
            let mut single = SplatRenderer::new(bricks);

            for eye in [Vec3::new(12.0, 6.0, 30.0), Vec3::new(-30.0, 2.0, 3.0)] {
                let camera = Camera::look_at(eye, Vec3::ZERO, Vec3::Y).state(Rect::new(0, 0, 48, 48));
                let frame = renderer.render_frame(&camera).unwrap().clone();

                let mut tile = Tile::default();
                tile.reset(Rect::new(0, 0, 48, 48));
                single.render_volume(&camera, &mut tile).unwrap();

                assert!(assert_same_image(&frame, &tile) > 0, "{workers} workers, eye {eye}: nothing drawn");
            }
            assert_eq!(renderer.frames_rendered(), 2);
            assert_eq!(renderer.last_leaf_order().len(), workers);
        }
    }

    #[test]
    fn test_leaf_order_follows_eye() {
        let (volume, bricks) = scene();
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &config(2), factory()).unwrap();

        let right = Camera::look_at(Vec3::new(40.0, 0.0, 0.0), Vec3::ZERO, Vec3::Y).state(Rect::new(0, 0, 32, 32));
        renderer.render_frame(&right).unwrap();
        assert_eq!(renderer.last_leaf_order(), &[0, 1]);

        let left = Camera::look_at(Vec3::new(-40.0, 0.0, 0.0), Vec3::ZERO, Vec3::Y).state(Rect::new(0, 0, 32, 32));
        renderer.render_frame(&left).unwrap();
        assert_eq!(renderer.last_leaf_order(), &[1, 0]);
        assert_eq!(renderer.frame().width, 32);
    }

    #[test]
    fn test_unreachable_remote_degrades() {
        let (volume, bricks) = scene();
        let mut cfg = config(2);
        cfg.workers[1] = WorkerConfig {
            remote: Some("127.0.0.1:1".into()),
            ..WorkerConfig::default()
        };
        cfg.options.insert("timeout_ms".into(), "200".into());
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &cfg, factory()).unwrap();
        assert_eq!(renderer.failed_workers(), &[1]);

        let frame = renderer.render_frame(&camera()).unwrap();
        assert!(frame.pixels.iter().any(|p| p.a > 0.0));
        assert_eq!(renderer.worker_states()[1], WorkerState::Exited);
    }

    #[test]
    fn test_main_context_reuse() {
        let (volume, bricks) = scene();
        let mut cfg = config(3);
        cfg.main_display = ":0".into();
        cfg.workers[2].display = ":0".into();
        cfg.workers[2].reuse_main_context = true;
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &cfg, factory()).unwrap();
        assert_eq!(renderer.pool().local_worker(), Some(2));

        for _ in 0..3 {
            renderer.render_frame(&camera()).unwrap();
        }
        assert_eq!(renderer.frames_rendered(), 3);
        for id in 0..3 {
            assert_eq!(renderer.pool().shared(id).unwrap().lock_tile().frame, 3);
        }
    }

    #[test]
    fn test_show_bricks_skips_rendering() {
        let (volume, bricks) = scene();
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &config(2), factory()).unwrap();
        renderer.set_parameter(ParameterId::ShowBricks, &ParamValue::Bool(true)).unwrap();
        assert!(renderer.show_bricks());

        let frame = renderer.render_frame(&camera()).unwrap();
        assert!(frame.pixels.iter().all(|p| p.a == 0.0));
        assert_eq!(renderer.frames_rendered(), 0);
        assert_eq!(renderer.outlines().len(), 24);

        renderer.set_show_bricks(false);
        renderer.render_frame(&camera()).unwrap();
        assert_eq!(renderer.frames_rendered(), 1);
    }

    #[test]
    fn test_hierarchical_partition() {
        let (volume, bricks) = scene();
        let cfg = RendererConfig {
            partition: PartitionMode::Hierarchical,
            load_balance: Some(vec![0.25, 0.25, 0.5]),
            ..config(3)
        };
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &cfg, factory()).unwrap();
        let total: usize = renderer.tree().leaves().iter().map(|l| l.bricks.len()).sum();
        assert_eq!(total, 16);
        renderer.render_frame(&camera()).unwrap();
        assert_eq!(renderer.last_leaf_order().len(), 3);
    }

    #[test]
    fn test_parameters_are_recorded() {
        let (volume, bricks) = scene();
        let mut renderer = ParallelBrickRenderer::new(volume, bricks, &config(2), factory()).unwrap();
        renderer.set_parameter(ParameterId::Quality, &ParamValue::Float(2.0)).unwrap();
        renderer
            .set_parameter(ParameterId::VisibleRegion, &ParamValue::Box(VoxelBox::default()))
            .unwrap();
        assert_eq!(renderer.parameters().get(&ParameterId::Quality), Some(&ParamValue::Float(2.0)));
        assert!(!renderer.parameters().contains_key(&ParameterId::VisibleRegion));
        renderer.render_frame(&camera()).unwrap();
    }

    #[test]
    fn test_nested_parallel_rejected() {
        let (volume, bricks) = scene();
        let cfg = RendererConfig {
            brick_renderer: "parbrick".into(),
            ..config(2)
        };
        assert!(matches!(
            ParallelBrickRenderer::new(volume, bricks, &cfg, factory()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_created_through_factory() {
        let (volume, bricks) = scene();
        let ctx = RendererContext::new(Arc::new(volume), bricks);
        let options = RendererOptions::parse("bricks=2;brickrenderer=splat");
        let mut renderer = factory().create("parallel", &ctx, &options).unwrap();
        assert_eq!(renderer.name(), "parbrick");

        let mut tile = Tile::default();
        tile.reset(Rect::new(8, 8, 32, 32));
        renderer.render_volume(&camera(), &mut tile).unwrap();
        assert!(tile.pixels.iter().any(|p| p.a > 0.0));
    }
}
