//! Actions performed at each leaf during an ordered traversal

use crate::bsp::TraversalOrder;
use crate::bsp::node::LeafNode;
use crate::core::camera::CameraState;
use crate::core::types::Vec3;
use crate::math::Aabb;
use crate::render::frame::{Frame, Tile};
use crate::render::renderer::BrickRenderer;
use crate::volume::VolumeDesc;

/// Blends each leaf's finished tile into the frame
pub struct SortLastCompositor<'a> {
    frame: &'a mut Frame,
    tiles: Vec<Option<&'a Tile>>,
    order: TraversalOrder,
    composited: Vec<usize>,
}

impl<'a> SortLastCompositor<'a> {
    /// `tiles[i]` is the tile rendered for leaf `i`, or `None` if that
    /// worker produced nothing this frame.
    pub fn new(frame: &'a mut Frame, tiles: Vec<Option<&'a Tile>>, order: TraversalOrder) -> Self {
        Self {
            frame,
            tiles,
            order,
            composited: Vec::new(),
        }
    }

    /// Leaf ids in the order they were blended
    pub fn composited(&self) -> &[usize] {
        &self.composited
    }

    pub fn into_composited(self) -> Vec<usize> {
        self.composited
    }

    fn visit(&mut self, leaf: &LeafNode) {
        let Some(tile) = self.tiles.get(leaf.id).copied().flatten() else {
            log::debug!("Leaf {} has no tile this frame", leaf.id);
            return;
        };
        if tile.is_empty() {
            log::trace!("Leaf {} tile is empty", leaf.id);
            return;
        }
        match self.order {
            TraversalOrder::BackToFront => self.frame.blend_over(tile),
            TraversalOrder::FrontToBack => self.frame.blend_under(tile),
        }
        self.composited.push(leaf.id);
    }
}

/// Collects the edges of every leaf's bounds, for show-bricks mode
#[derive(Clone, Debug, Default)]
pub struct OutlineCollector {
    /// Converts voxel-space leaves to object space when set
    pub volume: Option<VolumeDesc>,
    /// Outlines are clipped to this box when set
    pub probe: Option<Aabb>,
    pub lines: Vec<[Vec3; 2]>,
    pub leaf_order: Vec<usize>,
}

impl OutlineCollector {
    pub fn new(volume: Option<VolumeDesc>, probe: Option<Aabb>) -> Self {
        Self {
            volume,
            probe,
            lines: Vec::new(),
            leaf_order: Vec::new(),
        }
    }

    fn visit(&mut self, leaf: &LeafNode) {
        let mut bounds = match (&self.volume, leaf.voxels) {
            (Some(volume), Some(voxels)) => volume.object_box(&voxels),
            _ => leaf.bounds,
        };
        if let Some(probe) = &self.probe {
            bounds = bounds.intersect(probe);
        }
        if bounds.is_empty() {
            return;
        }
        self.lines.extend(bounds.edges());
        self.leaf_order.push(leaf.id);
    }
}

/// Renders each leaf with its own renderer and blends the result right away.
/// Used when one process renders every leaf itself.
pub struct DirectRenderer<'a> {
    renderers: &'a mut [Box<dyn BrickRenderer>],
    leaf_bounds: &'a [Aabb],
    camera: &'a CameraState,
    frame: &'a mut Frame,
    scratch: Tile,
    rendered: Vec<usize>,
}

impl<'a> DirectRenderer<'a> {
    /// `renderers[i]` and `leaf_bounds[i]` (object space) belong to leaf `i`.
    pub fn new(
        renderers: &'a mut [Box<dyn BrickRenderer>],
        leaf_bounds: &'a [Aabb],
        camera: &'a CameraState,
        frame: &'a mut Frame,
    ) -> Self {
        Self {
            renderers,
            leaf_bounds,
            camera,
            frame,
            scratch: Tile::default(),
            rendered: Vec::new(),
        }
    }

    pub fn rendered(&self) -> &[usize] {
        &self.rendered
    }

    fn visit(&mut self, leaf: &LeafNode) {
        let (Some(renderer), Some(bounds)) =
            (self.renderers.get_mut(leaf.id), self.leaf_bounds.get(leaf.id))
        else {
            log::warn!("No renderer for leaf {}", leaf.id);
            return;
        };
        let rect = self.camera.bounding_rect(bounds).intersect(&self.camera.viewport);
        self.scratch.reset(rect);
        if rect.is_empty() {
            return;
        }
        if let Err(e) = renderer.render_volume(self.camera, &mut self.scratch) {
            log::warn!("Leaf {} failed to render: {}", leaf.id, e);
            return;
        }
        self.frame.blend_over(&self.scratch);
        self.rendered.push(leaf.id);
    }
}

/// The leaf actions a traversal can perform
pub enum LeafVisitor<'a> {
    SortLast(SortLastCompositor<'a>),
    Outline(OutlineCollector),
    DirectRender(DirectRenderer<'a>),
}

impl LeafVisitor<'_> {
    pub fn visit(&mut self, leaf: &LeafNode) {
        match self {
            LeafVisitor::SortLast(v) => v.visit(leaf),
            LeafVisitor::Outline(v) => v.visit(leaf),
            LeafVisitor::DirectRender(v) => v.visit(leaf),
        }
    }
}
