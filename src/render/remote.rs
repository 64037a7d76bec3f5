//! Renderers on other machines, reached through `parbrick-remote`

use std::sync::Arc;
use std::time::Duration;

use parbrick_remote::{RemoteClient, RemoteEvent, RemoteReply, RenderHandler, RenderServer, WireCamera};
use tokio::runtime::Runtime;

use crate::core::camera::CameraState;
use crate::core::types::Mat4;
use crate::core::{Error, Result};
use crate::math::Rect;
use crate::render::factory::{RendererContext, RendererFactory, RendererOptions};
use crate::render::frame::Tile;
use crate::render::params::{ParamValue, ParameterId, TransferFunction};
use crate::render::renderer::BrickRenderer;

/// Read timeout used when the options don't name one
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

pub fn camera_to_wire(camera: &CameraState) -> WireCamera {
    let vp = camera.viewport;
    WireCamera {
        modelview: camera.modelview.to_cols_array(),
        projection: camera.projection.to_cols_array(),
        viewport: [vp.x, vp.y, vp.width, vp.height],
    }
}

pub fn camera_from_wire(wire: &WireCamera) -> CameraState {
    let [x, y, w, h] = wire.viewport;
    CameraState {
        modelview: Mat4::from_cols_array(&wire.modelview),
        projection: Mat4::from_cols_array(&wire.projection),
        viewport: Rect::new(x, y, w, h),
    }
}

fn rect_from_wire(r: [i32; 4]) -> Rect {
    Rect::new(r[0], r[1], r[2], r[3])
}

fn rect_to_wire(r: Rect) -> [i32; 4] {
    [r.x, r.y, r.width, r.height]
}

/// Proxy for a renderer running in a render server
pub struct RemoteBrickRenderer {
    client: RemoteClient,
    frame: u64,
}

/// Registry constructor. Options: `remote` (server address, required),
/// `timeout_ms`.
pub fn create(
    _factory: &RendererFactory,
    ctx: &RendererContext,
    options: &RendererOptions,
) -> Result<Box<dyn BrickRenderer>> {
    let addr = options
        .get("remote")
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::Config("remote renderer needs a 'remote' address".into()))?;
    let timeout = Duration::from_millis(options.get("timeout_ms").and_then(|t| t.parse().ok()).unwrap_or(DEFAULT_TIMEOUT_MS));

    let mut renderer = RemoteBrickRenderer::connect(addr, timeout)?;
    for (id, value) in &ctx.state {
        renderer.set_parameter(*id, value)?;
    }
    renderer.update_transfer_function(&ctx.transfer_function)?;
    Ok(Box::new(renderer))
}

impl RemoteBrickRenderer {
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let mut client = RemoteClient::connect(addr, timeout)?;
        client.ping()?;
        Ok(Self { client, frame: 0 })
    }
}

impl BrickRenderer for RemoteBrickRenderer {
    fn name(&self) -> &str {
        "remote"
    }

    fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()> {
        self.frame += 1;
        let event = RemoteEvent::Render {
            camera: camera_to_wire(camera),
            rect: rect_to_wire(tile.rect),
            frame: self.frame,
        };
        match self.client.send(&event)? {
            RemoteReply::Tile { rect, frame, pixels } => {
                if frame != self.frame {
                    return Err(Error::Renderer(format!(
                        "{} answered frame {} for frame {}",
                        self.client.addr(),
                        frame,
                        self.frame
                    )));
                }
                let remote = Tile::from_floats(rect_from_wire(rect), tile.frame, &pixels)
                    .ok_or_else(|| Error::Renderer(format!("malformed tile from {}", self.client.addr())))?;
                let area = remote.rect.intersect(&tile.rect);
                for y in area.y..area.top() {
                    for x in area.x..area.right() {
                        tile.set(x, y, remote.get(x, y));
                    }
                }
                Ok(())
            }
            other => Err(Error::Renderer(format!("expected tile, got {:?}", other))),
        }
    }

    fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()> {
        let event = RemoteEvent::NewParameter {
            id: id.name().to_string(),
            value: serde_json::to_value(value)?,
        };
        self.client.send_ack(&event)?;
        Ok(())
    }

    fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()> {
        let event = RemoteEvent::TransferFunction {
            value: serde_json::to_value(tf)?,
        };
        self.client.send_ack(&event)?;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.client.send_ack(&RemoteEvent::Resize { width, height })?;
        Ok(())
    }
}

impl Drop for RemoteBrickRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.client.send_ack(&RemoteEvent::Exit) {
            log::debug!("Render server {} did not acknowledge exit: {}", self.client.addr(), e);
        }
    }
}

/// Adapts a local renderer to the server side of the protocol
struct RendererHandler {
    renderer: Box<dyn BrickRenderer>,
}

impl RendererHandler {
    fn apply(&mut self, event: RemoteEvent) -> Result<RemoteReply> {
        match event {
            RemoteEvent::Render { camera, rect, frame } => {
                let camera = camera_from_wire(&camera);
                let mut tile = Tile::default();
                tile.reset(rect_from_wire(rect));
                tile.frame = frame;
                self.renderer.render_volume(&camera, &mut tile)?;
                Ok(RemoteReply::Tile {
                    rect: rect_to_wire(tile.rect),
                    frame,
                    pixels: tile.as_floats().to_vec(),
                })
            }
            RemoteEvent::Resize { width, height } => {
                self.renderer.resize(width, height)?;
                Ok(RemoteReply::Ok)
            }
            RemoteEvent::NewParameter { id, value } => {
                let id = ParameterId::from_name(&id)
                    .ok_or_else(|| Error::Renderer(format!("unknown parameter {}", id)))?;
                let value: ParamValue = serde_json::from_value(value)?;
                self.renderer.set_parameter(id, &value)?;
                Ok(RemoteReply::Ok)
            }
            RemoteEvent::TransferFunction { value } => {
                let tf: TransferFunction = serde_json::from_value(value)?;
                self.renderer.update_transfer_function(&tf)?;
                Ok(RemoteReply::Ok)
            }
            RemoteEvent::Exit | RemoteEvent::Ping => Ok(RemoteReply::Ok),
        }
    }
}

impl RenderHandler for RendererHandler {
    fn handle_event(&mut self, event: RemoteEvent) -> RemoteReply {
        self.apply(event).unwrap_or_else(|e| {
            log::warn!("Remote event failed: {}", e);
            RemoteReply::error(e.to_string())
        })
    }
}

/// A running render server with its own tokio runtime
pub struct RenderNode {
    server: RenderServer,
    _runtime: Runtime,
}

impl RenderNode {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }
}

/// Serve `renderer` on `addr` until the returned node is dropped
pub fn serve_renderer(renderer: Box<dyn BrickRenderer>, addr: &str) -> Result<RenderNode> {
    let runtime = Runtime::new()?;
    let handler = Arc::new(tokio::sync::Mutex::new(RendererHandler { renderer }));
    let server = runtime.block_on(RenderServer::start(handler, addr))?;
    Ok(RenderNode {
        server,
        _runtime: runtime,
    })
}
