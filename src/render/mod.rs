//! Rendering interface: tiles, parameters, the brick renderer trait and the
//! renderers this crate provides

pub mod factory;
pub mod frame;
pub mod params;
pub mod remote;
pub mod renderer;
pub mod serial;
pub mod splat;

pub use factory::{RendererContext, RendererFactory, RendererOptions, RendererRegistry, RENDERER_ENV};
pub use frame::{Frame, Rgba, Tile};
pub use params::{ParamValue, ParameterId, RenderState, TfPoint, TransferFunction};
pub use remote::{RemoteBrickRenderer, RenderNode, serve_renderer};
pub use renderer::BrickRenderer;
pub use serial::SerialBrickRenderer;
pub use splat::SplatRenderer;
