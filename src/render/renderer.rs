//! Interface to the code that actually draws bricks

use crate::core::Result;
use crate::core::camera::CameraState;
use crate::render::frame::Tile;
use crate::render::params::{ParamValue, ParameterId, TransferFunction};

/// Renders one set of bricks into a tile.
///
/// Each worker owns one renderer and calls it from its own thread only.
pub trait BrickRenderer: Send {
    /// Registered type name
    fn name(&self) -> &str;

    /// Render the volume for `camera` and read back the pixels covered by
    /// `tile.rect`. The caller sizes the tile and clears it to transparent.
    fn render_volume(&mut self, camera: &CameraState, tile: &mut Tile) -> Result<()>;

    fn set_parameter(&mut self, id: ParameterId, value: &ParamValue) -> Result<()>;

    fn update_transfer_function(&mut self, tf: &TransferFunction) -> Result<()>;

    /// Viewport size changed
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;
}
