//! Volume description and bricking

pub mod descriptor;
pub mod brick;
pub mod bricking;

pub use descriptor::VolumeDesc;
pub use brick::{Brick, TextureHandle, sort_bricks, mark_visibility};
pub use bricking::{make_bricks, make_bricks_with, brick_grid_dims};
