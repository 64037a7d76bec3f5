//! Parbrick - brick-based parallel volume rendering
//!
//! A volume is cut into bricks, the bricks are distributed over the leaves
//! of a BSP tree, one render worker draws each leaf and the coordinator
//! blends the workers' tiles in visibility order (sort-last compositing).

pub mod core;
pub mod math;
pub mod volume;
pub mod bsp;
pub mod render;
pub mod parallel;
pub mod config;

pub use config::{PartitionMode, RendererConfig, WorkerConfig};
pub use parallel::ParallelBrickRenderer;
