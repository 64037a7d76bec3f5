//! Parallel rendering demo: orbits a camera around a synthetic sphere volume
//! and writes the last composited frame as PNG.
//!
//! Usage: cargo run --release --bin parbrick_demo -- [OPTIONS]
//!
//! Options:
//!   --frames <N>      Frames to render (default: 36)
//!   --workers <N>     Render workers / BSP leaves (default: 4)
//!   --size <N>        Volume edge length in voxels (default: 64)
//!   --brick <N>       Brick edge length in voxels (default: 16)
//!   --config <PATH>   Load a renderer config (JSON) instead of --workers
//!   --out <PATH>      Output image (default: parbrick.png)
//!   --serve <ADDR>    Run a render server on ADDR instead of rendering
//!   --show-bricks     Log leaf outlines instead of rendering

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glam::{UVec3, Vec3};

use parbrick::core::camera::Camera;
use parbrick::math::{Rect, VoxelBox};
use parbrick::render::{ParamValue, ParameterId, RendererFactory, SplatRenderer, TfPoint, TransferFunction, serve_renderer};
use parbrick::volume::{VolumeDesc, make_bricks_with};
use parbrick::{ParallelBrickRenderer, RendererConfig};

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .format_timestamp_millis()
    .init();

    let args: Vec<String> = std::env::args().collect();
    let frames = parse_usize_arg(&args, "--frames").unwrap_or(36);
    let workers = parse_usize_arg(&args, "--workers").unwrap_or(4);
    let size = parse_u32_arg(&args, "--size").unwrap_or(64);
    let brick = parse_u32_arg(&args, "--brick").unwrap_or(16);
    let config_path = parse_str_arg(&args, "--config").map(PathBuf::from);
    let out = parse_str_arg(&args, "--out").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("parbrick.png"));
    let serve = parse_str_arg(&args, "--serve");
    let show_bricks = args.iter().any(|a| a == "--show-bricks");

    let volume = VolumeDesc::new(UVec3::splat(size)).with_dist(Vec3::splat(1.0 / size as f32));
    let bricks = make_bricks_with(&volume, brick, |voxels| sphere_density(voxels, size));

    if let Some(addr) = serve {
        let node = serve_renderer(Box::new(SplatRenderer::new(bricks)), &addr).expect("Failed to start render server");
        println!("Serving splat renderer on {}", node.local_addr());
        loop {
            std::thread::park();
        }
    }

    let mut config = match &config_path {
        Some(path) => RendererConfig::load_sync(path).expect("Failed to load config"),
        None => RendererConfig::with_workers(workers),
    };
    if config_path.is_none() {
        config.brick_renderer = "splat".to_string();
        config.brick_size = brick;
    }

    println!("=== Parbrick Demo ===");
    println!("Volume:  {}^3 voxels, {} bricks", size, bricks.len());
    println!("Workers: {} ({:?})", config.leaf_count(), config.partition);
    println!("Frames:  {}", frames);
    println!();

    let factory = Arc::new(RendererFactory::default());
    let mut renderer = ParallelBrickRenderer::new(volume, bricks, &config, factory).expect("Failed to start renderer");
    renderer
        .update_transfer_function(&TransferFunction::new(vec![
            TfPoint { value: 0.0, color: [0.0, 0.0, 0.0, 0.0] },
            TfPoint { value: 0.3, color: [0.2, 0.3, 0.9, 0.2] },
            TfPoint { value: 1.0, color: [1.0, 0.8, 0.3, 0.9] },
        ]))
        .expect("Failed to set transfer function");
    renderer
        .set_parameter(ParameterId::Quality, &ParamValue::Float(1.0))
        .expect("Failed to set quality");
    renderer.set_show_bricks(show_bricks);

    let [width, height] = config.viewport;
    let mut camera = Camera::new(Vec3::new(0.0, 0.0, 2.5), 45.0, width as f32 / height as f32);
    let start = Instant::now();
    for i in 0..frames {
        let yaw = i as f32 / frames.max(1) as f32 * std::f32::consts::TAU;
        camera.orbit(Vec3::ZERO, 2.5, yaw, 0.35);
        let state = camera.state(Rect::new(0, 0, width as i32, height as i32));
        match renderer.render_frame(&state) {
            Ok(_) => log::info!("Frame {}: leaf order {:?}", i, renderer.last_leaf_order()),
            Err(e) => log::error!("Frame {} failed: {}", i, e),
        }
    }
    let elapsed = start.elapsed();
    println!(
        "Rendered {} frames in {:.2}s ({:.1} ms/frame)",
        frames,
        elapsed.as_secs_f64(),
        elapsed.as_secs_f64() * 1000.0 / frames.max(1) as f64
    );

    if show_bricks {
        println!("{} outline segments", renderer.outlines().len());
        for [a, b] in renderer.outlines() {
            log::debug!("{:?} -> {:?}", a, b);
        }
    } else {
        renderer.frame().save_png(&out).expect("Failed to write image");
        println!("Wrote {}", out.display());
    }
    renderer.shutdown();
}

/// Value range of a radial density field inside one brick
fn sphere_density(voxels: &VoxelBox, size: u32) -> (f32, f32) {
    let center = Vec3::splat(size as f32 * 0.5);
    let radius = size as f32 * 0.45;
    let lo = voxels.min.as_vec3();
    let hi = voxels.max.as_vec3();
    let nearest = center.clamp(lo, hi);
    let farthest = Vec3::select(center.cmplt((lo + hi) * 0.5), hi, lo);
    let density = |p: Vec3| (1.0 - p.distance(center) / radius).clamp(0.0, 1.0);
    (density(farthest), density(nearest))
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_usize_arg(args: &[String], flag: &str) -> Option<usize> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
