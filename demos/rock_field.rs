//! Headless rock field
//!
//! Clusters a sphere "rock" into meshlets, scatters a few thousand copies
//! behind a wall and runs a handful of frames through the two-pass culler
//! on a real GPU. Prints the per-frame statistics.
//!
//! Usage: cargo run --example rock_field [config.toml]

use cgmath::Point3;
use hearth_meshlet::camera::init_camera_looking_at;
use hearth_meshlet::geometry::{create_quad, create_uv_sphere};
use hearth_meshlet::instance::{instance_from_trs, scatter_instances, MeshletInstance, ScatterConfig};
use hearth_meshlet::{
    build_cull_camera, build_meshlets, EngineResult, ErrorContext, MeshletEngineConfig, TwoPassCullingOrchestrator,
    WgpuSurface,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FRAMES: usize = 4;

fn run(config: &MeshletEngineConfig) -> EngineResult<()> {
    let mut surface = WgpuSurface::new_headless()?;
    println!("Adapter: {}", surface.adapter_info().name);

    let rock = build_meshlets(&create_uv_sphere(1.0, 24, 48), &config.cluster)
        .context("clustering the rock")?;
    let wall = build_meshlets(&create_quad([0.0, 0.0, 0.0], 30.0, 8.0), &config.cluster)
        .context("clustering the wall")?;
    println!(
        "Rock: {} triangles in {} meshlets",
        rock.report.triangle_count,
        rock.meshlet_count()
    );

    let rocks = scatter_instances(&ScatterConfig {
        count: 4096,
        extent: 60.0,
        ..Default::default()
    });
    let walls: Vec<MeshletInstance> = vec![instance_from_trs([0.0, 4.0, 20.0].into(), 0.0, 1.0)];

    let mut orchestrator = TwoPassCullingOrchestrator::new(&mut surface, WIDTH, HEIGHT, config)?;
    orchestrator.register_group(&mut surface, &wall, &walls)?;
    orchestrator.register_group(&mut surface, &rock, &rocks)?;

    let mut camera = init_camera_looking_at(Point3::new(0.0, 4.0, 40.0), Point3::new(0.0, 2.0, 0.0));
    camera.aspect_ratio = WIDTH as f32 / HEIGHT as f32;
    let cull_camera = build_cull_camera(&camera);

    println!("{:>6} {:>10} {:>10} {:>12} {:>12}", "frame", "drawn", "culled", "vertices", "triangles");
    for _ in 0..FRAMES {
        let frame = orchestrator.frame_index();
        orchestrator.cull_and_draw(&mut surface, &cull_camera, &[])?;
        let stats = orchestrator.read_back_stats(&mut surface)?;
        println!(
            "{:>6} {:>10} {:>10} {:>12} {:>12}",
            frame, stats.drawn_meshlets, stats.culled_meshlets, stats.drawn_vertices, stats.drawn_triangles
        );
    }

    Ok(())
}

fn main() {
    env_logger::init();

    println!("Hearth Meshlet - Rock Field");
    println!("===========================");

    let config = match std::env::args().nth(1) {
        Some(path) => match MeshletEngineConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => MeshletEngineConfig::default(),
    };

    if let Err(e) = run(&config) {
        log::error!("Rock field failed: {}", e);
        std::process::exit(1);
    }
}
