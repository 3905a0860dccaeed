use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hearth_meshlet::culling::{build_pyramid_cpu, reduce_level_cpu};
use hearth_meshlet::geometry::{build_adjacency, create_planar_grid, create_uv_sphere};
use hearth_meshlet::{build_meshlets, build_meshlets_parallel, ClusterConfig, MeshData};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn meshes() -> Vec<(&'static str, MeshData)> {
    vec![
        ("sphere_64x128", create_uv_sphere(1.0, 64, 128)),
        ("grid_128x128", create_planar_grid(128, 128, 1.0)),
    ]
}

fn bench_adjacency(c: &mut Criterion) {
    let mut group = c.benchmark_group("adjacency");
    for (name, mesh) in meshes() {
        group.throughput(Throughput::Elements(mesh.triangle_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &mesh, |b, mesh| {
            b.iter(|| build_adjacency(&mesh.indices))
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let config = ClusterConfig::default();
    let mut group = c.benchmark_group("build_meshlets");
    for (name, mesh) in meshes() {
        group.throughput(Throughput::Elements(mesh.triangle_count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &mesh, |b, mesh| {
            b.iter(|| build_meshlets(mesh, &config))
        });
    }
    group.finish();

    let batch: Vec<MeshData> = (0..8).map(|_| create_uv_sphere(1.0, 32, 64)).collect();
    c.bench_function("build_meshlets_parallel/8_spheres", |b| {
        b.iter(|| build_meshlets_parallel(&batch, &config))
    });
}

fn bench_pyramid(c: &mut Criterion) {
    let (width, height) = (1920u32, 1080u32);
    let mut rng = StdRng::seed_from_u64(7);
    let depth: Vec<f32> = (0..width * height).map(|_| rng.gen_range(0.0..1.0)).collect();

    let mut group = c.benchmark_group("hiz");
    group.throughput(Throughput::Elements((width * height) as u64));
    group.bench_function("reduce_level_1080p", |b| b.iter(|| reduce_level_cpu(&depth, width, height)));
    group.bench_function("build_pyramid_1080p", |b| b.iter(|| build_pyramid_cpu(&depth, width, height, 2)));
    group.finish();
}

criterion_group!(benches, bench_adjacency, bench_build, bench_pyramid);
criterion_main!(benches);
