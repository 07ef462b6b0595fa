//! Benchmarks for the hold pipeline stages.
//!
//! Run with: cargo bench -p holdmesh
//!
//! To compare against baseline:
//! 1. First run: cargo bench -p holdmesh -- --save-baseline main
//! 2. After changes: cargo bench -p holdmesh -- --baseline main

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use holdmesh::lattice::{BOARD_COLS, BOARD_ROWS};
use holdmesh::{
    AnchorLattice, ClipParams, Plane, PointCloud, RegistrationParams, SegmenterParams,
    SpatialSegmenter, clip_to_plane, generate_lattice, register,
};
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Test Data Generation
// =============================================================================

/// Standard board, 2 m wide and 3.4 m tall.
fn board() -> AnchorLattice {
    generate_lattice(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(2.0, 0.0, 0.0),
        Point3::new(0.0, 3.4, 0.0),
        BOARD_ROWS,
        BOARD_COLS,
    )
    .expect("board corners are valid")
}

/// Uniform noise over the board, within 5 cm of the wall.
fn wall_scan(n: usize, seed: u64) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    let points = (0..n)
        .map(|_| {
            Point3::new(
                rng.gen_range(0.0..2.0),
                rng.gen_range(0.0..3.4),
                rng.gen_range(-0.05..0.01),
            )
        })
        .collect();
    PointCloud::new(points)
}

/// Hemispherical hold of radius 5 cm behind the z = 0 plane.
fn hold(n: usize) -> PointCloud {
    let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    let points = (0..n)
        .map(|i| {
            let z = -(i as f64 + 0.5) / n as f64;
            let ring = (1.0 - z * z).sqrt();
            let theta = golden * i as f64;
            Point3::new(ring * theta.cos(), ring * theta.sin(), z) * 0.05
        })
        .collect();
    PointCloud::new(points)
}

/// Gently curved patch for registration.
fn patch(n: usize) -> PointCloud {
    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let (x, y) = (i as f64 / n as f64, j as f64 / n as f64);
            points.push(Point3::new(x, y, 0.05 * (3.0 * x).sin() * y));
        }
    }
    PointCloud::new(points)
}

// =============================================================================
// Segmentation
// =============================================================================

fn bench_segmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmentation");
    let lattice = board();
    let segmenter = SpatialSegmenter::new(SegmenterParams::default());

    for &n in &[10_000usize, 100_000, 1_000_000] {
        let scan = wall_scan(n, 7);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("nearest_anchor", n), &scan, |b, scan| {
            b.iter(|| segmenter.segment(black_box(scan), &lattice))
        });
    }

    group.finish();
}

// =============================================================================
// Clipping
// =============================================================================

fn bench_clipping(c: &mut Criterion) {
    let mut group = c.benchmark_group("clipping");
    let plane = Plane::new(Point3::origin(), Vector3::z()).expect("unit normal");
    let cloud = hold(5_000);

    for &spacing in &[0.01, 0.005, 0.002] {
        let params = ClipParams::default().with_grid_spacing(spacing);
        group.bench_with_input(BenchmarkId::new("backing_grid", spacing), &params, |b, params| {
            b.iter(|| clip_to_plane(black_box(&cloud), &plane, params))
        });
    }

    group.finish();
}

// =============================================================================
// Registration
// =============================================================================

fn bench_registration(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration");
    group.sample_size(10);

    let target = patch(40);
    let mut source = target.clone();
    source.translate(Vector3::new(0.05, -0.03, 0.02));
    let params = RegistrationParams::for_sweep().with_num_samples(1000);

    group.bench_function("sweep_schedule", |b| {
        b.iter(|| register(black_box(&source), &target, &params))
    });

    group.finish();
}

criterion_group!(benches, bench_segmentation, bench_clipping, bench_registration);
criterion_main!(benches);
