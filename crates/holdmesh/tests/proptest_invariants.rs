//! Property-based tests for the pipeline invariants.
//!
//! Run with: cargo test -p holdmesh --test proptest_invariants

use holdmesh::clip::HalfSpaceSplit;
use holdmesh::registration::RegistrationParams;
use holdmesh::{
    ClipParams, Mesh, Plane, PointCloud, SegmenterParams, SpatialSegmenter, clip_to_plane,
    generate_lattice, reconstruct_cluster, register,
};
use nalgebra::{Point3, Vector3};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_point(range: f64) -> impl Strategy<Value = Point3<f64>> {
    prop::array::uniform3(-range..range).prop_map(Point3::from)
}

fn arb_cloud(min: usize, max: usize) -> impl Strategy<Value = Vec<Point3<f64>>> {
    prop::collection::vec(arb_point(1.0), min..=max)
}

/// Unit normal away from the degenerate zero vector.
fn arb_normal() -> impl Strategy<Value = Vector3<f64>> {
    prop::array::uniform3(-1.0..1.0f64)
        .prop_filter("non-degenerate normal", |v| Vector3::from(*v).norm() > 0.1)
        .prop_map(|v| Vector3::from(v).normalize())
}

/// Three corners spanning a well-conditioned parallelogram.
fn arb_corners() -> impl Strategy<Value = (Point3<f64>, Point3<f64>, Point3<f64>)> {
    (arb_point(5.0), 0.5..3.0f64, 0.5..3.0f64, 0.0..std::f64::consts::TAU).prop_map(
        |(origin, a, b, angle)| {
            let u = Vector3::new(angle.cos(), angle.sin(), 0.0);
            let v = Vector3::new(-angle.sin(), angle.cos(), 0.3);
            (origin, origin + u * a, origin + v * b)
        },
    )
}

fn sphere_cloud(n: usize, radius: f64) -> PointCloud {
    let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    let mut points = Vec::with_capacity(n);
    let mut normals = Vec::with_capacity(n);
    for i in 0..n {
        let y = 1.0 - 2.0 * (i as f64 + 0.5) / n as f64;
        let r = (1.0 - y * y).sqrt();
        let theta = golden * i as f64;
        let dir = Vector3::new(r * theta.cos(), y, r * theta.sin());
        points.push(Point3::from(dir * radius));
        normals.push(dir);
    }
    let mut cloud = PointCloud::new(points);
    cloud.set_normals(normals).unwrap();
    cloud
}

fn assert_indices_valid(mesh: &Mesh) {
    let n = mesh.vertices.len() as u32;
    for face in &mesh.faces {
        for &i in face {
            assert!(i < n, "index {i} out of range for {n} vertices");
        }
    }
}

// =============================================================================
// Lattice
// =============================================================================

proptest! {
    #[test]
    fn lattice_is_deterministic(
        (p1, p2, p3) in arb_corners(),
        rows in 2usize..20,
        cols in 2usize..12,
    ) {
        let a = generate_lattice(p1, p2, p3, rows, cols).unwrap();
        let b = generate_lattice(p1, p2, p3, rows, cols).unwrap();
        prop_assert_eq!(a.len(), rows * cols);
        prop_assert_eq!(a.points(), b.points());
        prop_assert_eq!(a.names(), b.names());

        // Corners: first anchor, last of first column, first of last column.
        prop_assert_eq!(a.points()[0], p1);
        prop_assert_eq!(a.points()[rows - 1], p3);
        prop_assert_eq!(a.points()[(cols - 1) * rows], p2);
    }

    #[test]
    fn lattice_names_are_unique_and_invertible(rows in 2usize..20, cols in 2usize..27) {
        let lattice = generate_lattice(
            Point3::origin(),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            rows,
            cols,
        )
        .unwrap();
        for (i, name) in lattice.names().iter().enumerate() {
            prop_assert_eq!(lattice.index_of(name), Some(i));
        }
    }
}

// =============================================================================
// Segmentation
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn segmentation_is_a_partition(points in arb_cloud(1, 400), rows in 2usize..6, cols in 2usize..6) {
        let lattice = generate_lattice(
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(-1.0, 1.0, 0.0),
            rows,
            cols,
        )
        .unwrap();
        let cloud = PointCloud::new(points);
        let segmentation = SpatialSegmenter::new(SegmenterParams::default())
            .segment(&cloud, &lattice)
            .unwrap();

        let mut seen = vec![0usize; cloud.len()];
        for segment in &segmentation.segments {
            for &i in &segment.indices {
                seen[i] += 1;
                prop_assert_eq!(segmentation.labels[i], segment.anchor);
            }
        }
        prop_assert!(seen.iter().all(|&count| count == 1));
        prop_assert_eq!(
            segmentation.segments.len() + segmentation.empty.len(),
            lattice.len()
        );

        // Nearest anchor: no other anchor is strictly closer.
        for (i, p) in cloud.points.iter().enumerate() {
            let own = (lattice.points()[segmentation.labels[i]] - p).norm_squared();
            for anchor in lattice.points() {
                prop_assert!(own <= (anchor - p).norm_squared() + 1e-12);
            }
        }
    }
}

// =============================================================================
// Clipping
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn clip_respects_half_space(points in arb_cloud(0, 300), normal in arb_normal(), anchor in arb_point(0.5)) {
        let plane = Plane::new(anchor, normal).unwrap();
        let cloud = PointCloud::new(points);
        let split = HalfSpaceSplit::new(&cloud, &plane);

        prop_assert_eq!(split.kept.len() + split.discarded.len(), cloud.len());
        for &i in &split.kept {
            prop_assert!(plane.signed_distance(&cloud.points[i]) <= 0.0);
        }
        for &i in &split.discarded {
            prop_assert!(plane.signed_distance(&cloud.points[i]) > 0.0);
        }
    }

    #[test]
    fn backing_points_lie_on_plane(points in arb_cloud(20, 200), normal in arb_normal()) {
        let plane = Plane::new(Point3::origin(), normal).unwrap();
        let cloud = PointCloud::new(points);
        let params = ClipParams::default().with_grid_spacing(0.1);

        // Random clouds may leave too few points or a sliver footprint.
        if let Ok(result) = clip_to_plane(&cloud, &plane, &params) {
            prop_assert_eq!(result.cloud.len(), result.kept + result.backing);
            for p in &result.cloud.points[..result.kept] {
                prop_assert!(plane.signed_distance(p) <= 0.0);
            }
            for p in &result.cloud.points[result.kept..] {
                prop_assert!(plane.signed_distance(p).abs() < 1e-9);
            }
        }
    }
}

// =============================================================================
// Meshes
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn reconstructed_mesh_indices_are_valid(n in 600usize..1200, radius in 0.05..2.0f64) {
        let cloud = sphere_cloud(n, radius);
        let params = holdmesh::ReconstructParams::fast();
        let result = reconstruct_cluster(&cloud, &params).unwrap();
        assert_indices_valid(&result.mesh);
        prop_assert!(result.mesh.face_count() > 0);
    }
}

// =============================================================================
// Registration
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn registration_keeps_unit_quaternion_and_scale_floor(
        offset in prop::array::uniform3(-0.2..0.2f64),
        seed in 0u64..1000,
    ) {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let (x, y) = (i as f64 * 0.1, j as f64 * 0.1);
                points.push(Point3::new(x, y, 0.05 * (3.0 * x).sin() * y));
            }
        }
        let target = PointCloud::new(points);
        let mut source = target.clone();
        source.translate(Vector3::from(offset));

        let params = RegistrationParams::default()
            .with_max_iterations(60)
            .with_num_samples(300)
            .with_seed(seed)
            .with_history();
        let result = register(&source, &target, &params).unwrap();

        let mut best = f64::INFINITY;
        for record in &result.history {
            let norm = record.raw_quaternion.iter().map(|c| c * c).sum::<f64>().sqrt();
            prop_assert!((norm - 1.0).abs() < 1e-6);
            prop_assert!(record.transform.scale >= params.min_scale);
            prop_assert!(record.best_loss <= best);
            best = record.best_loss;
        }
        prop_assert!(result.transform.scale >= params.min_scale);
    }
}
