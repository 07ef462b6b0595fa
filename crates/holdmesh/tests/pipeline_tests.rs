//! End-to-end tests for the hold reconstruction pipeline.
//!
//! These exercise the stages together, on synthetic holds whose expected
//! shape is known, and through the file layout used by the CLI.

use holdmesh::clip::HalfSpaceSplit;
use holdmesh::io::{MeshReadMode, load_mesh, load_point_cloud, save_mesh, save_point_cloud};
use holdmesh::layout::{Stage, StageLayout};
use holdmesh::{
    HoldError, HoldPipeline, LatticeConfig, Mesh, PipelineConfig, PipelineInputs, Plane,
    PointCloud, RegistrationParams, RegistrationStatus, Rgb, SegmenterParams, SpatialSegmenter,
    Vertex, clip_to_plane, generate_lattice, register,
};
use nalgebra::{Point3, Vector3};
use tempfile::tempdir;

/// Axis-aligned box with outward winding.
fn cuboid(min: [f64; 3], max: [f64; 3]) -> Mesh {
    let mut mesh = Mesh::new();
    for i in 0..8 {
        let x = if i & 1 == 0 { min[0] } else { max[0] };
        let y = if i & 2 == 0 { min[1] } else { max[1] };
        let z = if i & 4 == 0 { min[2] } else { max[2] };
        mesh.vertices.push(Vertex::from_coords(x, y, z));
    }
    mesh.faces = vec![
        [0, 2, 3],
        [0, 3, 1],
        [4, 5, 7],
        [4, 7, 6],
        [0, 1, 5],
        [0, 5, 4],
        [2, 6, 7],
        [2, 7, 3],
        [1, 3, 7],
        [1, 7, 5],
        [0, 4, 6],
        [0, 6, 2],
    ];
    mesh
}

/// Flat square in the z = 0 plane, wound so its normal is +z.
fn plane_mesh(half: f64) -> Mesh {
    let mut mesh = Mesh::new();
    for (x, y) in [(-half, -half), (half, -half), (half, half), (-half, half)] {
        mesh.vertices.push(Vertex::from_coords(x, y, 0.0));
    }
    mesh.faces = vec![[0, 1, 2], [0, 2, 3]];
    mesh
}

/// Dome of radius `r` bulging from the wall (towards -z) around `center`,
/// plus a few stray points in front of the wall.
fn dome(center: Point3<f64>, r: f64, color: Rgb) -> (Vec<Point3<f64>>, Vec<Rgb>) {
    let golden = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
    let n = 900;
    let mut points = Vec::with_capacity(n + 3);
    for i in 0..n {
        // Lower hemisphere only: z from -r to just below 0.
        let z = -(i as f64 + 0.5) / n as f64;
        let ring = (1.0 - z * z).sqrt();
        let theta = golden * i as f64;
        points.push(center + Vector3::new(ring * theta.cos(), ring * theta.sin(), z) * r);
    }
    for k in 0..3 {
        points.push(center + Vector3::new(0.01 * k as f64, 0.0, 0.02));
    }
    let colors = vec![color; points.len()];
    (points, colors)
}

fn two_by_two_config(spacing: f64) -> PipelineConfig {
    PipelineConfig {
        lattice: Some(LatticeConfig {
            origin: [0.0, 0.0, 0.0],
            edge_u: [spacing, 0.0, 0.0],
            edge_v: [0.0, spacing, 0.0],
            rows: 2,
            cols: 2,
        }),
        ..Default::default()
    }
}

/// Scan with holds on two of the four anchors of a 2x2 lattice.
fn two_hold_scan() -> PointCloud {
    let (mut points, mut colors) = dome(Point3::new(0.0, 0.0, 0.0), 0.05, Rgb::new(1.0, 0.2, 0.2));
    let (p2, c2) = dome(Point3::new(0.3, 0.3, 0.0), 0.05, Rgb::new(0.2, 0.2, 1.0));
    points.extend(p2);
    colors.extend(c2);
    PointCloud::with_colors(points, colors).unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn scenario_a_clip_keeps_points_behind_plane() {
    let plane = Plane::new(Point3::origin(), Vector3::z()).unwrap();
    let cloud = PointCloud::new(vec![
        Point3::new(0.0, 0.0, 0.5),
        Point3::new(1.0, 0.0, -0.5),
        Point3::new(1.0, 1.0, 0.25),
        Point3::new(0.0, 1.0, -0.25),
    ]);

    let split = HalfSpaceSplit::new(&cloud, &plane);
    assert_eq!(split.kept, vec![1, 3]);
    assert_eq!(split.discarded, vec![0, 2]);

    // Two kept points have no footprint to back.
    assert!(matches!(
        clip_to_plane(&cloud, &plane, &Default::default()),
        Err(HoldError::Geometry { .. })
    ));
}

#[test]
fn scenario_b_identical_scans_register_at_identity() {
    let mut points = Vec::new();
    for i in 0..12 {
        for j in 0..12 {
            let (x, y) = (i as f64 * 0.05, j as f64 * 0.05);
            points.push(Point3::new(x, y, 0.02 * (x * 7.0).sin()));
        }
    }
    let cloud = PointCloud::new(points);
    let params = RegistrationParams::default().with_num_samples(1000);
    let result = register(&cloud, &cloud, &params).unwrap();

    assert_eq!(result.status, RegistrationStatus::Converged);
    assert!(result.loss < 1e-9);
    let [w, x, y, z] = result.transform.quaternion();
    assert!((w.abs() - 1.0).abs() < 1e-6);
    assert!(x.abs() < 1e-6 && y.abs() < 1e-6 && z.abs() < 1e-6);
    assert!(result.transform.translation.norm() < 1e-6);
    assert!((result.transform.scale - 1.0).abs() < 1e-6);
}

#[test]
fn scenario_c_corner_points_map_to_their_anchors() {
    let lattice = generate_lattice(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 0.0, 0.0),
        Point3::new(0.0, 1.0, 0.0),
        2,
        2,
    )
    .unwrap();
    let cloud = PointCloud::new(lattice.points().to_vec());

    let segmentation = SpatialSegmenter::new(SegmenterParams::default())
        .segment(&cloud, &lattice)
        .unwrap();
    assert_eq!(segmentation.labels, vec![0, 1, 2, 3]);
    assert!(segmentation.empty.is_empty());

    // Reversed lettering: the origin corner is the last column letter and
    // the highest row number.
    let names: Vec<&str> = segmentation.segments.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["B2", "B1", "A2", "A1"]);
    for segment in &segmentation.segments {
        assert_eq!(segment.indices, vec![segment.anchor]);
    }
}

// =============================================================================
// Full pipeline
// =============================================================================

#[test]
fn pipeline_reconstructs_domes_behind_the_wall() {
    let config = two_by_two_config(0.3);
    let pipeline = HoldPipeline::new(config);
    let lattice = pipeline.lattice(None).unwrap();
    let plane = Plane::from_mesh(&plane_mesh(1.0)).unwrap();
    let wall = cuboid([-1.0, -1.0, -0.02], [1.0, 1.0, 0.02]);

    let run = pipeline.run(&two_hold_scan(), &lattice, &plane, &wall).unwrap();

    assert_eq!(run.segments.len(), 2);
    assert_eq!(run.segmentation.empty.len(), 2);
    for (_, clip) in &run.clipped.successes {
        assert_eq!(clip.discarded, 3);
        assert!(clip.backing > 0);
    }
    assert!(run.reconstructed.is_complete(), "{:?}", run.reconstructed.summary());
    assert_eq!(run.refined.successes.len(), 2);

    for (name, refined) in &run.refined.successes {
        let mesh = &refined.mesh;
        assert!(!mesh.is_empty(), "{name} is empty");
        assert!(mesh.validate_indices().is_ok());
        assert!(mesh.has_colors());
        for v in &mesh.vertices {
            assert!(v.position.z <= 1e-6, "{name} has a vertex in front of the wall");
        }
    }

    let report = run.report();
    assert_eq!(report.refined.len(), 2);
    assert_eq!(report.stages.len(), 4);
    assert_eq!(report.points, two_hold_scan().len());
}

#[test]
fn pipeline_run_in_dir_writes_every_stage() {
    let dir = tempdir().unwrap();
    let scan = dir.path().join("scan.ply");
    let plane = dir.path().join("plane.ply");
    let wall = dir.path().join("wall.ply");
    save_point_cloud(&two_hold_scan(), &scan).unwrap();
    save_mesh(&plane_mesh(1.0), &plane).unwrap();
    save_mesh(&cuboid([-1.0, -1.0, -0.02], [1.0, 1.0, 0.02]), &wall).unwrap();

    let work = dir.path().join("work");
    let report = HoldPipeline::new(two_by_two_config(0.3))
        .run_in_dir(&work, &PipelineInputs::new(&scan, &plane, &wall))
        .unwrap();

    let layout = StageLayout::default();
    assert_eq!(report.segments, 2);
    for name in &report.refined {
        assert!(layout.path(&work, Stage::Segmented, name).is_file());
        assert!(layout.path(&work, Stage::Clipped, name).is_file());
        assert!(layout.path(&work, Stage::Reconstructed, name).is_file());
        let refined = load_mesh(&layout.path(&work, Stage::Refined, name), MeshReadMode::Strict).unwrap();
        assert!(refined.face_count() > 0);
    }

    // Segmented clouds keep their colours through the file round trip.
    let segmented = load_point_cloud(&layout.path(&work, Stage::Segmented, "B2")).unwrap();
    assert!(segmented.has_colors());
}

#[test]
fn pipeline_without_lattice_aborts() {
    let dir = tempdir().unwrap();
    let inputs = PipelineInputs::new(
        dir.path().join("scan.ply"),
        dir.path().join("plane.ply"),
        dir.path().join("wall.ply"),
    );
    let err = HoldPipeline::default()
        .run_in_dir(dir.path().join("work"), &inputs)
        .unwrap_err();
    assert!(matches!(err, HoldError::InvalidConfig { .. }));
    assert!(!dir.path().join("work").exists());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn config_file_drives_the_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.toml");
    std::fs::write(
        &path,
        r#"
        threads = 2

        [lattice]
        edge_u = [0.3, 0.0, 0.0]
        edge_v = [0.0, 0.3, 0.0]
        rows = 2
        cols = 2

        [clip]
        grid_spacing = 0.02

        [layout]
        reconstructed = "meshes"
        "#,
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.threads, Some(2));
    assert_eq!(config.layout.reconstructed, "meshes");
    assert_eq!(config.layout.refined, "refined");

    let pipeline = HoldPipeline::new(config);
    let lattice = pipeline.lattice(None).unwrap();
    assert_eq!(lattice.names(), ["B2", "B1", "A2", "A1"]);
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    std::fs::write(&path, r#"{ "registration": { "min_scale": -1.0 } }"#).unwrap();
    assert!(matches!(
        PipelineConfig::load(&path),
        Err(HoldError::InvalidConfig { .. })
    ));
}
