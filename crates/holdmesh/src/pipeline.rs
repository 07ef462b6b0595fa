//! End-to-end orchestration of the reconstruction stages.
//!
//! [`HoldPipeline`] chains segmentation, plane clipping, conditioning,
//! reconstruction and refinement. Structural problems (no lattice, a wall
//! plane that cannot be derived) abort before any cluster work starts;
//! everything after segmentation runs per cluster and collects failures in
//! a [`BatchReport`] instead.
//!
//! # Example
//!
//! ```no_run
//! use holdmesh::pipeline::{HoldPipeline, PipelineInputs};
//! use holdmesh::PipelineConfig;
//!
//! let config = PipelineConfig::load("pipeline.toml").unwrap();
//! let inputs = PipelineInputs::new("scan.ply", "plane.ply", "wall.ply")
//!     .with_lattice("lattice.ply");
//!
//! let report = HoldPipeline::new(config).run_in_dir("work", &inputs).unwrap();
//! println!("{} holds refined", report.refined.len());
//! ```

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchReport, BatchSummary, in_pool};
use crate::clip::{ClipResult, clip_batch};
use crate::condition::{ConditionedCloud, condition_batch};
use crate::config::PipelineConfig;
use crate::error::{HoldError, HoldResult};
use crate::io::{MeshReadMode, load_mesh, load_point_cloud, save_mesh, save_point_cloud};
use crate::lattice::{AnchorLattice, BOARD_COLS, BOARD_ROWS};
use crate::layout::{Stage, cluster_names_in};
use crate::plane::Plane;
use crate::pointcloud::PointCloud;
use crate::reconstruct::{Reconstruction, reconstruct_batch};
use crate::refine::{RefinedMesh, refine_batch};
use crate::segment::{Segmentation, SpatialSegmenter};
use crate::tracing_ext::OperationTimer;
use crate::types::Mesh;

/// Input files of a directory run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInputs {
    /// Coloured wall scan.
    pub scan: PathBuf,
    /// Flat mesh on the wall surface; its faces define the clipping plane.
    pub plane: PathBuf,
    /// Closed wall solid used to rebuild the back faces.
    pub wall: PathBuf,
    /// Anchor points in lattice order. When absent the configured corners
    /// are used.
    pub lattice: Option<PathBuf>,
}

impl PipelineInputs {
    pub fn new(scan: impl Into<PathBuf>, plane: impl Into<PathBuf>, wall: impl Into<PathBuf>) -> Self {
        Self {
            scan: scan.into(),
            plane: plane.into(),
            wall: wall.into(),
            lattice: None,
        }
    }

    pub fn with_lattice(mut self, lattice: impl Into<PathBuf>) -> Self {
        self.lattice = Some(lattice.into());
        self
    }
}

/// Every intermediate product of an in-memory run.
#[derive(Debug)]
pub struct PipelineRun {
    pub segmentation: Segmentation,
    /// Segmented clouds, named after their anchors.
    pub segments: Vec<(String, PointCloud)>,
    pub clipped: BatchReport<ClipResult>,
    pub conditioned: BatchReport<ConditionedCloud>,
    pub reconstructed: BatchReport<Reconstruction>,
    pub refined: BatchReport<RefinedMesh>,
}

impl PipelineRun {
    /// Serializable digest of the run.
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            points: self.segmentation.labels.len(),
            segments: self.segments.len(),
            empty_anchors: self.segmentation.empty.clone(),
            stages: vec![
                self.clipped.summary(),
                self.conditioned.summary(),
                self.reconstructed.summary(),
                self.refined.summary(),
            ],
            refined: self.refined.successes.iter().map(|(n, _)| n.clone()).collect(),
            boolean_fallbacks: self
                .refined
                .successes
                .iter()
                .filter(|(_, r)| r.report.boolean_error.is_some())
                .map(|(n, _)| n.clone())
                .collect(),
        }
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    /// Points in the input scan.
    pub points: usize,
    /// Anchors that received points.
    pub segments: usize,
    /// Anchors that received none.
    pub empty_anchors: Vec<String>,
    /// One summary per batch stage, in pipeline order.
    pub stages: Vec<BatchSummary>,
    /// Clusters that made it through refinement.
    pub refined: Vec<String>,
    /// Refined clusters whose boolean step fell back to the clipped mesh.
    pub boolean_fallbacks: Vec<String>,
}

impl PipelineReport {
    /// Whether every stage succeeded on every cluster.
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.failed == 0)
    }

    pub fn failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

/// The reconstruction pipeline.
#[derive(Debug, Clone, Default)]
pub struct HoldPipeline {
    config: PipelineConfig,
}

impl HoldPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Partition `cloud` by nearest anchor.
    ///
    /// The segmenter's own thread count wins over the pipeline-wide one.
    pub fn segment(&self, cloud: &PointCloud, lattice: &AnchorLattice) -> HoldResult<Segmentation> {
        let mut params = self.config.segment.clone();
        if params.threads.is_none() {
            params.threads = self.config.threads;
        }
        SpatialSegmenter::new(params).segment(cloud, lattice)
    }

    /// Clip every cluster against `plane` and add backing points.
    pub fn clip(&self, clouds: Vec<(String, PointCloud)>, plane: &Plane) -> HoldResult<BatchReport<ClipResult>> {
        in_pool(self.config.threads, || clip_batch(clouds, plane, &self.config.clip))
    }

    /// Estimate normals and drop outliers on every cluster.
    pub fn condition(&self, clouds: Vec<(String, PointCloud)>) -> HoldResult<BatchReport<ConditionedCloud>> {
        in_pool(self.config.threads, || condition_batch(clouds, &self.config.condition))
    }

    /// Reconstruct a surface for every conditioned cluster.
    pub fn reconstruct(&self, clouds: Vec<(String, PointCloud)>) -> HoldResult<BatchReport<Reconstruction>> {
        in_pool(self.config.threads, || reconstruct_batch(clouds, &self.config.reconstruct))
    }

    /// Refine every mesh against the wall plane and wall solid.
    pub fn refine(
        &self,
        meshes: Vec<(String, Mesh)>,
        plane: &Plane,
        wall: &Mesh,
    ) -> HoldResult<BatchReport<RefinedMesh>> {
        if wall.is_empty() {
            return Err(HoldError::empty_mesh("wall mesh has no faces"));
        }
        wall.validate_indices()?;

        in_pool(self.config.threads, || {
            refine_batch(meshes, plane, wall, &self.config.refine)
        })
    }

    /// Run every stage in memory.
    ///
    /// # Errors
    /// Structural problems only: an empty scan, an empty lattice, an
    /// unusable wall mesh or thread count. Per-cluster failures land in the
    /// stage reports.
    pub fn run(
        &self,
        cloud: &PointCloud,
        lattice: &AnchorLattice,
        plane: &Plane,
        wall: &Mesh,
    ) -> HoldResult<PipelineRun> {
        let _timer = OperationTimer::new("pipeline");
        if wall.is_empty() {
            return Err(HoldError::empty_mesh("wall mesh has no faces"));
        }

        let segmentation = self.segment(cloud, lattice)?;
        let segments = segmentation.materialize_all(cloud);

        let clipped = self.clip(segments.clone(), plane)?;
        let conditioned = self.condition(
            clipped
                .successes
                .iter()
                .map(|(n, c)| (n.clone(), c.cloud.clone()))
                .collect(),
        )?;
        let reconstructed = self.reconstruct(
            conditioned
                .successes
                .iter()
                .map(|(n, c)| (n.clone(), c.cloud.clone()))
                .collect(),
        )?;
        let refined = self.refine(
            reconstructed
                .successes
                .iter()
                .map(|(n, r)| (n.clone(), r.mesh.clone()))
                .collect(),
            plane,
            wall,
        )?;

        let run = PipelineRun {
            segmentation,
            segments,
            clipped,
            conditioned,
            reconstructed,
            refined,
        };
        let failed: usize = [
            run.clipped.failures.len(),
            run.conditioned.failures.len(),
            run.reconstructed.failures.len(),
            run.refined.failures.len(),
        ]
        .iter()
        .sum();
        info!(
            segments = run.segments.len(),
            refined = run.refined.successes.len(),
            failed,
            "Pipeline complete"
        );
        Ok(run)
    }

    /// Resolve the anchor lattice from a file or the configured corners.
    ///
    /// A lattice file holds the anchors in lattice order; its grid size
    /// comes from the configured lattice, or the standard board size.
    ///
    /// # Errors
    /// `InvalidConfig` when there is neither a file nor configured corners.
    pub fn lattice(&self, file: Option<&Path>) -> HoldResult<AnchorLattice> {
        match (file, &self.config.lattice) {
            (Some(path), configured) => {
                let (rows, cols) = configured
                    .as_ref()
                    .map_or((BOARD_ROWS, BOARD_COLS), |l| (l.rows, l.cols));
                let points = load_point_cloud(path)?.points;
                AnchorLattice::from_points(points, rows, cols)
            }
            (None, Some(configured)) => configured.generate(),
            (None, None) => Err(HoldError::invalid_config(
                "no lattice: pass a lattice file or configure [lattice] corners",
            )),
        }
    }

    /// Run every stage on files, writing each stage under `root`.
    ///
    /// Inputs are all read, and the lattice and plane resolved, before any
    /// output is written.
    pub fn run_in_dir(&self, root: impl AsRef<Path>, inputs: &PipelineInputs) -> HoldResult<PipelineReport> {
        let root = root.as_ref();
        let lattice = self.lattice(inputs.lattice.as_deref())?;
        let plane = Plane::from_mesh(&load_mesh(&inputs.plane, MeshReadMode::PostProcess)?)?;
        let wall = load_mesh(&inputs.wall, MeshReadMode::PostProcess)?;
        let cloud = load_point_cloud(&inputs.scan)?;

        let layout = &self.config.layout;
        layout.ensure_dirs(root)?;

        let run = self.run(&cloud, &lattice, &plane, &wall)?;

        save_named_clouds(&layout.stage_dir(root, Stage::Segmented), &run.segments)?;
        for (name, clip) in &run.clipped.successes {
            save_point_cloud(&clip.cloud, &layout.path(root, Stage::Clipped, name))?;
        }
        for (name, reconstruction) in &run.reconstructed.successes {
            save_mesh(&reconstruction.mesh, &layout.path(root, Stage::Reconstructed, name))?;
        }
        for (name, refined) in &run.refined.successes {
            save_mesh(&refined.mesh, &layout.path(root, Stage::Refined, name))?;
        }

        let report = run.report();
        if !report.is_complete() {
            warn!(failed = report.failed(), "Some clusters failed");
        }
        Ok(report)
    }
}

/// Load every `*.ply` cloud in `dir`, named by file stem.
pub fn load_named_clouds(dir: &Path) -> HoldResult<Vec<(String, PointCloud)>> {
    cluster_names_in(dir)?
        .into_iter()
        .map(|name| {
            let cloud = load_point_cloud(&dir.join(format!("{name}.ply")))?;
            Ok((name, cloud))
        })
        .collect()
}

/// Load every `*.ply` mesh in `dir`, named by file stem.
pub fn load_named_meshes(dir: &Path, mode: MeshReadMode) -> HoldResult<Vec<(String, Mesh)>> {
    cluster_names_in(dir)?
        .into_iter()
        .map(|name| {
            let mesh = load_mesh(&dir.join(format!("{name}.ply")), mode)?;
            Ok((name, mesh))
        })
        .collect()
}

/// Write each cloud to `<dir>/<name>.ply`, creating `dir` if needed.
pub fn save_named_clouds(dir: &Path, clouds: &[(String, PointCloud)]) -> HoldResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| HoldError::io_write(dir, e))?;
    for (name, cloud) in clouds {
        save_point_cloud(cloud, &dir.join(format!("{name}.ply")))?;
    }
    Ok(())
}

/// Write each mesh to `<dir>/<name>.ply`, creating `dir` if needed.
pub fn save_named_meshes(dir: &Path, meshes: &[(String, Mesh)]) -> HoldResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| HoldError::io_write(dir, e))?;
    for (name, mesh) in meshes {
        save_mesh(mesh, &dir.join(format!("{name}.ply")))?;
    }
    Ok(())
}
