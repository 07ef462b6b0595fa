//! Climbing-hold reconstruction from coloured wall scans.
//!
//! This crate turns a dense scan of a climbing wall into one watertight,
//! coloured mesh per hold, and aligns new scans of the wall onto a reference
//! scan.
//!
//! # Pipeline
//!
//! 1. **Lattice**: the grid of expected hold positions on the board,
//!    generated from three corners ([`lattice::generate_lattice`]) or loaded
//!    from a file.
//! 2. **Segmentation**: every scan point goes to its nearest anchor
//!    ([`segment::SpatialSegmenter`]).
//! 3. **Clipping**: points in front of the wall plane are dropped and a flat
//!    backing grid closes each cluster ([`clip::clip_to_plane`]).
//! 4. **Conditioning**: oriented normals and outlier removal
//!    ([`condition::condition_cloud`]).
//! 5. **Reconstruction**: Poisson or ball-pivoting surfaces with density
//!    pruning, smoothing and colour transfer
//!    ([`reconstruct::reconstruct_cluster`]).
//! 6. **Refinement**: hole filling, a clean cut at the wall, and a back face
//!    rebuilt against the wall solid ([`refine::refine_mesh`]).
//!
//! Stages 3 to 6 run independently per hold through [`batch::run_batch`], so
//! a failure on one hold is reported without stopping the others.
//! [`HoldPipeline`] chains them, in memory or over a work directory.
//!
//! Separately, [`registration::register`] aligns a source scan onto a
//! target scan with a similarity transform, keeping the two wall planes
//! parallel.
//!
//! # Units
//!
//! Coordinates are in whatever unit the scan uses, metres for the scanners
//! this was built against. Defaults such as the 1 cm backing grid spacing
//! assume metres.
//!
//! # Quick Start
//!
//! ```no_run
//! use holdmesh::io::{load_point_cloud, load_mesh, MeshReadMode};
//! use holdmesh::{HoldPipeline, PipelineConfig, Plane};
//! use std::path::Path;
//!
//! let config = PipelineConfig::load("pipeline.toml").unwrap();
//! let pipeline = HoldPipeline::new(config);
//!
//! let cloud = load_point_cloud(Path::new("scan.ply")).unwrap();
//! let plane_mesh = load_mesh(Path::new("plane.ply"), MeshReadMode::PostProcess).unwrap();
//! let wall = load_mesh(Path::new("wall.ply"), MeshReadMode::PostProcess).unwrap();
//!
//! let lattice = pipeline.lattice(None).unwrap();
//! let plane = Plane::from_mesh(&plane_mesh).unwrap();
//! let run = pipeline.run(&cloud, &lattice, &plane, &wall).unwrap();
//!
//! for (name, refined) in &run.refined.successes {
//!     println!("{name}: {} faces", refined.mesh.face_count());
//! }
//! ```
//!
//! # Logging
//!
//! All stages log through `tracing`; see [`tracing_ext`].

mod error;
mod types;

pub mod adjacency;
pub mod batch;
pub mod boolean;
pub mod clip;
pub mod condition;
pub mod config;
pub mod hold;
pub mod holes;
pub mod hull;
pub mod io;
pub mod lattice;
pub mod layout;
pub mod pipeline;
pub mod plane;
pub mod pointcloud;
pub mod poisson;
pub mod reconstruct;
pub mod refine;
pub mod registration;
pub mod segment;
pub mod smooth;
pub mod spatial;
pub mod tracing_ext;

// Core types at the crate root
pub use error::{ErrorCode, HoldError, HoldResult, RecoverySuggestion};
pub use types::{Mesh, Rgb, Triangle, Vertex};

pub use adjacency::MeshAdjacency;
pub use batch::{BatchFailure, BatchReport, BatchSummary, run_batch};
pub use config::{LatticeConfig, PipelineConfig};
pub use lattice::{AnchorLattice, anchor_name, generate_lattice};
pub use pipeline::{HoldPipeline, PipelineInputs, PipelineReport, PipelineRun};
pub use plane::{Plane, PlaneFrame};
pub use pointcloud::PointCloud;

// Stage entry points
pub use clip::{ClipParams, ClipResult, clip_to_plane};
pub use condition::{ConditionParams, ConditionedCloud, condition_cloud};
pub use hold::orient_hold;
pub use reconstruct::{ReconstructParams, Reconstruction, ReconstructionAlgorithm, reconstruct_cluster};
pub use refine::{RefineParams, RefinedMesh, refine_mesh};
pub use registration::{
    RegistrationParams, RegistrationResult, RegistrationStatus, SimilarityTransform, register,
    tune_coplanarity_weight,
};
pub use segment::{SegmenterParams, Segmentation, SpatialSegmenter};
