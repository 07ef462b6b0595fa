//! holdmesh reconstruct command - condition clouds and mesh them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use holdmesh::pipeline::{load_named_clouds, save_named_meshes};
use holdmesh::{BatchSummary, HoldPipeline, PipelineConfig, ReconstructionAlgorithm};
use serde::Serialize;

use crate::commands::print_stage;
use crate::{Algorithm, Cli, OutputFormat, output};

#[derive(Serialize)]
struct ReconstructSummary {
    output: String,
    algorithm: ReconstructionAlgorithm,
    outliers_removed: usize,
    vertices_pruned: usize,
    stages: Vec<BatchSummary>,
}

pub fn run(
    input_dir: &Path,
    output_dir: Option<&Path>,
    algorithm: Option<Algorithm>,
    depth: Option<u32>,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(algorithm) = algorithm {
        config.reconstruct.algorithm = match algorithm {
            Algorithm::Poisson => ReconstructionAlgorithm::Poisson,
            Algorithm::BallPivoting => ReconstructionAlgorithm::BallPivoting,
        };
    }
    if let Some(depth) = depth {
        config.reconstruct.poisson.depth = depth;
    }
    config.validate()?;

    let algorithm = config.reconstruct.algorithm;
    let output_dir: PathBuf = output_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(algorithm.stage_dir()));

    let clouds = load_named_clouds(input_dir)
        .with_context(|| format!("Failed to read clouds from {:?}", input_dir))?;

    let pipeline = HoldPipeline::new(config);
    let conditioned = pipeline.condition(clouds)?;
    let reconstructed = pipeline.reconstruct(
        conditioned
            .successes
            .iter()
            .map(|(name, c)| (name.clone(), c.cloud.clone()))
            .collect(),
    )?;

    let meshes: Vec<_> = reconstructed
        .successes
        .iter()
        .map(|(name, r)| (name.clone(), r.mesh.clone()))
        .collect();
    save_named_meshes(&output_dir, &meshes)
        .with_context(|| format!("Failed to write meshes to {:?}", output_dir))?;

    let summary = ReconstructSummary {
        output: output_dir.display().to_string(),
        algorithm,
        outliers_removed: conditioned.successes.iter().map(|(_, c)| c.outliers_removed).sum(),
        vertices_pruned: reconstructed.successes.iter().map(|(_, r)| r.vertices_pruned).sum(),
        stages: vec![conditioned.summary(), reconstructed.summary()],
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!("{} meshes written to {}", meshes.len(), output_dir.display()),
                cli.format,
                cli.quiet,
            );
            for stage in &summary.stages {
                print_stage(stage, cli);
            }
            output::info(
                &format!(
                    "{} outliers removed, {} low-density vertices pruned",
                    summary.outliers_removed, summary.vertices_pruned
                ),
                cli.format,
                cli.quiet,
            );
        }
    }

    Ok(())
}
