//! holdmesh refine command - close reconstructed meshes against the wall.

use std::path::Path;

use anyhow::{Context, Result};
use holdmesh::io::{MeshReadMode, load_mesh};
use holdmesh::pipeline::{load_named_meshes, save_named_meshes};
use holdmesh::{BatchSummary, HoldPipeline, PipelineConfig, Plane};
use serde::Serialize;

use crate::commands::print_stage;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct RefineSummary {
    output: String,
    holes_filled: usize,
    boolean_fallbacks: Vec<String>,
    stage: BatchSummary,
}

pub fn run(
    input_dir: &Path,
    plane_path: &Path,
    wall_path: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let plane_mesh = load_mesh(plane_path, MeshReadMode::PostProcess)
        .with_context(|| format!("Failed to load plane mesh from {:?}", plane_path))?;
    let plane = Plane::from_mesh(&plane_mesh)?;
    let wall = load_mesh(wall_path, MeshReadMode::PostProcess)
        .with_context(|| format!("Failed to load wall mesh from {:?}", wall_path))?;
    let meshes = load_named_meshes(input_dir, MeshReadMode::PostProcess)
        .with_context(|| format!("Failed to read meshes from {:?}", input_dir))?;

    let report = HoldPipeline::new(config.clone()).refine(meshes, &plane, &wall)?;

    let refined: Vec<_> = report
        .successes
        .iter()
        .map(|(name, r)| (name.clone(), r.mesh.clone()))
        .collect();
    save_named_meshes(output_dir, &refined)
        .with_context(|| format!("Failed to write meshes to {:?}", output_dir))?;

    let summary = RefineSummary {
        output: output_dir.display().to_string(),
        holes_filled: report.successes.iter().map(|(_, r)| r.report.holes_filled).sum(),
        boolean_fallbacks: report
            .successes
            .iter()
            .filter(|(_, r)| r.report.boolean_error.is_some())
            .map(|(name, _)| name.clone())
            .collect(),
        stage: report.summary(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!("{} meshes written to {}", refined.len(), output_dir.display()),
                cli.format,
                cli.quiet,
            );
            print_stage(&summary.stage, cli);
            output::info(
                &format!("{} holes filled", summary.holes_filled),
                cli.format,
                cli.quiet,
            );
            if !summary.boolean_fallbacks.is_empty() {
                output::warning(
                    &format!(
                        "kept the clipped surface for {}",
                        summary.boolean_fallbacks.join(", ")
                    ),
                    cli.quiet,
                );
            }
        }
    }

    Ok(())
}
