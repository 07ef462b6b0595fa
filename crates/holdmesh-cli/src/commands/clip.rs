//! holdmesh clip command - cut segmented clouds at the wall plane.

use std::path::Path;

use anyhow::{Context, Result};
use holdmesh::io::{MeshReadMode, load_mesh, save_point_cloud};
use holdmesh::pipeline::load_named_clouds;
use holdmesh::{BatchSummary, HoldPipeline, PipelineConfig, Plane};
use serde::Serialize;

use crate::commands::print_stage;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ClipSummary {
    output: String,
    kept_points: usize,
    discarded_points: usize,
    backing_points: usize,
    stage: BatchSummary,
}

pub fn run(
    input_dir: &Path,
    plane_path: &Path,
    output_dir: &Path,
    grid_spacing: Option<f64>,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let mut config = config.clone();
    if let Some(spacing) = grid_spacing {
        config.clip.grid_spacing = spacing;
    }
    config.validate()?;

    let plane_mesh = load_mesh(plane_path, MeshReadMode::PostProcess)
        .with_context(|| format!("Failed to load plane mesh from {:?}", plane_path))?;
    let plane = Plane::from_mesh(&plane_mesh)?;
    let clouds = load_named_clouds(input_dir)
        .with_context(|| format!("Failed to read clouds from {:?}", input_dir))?;

    let report = HoldPipeline::new(config).clip(clouds, &plane)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {:?}", output_dir))?;
    for (name, clip) in &report.successes {
        save_point_cloud(&clip.cloud, &output_dir.join(format!("{name}.ply")))?;
    }

    let summary = ClipSummary {
        output: output_dir.display().to_string(),
        kept_points: report.successes.iter().map(|(_, c)| c.kept).sum(),
        discarded_points: report.successes.iter().map(|(_, c)| c.discarded).sum(),
        backing_points: report.successes.iter().map(|(_, c)| c.backing).sum(),
        stage: report.summary(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&summary, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!("Clipped clouds written to {}", output_dir.display()),
                cli.format,
                cli.quiet,
            );
            print_stage(&summary.stage, cli);
            output::info(
                &format!(
                    "kept {} points, discarded {}, added {} backing points",
                    summary.kept_points, summary.discarded_points, summary.backing_points
                ),
                cli.format,
                cli.quiet,
            );
        }
    }

    Ok(())
}
