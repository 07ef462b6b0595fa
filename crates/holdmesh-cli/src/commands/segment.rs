//! holdmesh segment command - split a scan into one cloud per anchor.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use holdmesh::io::load_point_cloud;
use holdmesh::pipeline::save_named_clouds;
use holdmesh::{HoldPipeline, PipelineConfig};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct SegmentResult {
    input: String,
    output: String,
    points: usize,
    segments: usize,
    empty_anchors: Vec<String>,
}

pub fn run(
    input: &Path,
    lattice_path: Option<&Path>,
    output_dir: &Path,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let pipeline = HoldPipeline::new(config.clone());
    let lattice = pipeline
        .lattice(lattice_path)
        .context("Failed to resolve the anchor lattice")?;
    let cloud =
        load_point_cloud(input).with_context(|| format!("Failed to load scan from {:?}", input))?;

    let segmentation = pipeline.segment(&cloud, &lattice)?;
    let segments = segmentation.materialize_all(&cloud);
    save_named_clouds(output_dir, &segments)
        .with_context(|| format!("Failed to write segments to {:?}", output_dir))?;

    let result = SegmentResult {
        input: input.display().to_string(),
        output: output_dir.display().to_string(),
        points: cloud.len(),
        segments: segments.len(),
        empty_anchors: segmentation.empty,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!("{} segments written to {}", result.segments, output_dir.display()),
                cli.format,
                cli.quiet,
            );
            output::info(
                &format!("{}: {}", "Points".cyan(), result.points),
                cli.format,
                cli.quiet,
            );
            if !result.empty_anchors.is_empty() {
                output::info(
                    &format!(
                        "{}: {}",
                        "Empty anchors".yellow(),
                        result.empty_anchors.join(", ")
                    ),
                    cli.format,
                    cli.quiet,
                );
            }
        }
    }

    Ok(())
}
