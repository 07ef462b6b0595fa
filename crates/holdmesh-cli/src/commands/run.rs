//! holdmesh run command - every stage in a work directory.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use holdmesh::{HoldPipeline, PipelineConfig, PipelineInputs};

use crate::commands::print_stage;
use crate::{Cli, OutputFormat, output};

pub fn run(
    scan: &Path,
    plane: &Path,
    wall: &Path,
    lattice: Option<&Path>,
    work_dir: &Path,
    config: &PipelineConfig,
    cli: &Cli,
) -> Result<()> {
    let mut inputs = PipelineInputs::new(scan, plane, wall);
    if let Some(lattice) = lattice {
        inputs = inputs.with_lattice(lattice);
    }

    let report = HoldPipeline::new(config.clone())
        .run_in_dir(work_dir, &inputs)
        .with_context(|| format!("Pipeline failed in {:?}", work_dir))?;

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!(
                    "{} of {} holds refined in {}",
                    report.refined.len(),
                    report.segments,
                    work_dir.display()
                ),
                cli.format,
                cli.quiet,
            );
            output::info(
                &format!("{}: {}", "Points".cyan(), report.points),
                cli.format,
                cli.quiet,
            );
            for stage in &report.stages {
                print_stage(stage, cli);
            }
            if !report.empty_anchors.is_empty() {
                output::info(
                    &format!(
                        "{}: {}",
                        "Empty anchors".yellow(),
                        report.empty_anchors.join(", ")
                    ),
                    cli.format,
                    cli.quiet,
                );
            }
            if !report.boolean_fallbacks.is_empty() {
                output::warning(
                    &format!(
                        "kept the clipped surface for {}",
                        report.boolean_fallbacks.join(", ")
                    ),
                    cli.quiet,
                );
            }
        }
    }

    Ok(())
}
