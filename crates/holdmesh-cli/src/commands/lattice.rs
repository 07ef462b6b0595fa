//! holdmesh lattice command - write an anchor lattice from three corners.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use holdmesh::io::save_point_cloud;
use holdmesh::{LatticeConfig, PointCloud};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct LatticeResult {
    output: String,
    rows: usize,
    cols: usize,
    anchors: usize,
    first: String,
    last: String,
}

fn corner(name: &str, values: &[f64]) -> Result<[f64; 3]> {
    match values {
        &[x, y, z] => Ok([x, y, z]),
        _ => bail!("--{name} needs three comma-separated coordinates, got {}", values.len()),
    }
}

pub fn run(
    origin: &[f64],
    edge_u: &[f64],
    edge_v: &[f64],
    rows: usize,
    cols: usize,
    output_path: &Path,
    cli: &Cli,
) -> Result<()> {
    let config = LatticeConfig {
        origin: corner("origin", origin)?,
        edge_u: corner("edge-u", edge_u)?,
        edge_v: corner("edge-v", edge_v)?,
        rows,
        cols,
    };
    let lattice = config.generate().context("Failed to generate lattice")?;

    save_point_cloud(&PointCloud::new(lattice.points().to_vec()), output_path)
        .with_context(|| format!("Failed to save lattice to {:?}", output_path))?;

    let names = lattice.names();
    let result = LatticeResult {
        output: output_path.display().to_string(),
        rows,
        cols,
        anchors: lattice.len(),
        first: names.first().cloned().unwrap_or_default(),
        last: names.last().cloned().unwrap_or_default(),
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            output::success(
                &format!("Lattice saved to {}", output_path.display()),
                cli.format,
                cli.quiet,
            );
            output::info(
                &format!(
                    "{}: {} ({} x {})",
                    "Anchors".cyan(),
                    result.anchors,
                    rows,
                    cols
                ),
                cli.format,
                cli.quiet,
            );
            output::info(
                &format!("{}: {} .. {}", "Names".cyan(), result.first, result.last),
                cli.format,
                cli.quiet,
            );
        }
    }

    Ok(())
}
