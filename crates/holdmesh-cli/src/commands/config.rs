//! holdmesh config command - print the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use holdmesh::PipelineConfig;

use crate::{Cli, OutputFormat, output};

pub fn run(output_path: Option<&Path>, config: &PipelineConfig, cli: &Cli) -> Result<()> {
    if let Some(path) = output_path {
        config
            .save_toml(path)
            .with_context(|| format!("Failed to write configuration to {:?}", path))?;
        output::success(
            &format!("Configuration written to {}", path.display()),
            cli.format,
            cli.quiet,
        );
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => println!("{}", config.to_json()?),
        OutputFormat::Text => print!("{}", config.to_toml()?),
    }
    Ok(())
}
