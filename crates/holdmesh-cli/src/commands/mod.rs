//! Subcommand implementations.

pub mod clip;
pub mod config;
pub mod lattice;
pub mod reconstruct;
pub mod refine;
pub mod register;
pub mod run;
pub mod segment;

use colored::Colorize;
use holdmesh::BatchSummary;

use crate::{Cli, output};

/// Print a stage summary in text mode, listing failed clusters.
pub(crate) fn print_stage(summary: &BatchSummary, cli: &Cli) {
    output::info(
        &format!(
            "{}: {}/{} clusters",
            summary.stage.cyan(),
            summary.succeeded,
            summary.total
        ),
        cli.format,
        cli.quiet,
    );
    for failure in &summary.failures {
        output::warning(
            &format!(
                "{} failed in {} [{}]: {}",
                failure.name, summary.stage, failure.code, failure.message
            ),
            cli.quiet,
        );
    }
}
