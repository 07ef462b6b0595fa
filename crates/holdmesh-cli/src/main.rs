//! holdmesh: command-line driver for climbing-hold reconstruction.
//!
//! Each subcommand runs one stage over a directory of per-hold PLY files,
//! so a run can be resumed or re-tuned from any stage. `run` chains them
//! all in a work directory.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=holdmesh=info` - Stage summaries
//! - `RUST_LOG=holdmesh=debug` - Per-cluster and per-iteration detail
//! - `RUST_LOG=holdmesh::timing=debug` - Performance timing
//!
//! # Example
//!
//! ```bash
//! # Segment a scan with the configured lattice corners
//! holdmesh --config board.toml segment scan.ply -o work/holds
//!
//! # Whole pipeline, verbose
//! holdmesh -v run --scan scan.ply --plane plane.ply --wall wall.ply --work-dir work
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use holdmesh::PipelineConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{clip, config, lattice, reconstruct, refine, register, run, segment};

/// holdmesh - reconstruct climbing holds from wall scans.
///
/// Segments a coloured wall scan into holds, reconstructs a closed mesh per
/// hold against the wall, and registers scans onto each other.
#[derive(Parser)]
#[command(name = "holdmesh")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Pipeline configuration (.toml or .json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Algorithm {
    /// Implicit-surface reconstruction
    Poisson,
    /// Ball pivoting
    BallPivoting,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an anchor lattice from three board corners
    Lattice {
        /// Corner of the first anchor (x,y,z)
        #[arg(long, required = true, value_delimiter = ',', allow_hyphen_values = true)]
        origin: Vec<f64>,

        /// Corner reached across the columns (x,y,z)
        #[arg(long, required = true, value_delimiter = ',', allow_hyphen_values = true)]
        edge_u: Vec<f64>,

        /// Corner reached across the rows (x,y,z)
        #[arg(long, required = true, value_delimiter = ',', allow_hyphen_values = true)]
        edge_v: Vec<f64>,

        /// Anchor rows
        #[arg(long, default_value = "18")]
        rows: usize,

        /// Anchor columns
        #[arg(long, default_value = "11")]
        cols: usize,

        /// Output point cloud
        #[arg(short, long, default_value = "lattice.ply")]
        output: PathBuf,
    },

    /// Split a scan into one cloud per anchor
    Segment {
        /// Input scan
        input: PathBuf,

        /// Lattice point cloud (defaults to the configured corners)
        #[arg(long)]
        lattice: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "holds")]
        output: PathBuf,
    },

    /// Clip segmented clouds at the wall plane and add backing points
    Clip {
        /// Directory of segmented clouds
        input: PathBuf,

        /// Flat mesh defining the wall plane
        #[arg(long)]
        plane: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "clipped")]
        output: PathBuf,

        /// Backing grid spacing
        #[arg(long)]
        grid_spacing: Option<f64>,
    },

    /// Estimate normals and reconstruct a mesh per cloud
    Reconstruct {
        /// Directory of clipped clouds
        input: PathBuf,

        /// Output directory (defaults to the algorithm name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Reconstruction algorithm
        #[arg(long)]
        algorithm: Option<Algorithm>,

        /// Poisson grid depth
        #[arg(long)]
        depth: Option<u32>,
    },

    /// Fill holes and rebuild the back face of each mesh against the wall
    Refine {
        /// Directory of reconstructed meshes
        input: PathBuf,

        /// Flat mesh defining the wall plane
        #[arg(long)]
        plane: PathBuf,

        /// Closed wall solid
        #[arg(long)]
        wall: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "refined")]
        output: PathBuf,
    },

    /// Run every stage in a work directory
    Run {
        /// Input scan
        #[arg(long)]
        scan: PathBuf,

        /// Flat mesh defining the wall plane
        #[arg(long)]
        plane: PathBuf,

        /// Closed wall solid
        #[arg(long)]
        wall: PathBuf,

        /// Lattice point cloud (defaults to the configured corners)
        #[arg(long)]
        lattice: Option<PathBuf>,

        /// Work directory receiving one subdirectory per stage
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },

    /// Align a source scan onto a target scan
    Register {
        /// Scan to move
        source: PathBuf,

        /// Reference scan
        target: PathBuf,

        /// Coplanarity weight
        #[arg(long, conflicts_with = "sweep")]
        weight: Option<f64>,

        /// Try several coplanarity weights and keep the best
        #[arg(long)]
        sweep: bool,

        /// Sampling seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v flags
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "holdmesh=info",
            2 => "holdmesh=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => Ok(PipelineConfig::default()),
    }
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = load_config(cli.config.as_deref()).and_then(|pipeline_config| match &cli.command {
        Commands::Lattice {
            origin,
            edge_u,
            edge_v,
            rows,
            cols,
            output,
        } => lattice::run(origin, edge_u, edge_v, *rows, *cols, output, &cli),
        Commands::Segment {
            input,
            lattice,
            output,
        } => segment::run(input, lattice.as_deref(), output, &pipeline_config, &cli),
        Commands::Clip {
            input,
            plane,
            output,
            grid_spacing,
        } => clip::run(input, plane, output, *grid_spacing, &pipeline_config, &cli),
        Commands::Reconstruct {
            input,
            output,
            algorithm,
            depth,
        } => reconstruct::run(input, output.as_deref(), *algorithm, *depth, &pipeline_config, &cli),
        Commands::Refine {
            input,
            plane,
            wall,
            output,
        } => refine::run(input, plane, wall, output, &pipeline_config, &cli),
        Commands::Run {
            scan,
            plane,
            wall,
            lattice,
            work_dir,
        } => run::run(scan, plane, wall, lattice.as_deref(), work_dir, &pipeline_config, &cli),
        Commands::Register {
            source,
            target,
            weight,
            sweep,
            seed,
        } => register::run(source, target, *weight, *sweep, *seed, &pipeline_config, &cli),
        Commands::Config { output } => config::run(output.as_deref(), &pipeline_config, &cli),
    });

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(hold_err) = e.downcast_ref::<holdmesh::HoldError>() {
                eprintln!("{}: {:#}", "Error".red().bold(), e);
                eprintln!("  {}: {}", "Code".cyan(), hold_err.code());
                eprintln!(
                    "  {}: {}",
                    "Suggestion".green(),
                    hold_err.recovery_suggestion()
                );
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
