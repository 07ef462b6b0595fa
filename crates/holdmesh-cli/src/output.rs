//! Shared output helpers for text and JSON modes.

use colored::Colorize;
use serde::Serialize;

use crate::OutputFormat;

/// Print `value` as pretty JSON in JSON mode; text mode prints nothing.
pub fn print<T: Serialize>(value: &T, format: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    if let OutputFormat::Json = format {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{}: failed to serialize result: {}", "Error".red().bold(), e),
        }
    }
}

/// Headline for a completed command.
pub fn success(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("{} {}", "✓".green().bold(), message);
    }
}

/// Secondary line in text mode.
pub fn info(message: &str, format: OutputFormat, quiet: bool) {
    if !quiet && matches!(format, OutputFormat::Text) {
        println!("  {}", message);
    }
}

/// Warning on stderr, in both modes.
pub fn warning(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}: {}", "Warning".yellow().bold(), message);
    }
}
