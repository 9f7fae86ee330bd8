// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `buildcause`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "buildcause",
    version,
    about = "Validate pipeline material configuration and resolve build causes offline.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline configuration (TOML).
    #[arg(long, value_name = "PATH", default_value = "pipelines.toml")]
    pub config: String,

    /// Parse + validate, print pipelines and materials, resolve nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `BUILDCAUSE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Recorded modifications and runs to resolve against (TOML).
    #[arg(long, value_name = "PATH")]
    pub history: Option<String>,

    /// Pipeline to resolve a build cause for.
    #[arg(long, value_name = "NAME", requires = "history")]
    pub pipeline: Option<String>,

    /// Pin a material to a revision: `MATERIAL=REVISION`. Repeatable.
    #[arg(long = "pin", value_name = "KEY=REV", value_parser = parse_pin)]
    pub pins: Vec<(String, String)>,

    /// Resolve as the timer would (only if something changed).
    #[arg(long)]
    pub automatic: bool,

    /// User recorded as approver of a forced build cause.
    #[arg(long, value_name = "USER", default_value = "admin")]
    pub actor: String,

    /// Print the resolved build cause as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

fn parse_pin(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, rev)) if !key.trim().is_empty() && !rev.trim().is_empty() => {
            Ok((key.trim().to_string(), rev.trim().to_string()))
        }
        _ => Err(format!("expected MATERIAL=REVISION, got '{s}'")),
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
