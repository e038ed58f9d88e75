//! cppembed - Embed binary files into a generated C++ source file
//!
//! This tool captures the bytes of its input files into static arrays and
//! regenerates the output incrementally, skipping files that have not
//! changed since the previous run.

mod inputs;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cppembed_core::{
    EmbedReport, Embedder, EmbedderConfig, MergeConfig, MergeMode, RunStatus, TextEncoding,
};
use inputs::{InputSet, DEFAULT_PREFIX};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Embed binary files into a generated C++ source file
#[derive(Parser, Debug)]
#[command(name = "cppembed")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Input set as [PREFIX=]PATH; a wildcard in the file name searches its directory
    #[arg(short, long = "input", value_name = "SET", required = true)]
    inputs: Vec<InputSet>,

    /// Prefix for logical names of input sets that do not set their own
    #[arg(short, long, default_value = DEFAULT_PREFIX)]
    prefix: String,

    /// Search directories recursively
    #[arg(short, long)]
    recursive: bool,

    /// Generated output file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Keep previously embedded files whose input is gone
    #[arg(short, long)]
    append: bool,

    /// Ignore the previous output and rebuild from scratch
    #[arg(short, long)]
    clean: bool,

    /// Text encoding of the output
    #[arg(long, value_enum, default_value = "utf8")]
    encoding: Encoding,

    /// Maximum size of a single input file in bytes
    #[arg(long, env = "CPPEMBED_MAX_FILE_SIZE")]
    max_file_size: Option<u64>,

    /// Dry run - don't write the output, just show what would change
    #[arg(long)]
    dry_run: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Output text encoding
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Encoding {
    /// UTF-8 without BOM
    Utf8,
    /// UTF-16 little endian with BOM
    Utf16le,
}

impl From<Encoding> for TextEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Utf8 => TextEncoding::Utf8,
            Encoding::Utf16le => TextEncoding::Utf16Le,
        }
    }
}

impl Cli {
    fn embedder_config(&self) -> EmbedderConfig {
        let mut merge = MergeConfig::new();
        if let Some(max) = self.max_file_size {
            merge = merge.max_file_size(max);
        }

        EmbedderConfig::new(&self.output)
            .mode(if self.append {
                MergeMode::Append
            } else {
                MergeMode::Overwrite
            })
            .clean(self.clean)
            .encoding(self.encoding.into())
            .dry_run(self.dry_run)
            .merge(merge)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let files = inputs::resolve(&cli.inputs, &cli.prefix, cli.recursive)?;
    info!("Resolved {} input file(s)", files.len());

    let embedder = Embedder::new(cli.embedder_config()).context("Invalid configuration")?;
    let report = embedder
        .run(&files)
        .with_context(|| format!("Failed to embed into '{}'", cli.output.display()))?;

    print_report(&report, cli.verbose > 0);
    Ok(())
}

fn summary_line(report: &EmbedReport) -> String {
    let output = report.output.display();
    match report.status {
        RunStatus::Written { count } => {
            format!("cppembed: {} files embedded into '{}'.", count, output)
        }
        RunStatus::UpToDate => {
            format!("cppembed: no modifications detected, '{}' is up to date.", output)
        }
        RunStatus::WouldWrite { count } => {
            format!("cppembed: would embed {} files into '{}'.", count, output)
        }
    }
}

fn print_report(report: &EmbedReport, detailed: bool) {
    let list_changes = match report.status {
        RunStatus::UpToDate => false,
        RunStatus::Written { .. } => detailed,
        RunStatus::WouldWrite { .. } => true,
    };
    if list_changes {
        for name in &report.inserted {
            println!("  + {}", name);
        }
        for name in &report.updated {
            println!("  ~ {}", name);
        }
        for name in &report.removed {
            println!("  - {}", name);
        }
    }
    debug!(
        "{} inserted, {} updated, {} reused, {} removed",
        report.inserted.len(),
        report.updated.len(),
        report.reused,
        report.removed.len()
    );
    println!("{}", summary_line(report));
}
