#![forbid(unsafe_code)]

//! msautotest - run MapServer regression tests against expected artifacts.
//!
//! # Commands
//!
//! - `run`: Render every mapfile of a test directory and compare the results
//! - `directives`: Show the `REQUIRES`/`RUN_PARMS` directives of a mapfile
//! - `compare`: Compare a result file with an expected file
//! - `normalize`: Apply normalization passes to a file in place
//! - `checksum`: Print per-band raster checksums of an image

mod config;
mod runner;

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ms_compare::{
    Pass, PerceptualDiff, compare_files, crlf, demime, deversion, fix_exponent, raster_signature,
    rewrite_in_place, truncate_one_decimal,
};
use ms_directives::read_directives;
use serde::Serialize;
use tracing::info;

use crate::config::{FlagOverrides, HarnessConfig, RunOptions};
use crate::runner::{run_tests, write_summary};

/// msautotest - run MapServer regression tests against expected artifacts.
#[derive(Debug, Parser)]
#[command(
    name = "msautotest",
    version,
    about = "Run MapServer regression tests against expected artifacts",
    long_about = "Renders every mapfile of a test directory with shp2img (or the program\n\
        named by its RUN_PARMS directives), normalizes the output and compares it\n\
        with the accepted artifact under expected/."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (can be repeated for more detail: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the regression tests of a directory.
    Run {
        /// Mapfiles to run. If omitted, every *.map file of the directory is run.
        mapfiles: Vec<String>,

        /// Test directory containing the mapfiles, expected/ and result/
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Path of the shp2img renderer
        #[arg(long)]
        renderer: Option<String>,

        /// Path of the mapserv CGI program
        #[arg(long)]
        mapserv: Option<String>,

        /// Path of the legend program
        #[arg(long)]
        legend: Option<String>,

        /// Path of the scalebar program
        #[arg(long)]
        scalebar: Option<String>,

        /// Keep result files of passing tests
        #[arg(long)]
        keep: bool,

        /// Run every command under valgrind memcheck
        #[arg(long)]
        valgrind: bool,

        /// Perceptual diff program used as last comparison resort
        #[arg(long)]
        pdiff: Option<String>,

        /// Never use a perceptual diff program
        #[arg(long, conflicts_with = "pdiff")]
        no_pdiff: bool,

        /// Print a JSON report after the summary
        #[arg(long)]
        json: bool,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Configuration file (default: <DIR>/msautotest.toml when present)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show the test directives of a mapfile.
    Directives {
        mapfile: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare a result file with an expected file.
    Compare {
        expected: PathBuf,
        result: PathBuf,

        /// Perceptual diff program used as last comparison resort
        #[arg(long)]
        pdiff: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply normalization passes to a file in place.
    Normalize {
        file: PathBuf,

        /// Strip HTTP headers
        #[arg(long)]
        demime: bool,

        /// Strip the MapServer version comment and normalize numbers
        #[arg(long)]
        deversion: bool,

        /// Convert CR+LF line endings to LF
        #[arg(long)]
        crlf: bool,
    },

    /// Print per-band raster checksums of an image.
    Checksum {
        image: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct CompareResult<'a> {
    expected: &'a Path,
    result: &'a Path,
    outcome: ms_core::CompareOutcome,
    success: bool,
}

#[derive(Debug, Serialize)]
struct ChecksumResult<'a> {
    image: &'a Path,
    width: u32,
    height: u32,
    checksums: Vec<u16>,
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(translate_legacy_args(std::env::args_os()));

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Run {
            mapfiles,
            dir,
            renderer,
            mapserv,
            legend,
            scalebar,
            keep,
            valgrind,
            pdiff,
            no_pdiff,
            json,
            report,
            config,
        } => {
            let file = HarnessConfig::load(&dir, config.as_deref())?;
            let flags = FlagOverrides {
                renderer,
                mapserv,
                legend,
                scalebar,
                pdiff,
                no_pdiff,
                keep,
                valgrind,
            };
            let options = RunOptions::resolve(dir, mapfiles, file, flags);
            cmd_run(&options, json, report.as_deref())
        }

        Command::Directives { mapfile, json } => cmd_directives(&mapfile, json),

        Command::Compare {
            expected,
            result,
            pdiff,
            json,
        } => cmd_compare(&expected, &result, pdiff.as_deref(), json),

        Command::Normalize {
            file,
            demime: demime_pass,
            deversion: deversion_pass,
            crlf: crlf_pass,
        } => cmd_normalize(&file, demime_pass, deversion_pass, crlf_pass),

        Command::Checksum { image, json } => cmd_checksum(&image, json),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .try_init();
}

/// Accept the historical single-dash flags (`-shp2img PATH`, `-keep`,
/// `-valgrind`) alongside the regular long options.
fn translate_legacy_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-shp2img") => OsString::from("--renderer"),
            Some("-keep") => OsString::from("--keep"),
            Some("-valgrind") => OsString::from("--valgrind"),
            _ => arg,
        })
        .collect()
}

// =============================================================================
// Command: run
// =============================================================================

fn cmd_run(options: &RunOptions, json_output: bool, report_path: Option<&Path>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let report = run_tests(options, &mut out)?;
    write_summary(&report.tally, &mut out).context("Failed to write summary")?;

    if json_output || report_path.is_some() {
        let json = report.to_json_pretty()?;
        if json_output {
            writeln!(out, "{json}")?;
        }
        if let Some(path) = report_path {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            info!("Wrote report to: {}", path.display());
        }
    }
    out.flush()?;

    if report.tally.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}

// =============================================================================
// Command: directives
// =============================================================================

fn cmd_directives(mapfile: &Path, json_output: bool) -> Result<()> {
    let directives = read_directives(mapfile, &mapfile.to_string_lossy())
        .with_context(|| format!("Failed to read mapfile: {}", mapfile.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&directives)?);
        return Ok(());
    }

    if directives.requires.is_empty() {
        println!("Requires: (nothing)");
    } else {
        println!("Requires: {}", directives.requires.join(" "));
    }
    for parms in &directives.run_parms {
        println!("Run:      {} <- {}", parms.output, parms.command);
    }
    Ok(())
}

// =============================================================================
// Command: compare
// =============================================================================

fn cmd_compare(expected: &Path, result: &Path, pdiff: Option<&str>, json_output: bool) -> Result<()> {
    let pdiff = pdiff.and_then(PerceptualDiff::detect);
    let outcome = compare_files(expected, result, pdiff.as_ref()).with_context(|| {
        format!(
            "Failed to compare {} with {}",
            result.display(),
            expected.display()
        )
    })?;

    if json_output {
        let report = CompareResult {
            expected,
            result,
            outcome,
            success: outcome.is_success(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", outcome.as_str());
    }

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// Command: normalize
// =============================================================================

fn cmd_normalize(file: &Path, demime_pass: bool, deversion_pass: bool, crlf_pass: bool) -> Result<()> {
    let mut passes: Vec<Pass> = Vec::new();
    if demime_pass {
        passes.push(demime);
    }
    if deversion_pass {
        passes.push(deversion);
        passes.push(fix_exponent);
        passes.push(truncate_one_decimal);
    }
    if crlf_pass {
        passes.push(crlf);
    }
    if passes.is_empty() {
        anyhow::bail!("No normalization pass selected (use --demime, --deversion or --crlf)");
    }

    if !file.is_file() {
        anyhow::bail!("File not found: {}", file.display());
    }
    let changed = rewrite_in_place(file, &passes)
        .with_context(|| format!("Failed to normalize {}", file.display()))?;
    if changed {
        println!("normalized {}", file.display());
    } else {
        println!("unchanged {}", file.display());
    }
    Ok(())
}

// =============================================================================
// Command: checksum
// =============================================================================

fn cmd_checksum(image: &Path, json_output: bool) -> Result<()> {
    let signature = raster_signature(image)
        .with_context(|| format!("Failed to checksum {}", image.display()))?;

    if json_output {
        let result = ChecksumResult {
            image,
            width: signature.width,
            height: signature.height,
            checksums: signature.checksums,
        };
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Size:  {}x{}", signature.width, signature.height);
        for (band, sum) in signature.checksums.iter().enumerate() {
            println!("Band {}: {sum}", band + 1);
        }
    }
    Ok(())
}
