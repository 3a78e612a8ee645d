//! The regression loop: discover mapfiles, run every `RUN_PARMS` entry,
//! normalize and compare the artifacts, keep score.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Instant;

use anyhow::{Context, Result};
use ms_compare::{PerceptualDiff, compare_result, passes_for, rewrite_in_place};
use ms_core::{
    CaseReport, CompareOutcome, EXPECTED_DIR, RESULT_DIR, RunReport, TestTally,
};
use ms_directives::{
    collect_mapfiles, expand_command, has_requires, missing_requires, read_directives,
    read_directory_requires, wrap_valgrind,
};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, trace, warn};

use crate::config::RunOptions;

/// Build a command that runs `command` through the platform shell.
pub fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }

    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    }
}

fn run_shell(command: &str, dir: &Path) -> Result<Output> {
    shell_command(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run: {command}"))
}

/// Version banner of the renderer (`<shp2img> -v`). An unusable renderer
/// yields an empty banner, which fails every non-empty requirement.
pub fn query_version(shp2img: &str, dir: &Path) -> String {
    match run_shell(&format!("{shp2img} -v"), dir) {
        Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
        Err(err) => {
            warn!("could not query renderer version: {err:#}");
            String::new()
        }
    }
}

/// Run the whole harness in `options.dir`, writing progress to `out`.
pub fn run_tests(options: &RunOptions, out: &mut impl Write) -> Result<RunReport> {
    let dir = options.dir.as_path();
    let started_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("Failed to format start time")?;

    let result_dir = dir.join(RESULT_DIR);
    if !result_dir.exists() {
        std::fs::create_dir(&result_dir)
            .with_context(|| format!("Failed to create {}", result_dir.display()))?;
    }

    let version_info = query_version(&options.programs.shp2img, dir);
    writeln!(out, "version = {version_info}")?;

    let mut report = RunReport {
        started_at,
        version_info,
        cases: Vec::new(),
        tally: TestTally::default(),
        success_rate: None,
    };

    if let Some(requires) = read_directory_requires(dir)?
        && !has_requires(&report.version_info, &requires)
    {
        writeln!(
            out,
            "Some or all of the following requirements for this directory of tests\nare not available:"
        )?;
        writeln!(out, "{requires:?}")?;
        return Ok(report);
    }

    let pdiff = options.pdiff.as_deref().and_then(PerceptualDiff::detect);
    if let Some(tool) = &pdiff {
        debug!("perceptual diff fallback: {}", tool.program());
    }
    let mapfiles = collect_mapfiles(&options.mapfiles, dir)?;
    info!("{} mapfile(s) in {}", mapfiles.len(), dir.display());

    for mapfile in &mapfiles {
        run_mapfile(options, mapfile, pdiff.as_ref(), &mut report, &mut *out)?;
    }

    report.success_rate = report.tally.success_rate();
    Ok(report)
}

fn run_mapfile(
    options: &RunOptions,
    mapfile: &Path,
    pdiff: Option<&PerceptualDiff>,
    report: &mut RunReport,
    out: &mut impl Write,
) -> Result<()> {
    let dir = options.dir.as_path();
    let map_name = mapfile.to_string_lossy().into_owned();
    writeln!(out, " Processing: {map_name}")?;

    let directives = read_directives(&dir.join(mapfile), &map_name)?;

    if !has_requires(&report.version_info, &directives.requires) {
        writeln!(out, "    missing some or all of required components, skip.")?;
        let missing = missing_requires(&report.version_info, &directives.requires);
        info!("{map_name}: skipped, missing {missing:?}");
        report.tally.skipped += directives.run_parms.len();
        for parms in &directives.run_parms {
            report.cases.push(CaseReport {
                mapfile: map_name.clone(),
                output: parms.output.clone(),
                outcome: None,
                command: None,
                missing_requires: missing.clone(),
                duration_ms: 0.0,
                result_sha256: None,
            });
        }
        return Ok(());
    }

    let several = directives.run_parms.len() > 1;
    for parms in &directives.run_parms {
        if several {
            writeln!(out, "   test {}", parms.output)?;
        }

        let start = Instant::now();
        let (mut command, post) =
            expand_command(&parms.command, &parms.output, &map_name, &options.programs);
        if options.valgrind {
            command = wrap_valgrind(&command, &parms.output);
        }

        debug!("running: {command}");
        let output = run_shell(&command, dir)?;
        if !output.status.success() {
            warn!("`{command}` exited with {}", output.status);
        }
        trace!("stdout: {}", String::from_utf8_lossy(&output.stdout));
        trace!("stderr: {}", String::from_utf8_lossy(&output.stderr));

        let result_path = dir.join(RESULT_DIR).join(&parms.output);
        rewrite_in_place(&result_path, &passes_for(post))?;

        let outcome = compare_result(dir, &parms.output, pdiff)?;
        let result_sha256 = if outcome.is_failure() {
            sha256_file(&result_path)
        } else {
            None
        };
        settle_artifact(dir, &parms.output, outcome, options.keep)?;
        report.tally.record(outcome);
        writeln!(out, "{}", outcome.message())?;
        info!("{map_name} -> {}: {}", parms.output, outcome.as_str());

        report.cases.push(CaseReport {
            mapfile: map_name.clone(),
            output: parms.output.clone(),
            outcome: Some(outcome),
            command: Some(command),
            missing_requires: Vec::new(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            result_sha256,
        });
    }

    Ok(())
}

/// Delete passing artifacts (unless kept) and promote first-time artifacts
/// to `expected/`.
fn settle_artifact(dir: &Path, output: &str, outcome: CompareOutcome, keep: bool) -> Result<()> {
    let result_path = dir.join(RESULT_DIR).join(output);
    if outcome.is_success() {
        if !keep {
            std::fs::remove_file(&result_path)
                .with_context(|| format!("Failed to remove {}", result_path.display()))?;
        }
    } else if outcome == CompareOutcome::NoExpected {
        let expected_path: PathBuf = dir.join(EXPECTED_DIR).join(output);
        if let Some(parent) = expected_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::rename(&result_path, &expected_path).with_context(|| {
            format!(
                "Failed to move {} to {}",
                result_path.display(),
                expected_path.display()
            )
        })?;
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Option<String> {
    let data = std::fs::read(path).ok()?;
    Some(format!("{:x}", Sha256::digest(&data)))
}

/// Final tally in the harness' traditional wording.
pub fn write_summary(tally: &TestTally, out: &mut impl Write) -> std::io::Result<()> {
    if let Some(rate) = tally.success_rate() {
        writeln!(out, "Test done ({rate:.2}% success):")?;
    }
    writeln!(out, "{} tests skipped", tally.skipped)?;
    writeln!(out, "{} tests succeeded", tally.succeeded)?;
    writeln!(out, "{} tests failed", tally.failed)?;
    writeln!(out, "{} test results initialized", tally.initialized)?;
    Ok(())
}
