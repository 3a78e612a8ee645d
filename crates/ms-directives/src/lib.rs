#![forbid(unsafe_code)]

//! Test directives embedded in mapfile comments.
//!
//! A mapfile opts into the harness through comment lines such as
//!
//! ```text
//! # REQUIRES: INPUT=GDAL OUTPUT=PNG
//! # RUN_PARMS: legend.png [LEGEND] [MAPFILE] [RESULT]
//! ```
//!
//! Markers are recognized anywhere on a line, so they work with any comment
//! syntax the mapfile grammar accepts.

mod discovery;
mod template;

use std::path::Path;

use ms_core::{HarnessError, HarnessResult, RunParms, TestDirectives};
use tracing::{debug, trace};

pub use discovery::{collect_mapfiles, is_mapfile_name};
pub use template::{Programs, expand_command, wrap_valgrind};

const REQUIRES_MARKER: &str = "REQUIRES:";
const RUN_PARMS_MARKER: &str = "RUN_PARMS:";
const MAPFILE_SUFFIX: &str = ".map";

/// Parse the directives carried by `text`.
///
/// `mapfile_name` only matters when no `RUN_PARMS` line is present: a single
/// run producing `<name without .map>.png` is synthesized in that case.
#[must_use]
pub fn parse_directives(text: &str, mapfile_name: &str) -> TestDirectives {
    let mut directives = TestDirectives::default();

    for line in text.lines() {
        if let Some(offset) = line.find(REQUIRES_MARKER) {
            let items = &line[offset + REQUIRES_MARKER.len()..];
            directives
                .requires
                .extend(items.split_whitespace().map(str::to_string));
        }

        if let Some(offset) = line.find(RUN_PARMS_MARKER)
            && let Some(parms) = parse_run_parms(&line[offset + RUN_PARMS_MARKER.len()..])
        {
            trace!("RUN_PARMS {} -> {}", parms.output, parms.command);
            directives.run_parms.push(parms);
        }
    }

    if directives.run_parms.is_empty() {
        directives
            .run_parms
            .push(RunParms::with_default_command(default_output_name(
                mapfile_name,
            )));
    }

    directives
}

fn parse_run_parms(rest: &str) -> Option<RunParms> {
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    match rest.split_once(char::is_whitespace) {
        Some((output, command)) => {
            let command = command.trim_start();
            if command.is_empty() {
                Some(RunParms::with_default_command(output))
            } else {
                Some(RunParms::new(output, command))
            }
        }
        None => Some(RunParms::with_default_command(rest)),
    }
}

/// Artifact name used when a mapfile has no `RUN_PARMS` directive.
#[must_use]
pub fn default_output_name(mapfile_name: &str) -> String {
    let stem = mapfile_name
        .strip_suffix(MAPFILE_SUFFIX)
        .unwrap_or(mapfile_name);
    format!("{stem}.png")
}

/// Read a file and parse its directives. Non UTF-8 bytes are replaced.
///
/// `mapfile_name` is the name the mapfile was selected by (relative to the
/// test directory); the default artifact name derives from it.
pub fn read_directives(path: &Path, mapfile_name: &str) -> HarnessResult<TestDirectives> {
    let bytes = std::fs::read(path).map_err(|source| HarnessError::io(path, source))?;
    let text = String::from_utf8_lossy(&bytes);
    let directives = parse_directives(&text, mapfile_name);
    debug!(
        "{}: {} run(s), requires {:?}",
        path.display(),
        directives.run_parms.len(),
        directives.requires
    );
    Ok(directives)
}

/// Directory-wide requirements from `all_require.txt`, if the file exists.
pub fn read_directory_requires(dir: &Path) -> HarnessResult<Option<Vec<String>>> {
    let path = dir.join(ms_core::DIRECTORY_REQUIRES_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    read_directives(&path, ms_core::DIRECTORY_REQUIRES_FILE)
        .map(|directives| Some(directives.requires))
}

/// True when every required item occurs somewhere in the version banner.
#[must_use]
pub fn has_requires(version_info: &str, requires: &[String]) -> bool {
    requires.iter().all(|item| version_info.contains(item.as_str()))
}

/// Required items absent from the version banner, in directive order.
#[must_use]
pub fn missing_requires(version_info: &str, requires: &[String]) -> Vec<String> {
    requires
        .iter()
        .filter(|item| !version_info.contains(item.as_str()))
        .cloned()
        .collect()
}
