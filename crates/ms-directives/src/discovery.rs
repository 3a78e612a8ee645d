//! Mapfile discovery.

use std::path::{Path, PathBuf};

use ms_core::{HarnessError, HarnessResult};

use crate::MAPFILE_SUFFIX;

#[must_use]
pub fn is_mapfile_name(name: &str) -> bool {
    name.ends_with(MAPFILE_SUFFIX)
}

/// Mapfiles to process.
///
/// Explicit `.map` arguments win and keep their order. Without any, every
/// `*.map` entry of `dir` is returned, sorted by name and relative to `dir`.
pub fn collect_mapfiles(args: &[String], dir: &Path) -> HarnessResult<Vec<PathBuf>> {
    let explicit: Vec<PathBuf> = args
        .iter()
        .filter(|arg| is_mapfile_name(arg))
        .map(PathBuf::from)
        .collect();
    if !explicit.is_empty() {
        return Ok(explicit);
    }

    let entries = std::fs::read_dir(dir).map_err(|source| HarnessError::io(dir, source))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| HarnessError::io(dir, source))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_mapfile_name(name) {
            names.push(PathBuf::from(name));
        }
    }
    names.sort();
    Ok(names)
}
