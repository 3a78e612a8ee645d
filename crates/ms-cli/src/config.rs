//! Harness configuration: built-in defaults, then `msautotest.toml`, then
//! command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ms_compare::DEFAULT_PDIFF;
use ms_directives::Programs;
use serde::Deserialize;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "msautotest.toml";

/// Contents of `msautotest.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub renderer: Option<String>,
    pub mapserv: Option<String>,
    pub legend: Option<String>,
    pub scalebar: Option<String>,
    pub pdiff: Option<String>,
    pub keep: Option<bool>,
    pub valgrind: Option<bool>,
}

impl HarnessConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse harness configuration")
    }

    /// Load `explicit`, or `<dir>/msautotest.toml` when present.
    pub fn load(dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = dir.join(CONFIG_FILE_NAME);
                if !candidate.is_file() {
                    return Ok(Self::default());
                }
                candidate
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        debug!("loaded {}: {config:?}", path.display());
        Ok(config)
    }
}

/// Command-line values that override the file.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    pub renderer: Option<String>,
    pub mapserv: Option<String>,
    pub legend: Option<String>,
    pub scalebar: Option<String>,
    pub pdiff: Option<String>,
    pub no_pdiff: bool,
    pub keep: bool,
    pub valgrind: bool,
}

/// Fully resolved settings for one harness run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dir: PathBuf,
    pub mapfiles: Vec<String>,
    pub programs: Programs,
    pub keep: bool,
    pub valgrind: bool,
    pub pdiff: Option<String>,
}

impl RunOptions {
    #[must_use]
    pub fn resolve(
        dir: PathBuf,
        mapfiles: Vec<String>,
        file: HarnessConfig,
        flags: FlagOverrides,
    ) -> Self {
        let defaults = Programs::default();
        let programs = Programs {
            shp2img: flags.renderer.or(file.renderer).unwrap_or(defaults.shp2img),
            mapserv: flags.mapserv.or(file.mapserv).unwrap_or(defaults.mapserv),
            legend: flags.legend.or(file.legend).unwrap_or(defaults.legend),
            scalebar: flags.scalebar.or(file.scalebar).unwrap_or(defaults.scalebar),
        };
        let pdiff = if flags.no_pdiff {
            None
        } else {
            Some(
                flags
                    .pdiff
                    .or(file.pdiff)
                    .unwrap_or_else(|| DEFAULT_PDIFF.to_string()),
            )
        };

        Self {
            dir,
            mapfiles,
            programs,
            keep: flags.keep || file.keep.unwrap_or(false),
            valgrind: flags.valgrind || file.valgrind.unwrap_or(false),
            pdiff,
        }
    }
}
